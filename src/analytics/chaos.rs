use serde::Serialize;

use crate::db::models::PickDetailRow;
use crate::db::queries::OddsBook;
use crate::types::EntityCode;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChaosReport {
    /// No finalized pick that period carries pregame odds.
    NoData { finalized_picks: usize },
    Scored {
        expected: f64,
        actual: usize,
        score: u8,
        covered_picks: usize,
        finalized_picks: usize,
    },
}

/// Actual eliminations against the odds-implied expectation for one period,
/// on a 0-100 scale where 50 means "as expected". Only finalized picks with
/// odds on their selected side count, on both sides of the comparison.
pub fn chaos_score(period_picks: &[&PickDetailRow], odds: &OddsBook) -> ChaosReport {
    let finalized: Vec<_> = period_picks
        .iter()
        .filter(|p| p.survived.is_some())
        .filter_map(|p| {
            let contest_id = p.contest_id?;
            let code = p.entity_code.as_deref().and_then(EntityCode::from_abbr)?;
            Some((p, contest_id, code))
        })
        .collect();

    let covered: Vec<_> = finalized
        .iter()
        .filter_map(|(p, contest_id, code)| odds.get(*contest_id, *code).map(|prob| (p, prob)))
        .collect();
    if covered.is_empty() {
        return ChaosReport::NoData { finalized_picks: finalized.len() };
    }

    let expected: f64 = covered.iter().map(|(_, prob)| 1.0 - prob).sum();
    let actual = covered.iter().filter(|(p, _)| p.survived == Some(false)).count();

    ChaosReport::Scored {
        expected,
        actual,
        score: scale(expected, actual),
        covered_picks: covered.len(),
        finalized_picks: finalized.len(),
    }
}

/// Relative surprise centred on 50. The denominator is the expectation
/// itself, falling back to 1 when nothing was expected to fall.
fn scale(expected: f64, actual: usize) -> u8 {
    let denom = if expected > 0.0 { expected } else { 1.0 };
    let raw = 50.0 + 50.0 * (actual as f64 - expected) / denom;
    raw.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fixtures::pick;

    fn book(entries: &[(i64, EntityCode, f64)]) -> OddsBook {
        let mut b = OddsBook::default();
        for (c, side, p) in entries {
            b.insert(*c, *side, *p);
        }
        b
    }

    #[test]
    fn lone_longshot_elimination_scores_63() {
        let p = pick(1, (1, "A"), 1, Some("KC"), Some(10), true, Some(false));
        let report = chaos_score(&[&p], &book(&[(10, EntityCode::Kc, 0.2)]));
        match report {
            ChaosReport::Scored { expected, actual, score, covered_picks, .. } => {
                assert!((expected - 0.8).abs() < 1e-9);
                assert_eq!(actual, 1);
                assert_eq!(score, 63);
                assert_eq!(covered_picks, 1);
            }
            other => panic!("expected a score, got {other:?}"),
        }
    }

    #[test]
    fn uncovered_picks_do_not_count_toward_actual() {
        let covered = pick(1, (1, "A"), 1, Some("KC"), Some(10), true, Some(true));
        let uncovered = pick(2, (2, "B"), 1, Some("DAL"), Some(11), true, Some(false));
        let report = chaos_score(&[&covered, &uncovered], &book(&[(10, EntityCode::Kc, 0.9)]));
        let ChaosReport::Scored { actual, finalized_picks, score, .. } = report else {
            panic!("expected a score");
        };
        assert_eq!(actual, 0);
        assert_eq!(finalized_picks, 2);
        assert_eq!(score, 0);
    }

    #[test]
    fn no_odds_is_no_data_not_zero() {
        let p = pick(1, (1, "A"), 1, Some("KC"), Some(10), true, Some(false));
        assert_eq!(
            chaos_score(&[&p], &OddsBook::default()),
            ChaosReport::NoData { finalized_picks: 1 }
        );
        let pending = pick(2, (2, "B"), 1, Some("KC"), Some(10), true, None);
        assert_eq!(
            chaos_score(&[&pending], &book(&[(10, EntityCode::Kc, 0.5)])),
            ChaosReport::NoData { finalized_picks: 0 }
        );
    }

    #[test]
    fn score_is_clamped() {
        assert_eq!(scale(0.1, 5), 100);
        assert_eq!(scale(3.0, 0), 0);
        assert_eq!(scale(0.0, 0), 50);
        assert_eq!(scale(2.0, 2), 50);
    }
}
