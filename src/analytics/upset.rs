use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::models::PickDetailRow;
use crate::db::queries::OddsBook;
use crate::types::{Contest, EntityCode};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpsetReport {
    /// No resolved contest that period carries odds for its winner.
    NoData,
    Found {
        contest_id: i64,
        winner: EntityCode,
        loser: EntityCode,
        winner_probability: f64,
        magnitude: f64,
        eliminated_picks: usize,
    },
}

/// Biggest upset of a period: the resolved, odds-covered contest whose
/// winner was least expected to win.
pub fn detect_upset(
    contests: &[&Contest],
    period_picks: &[&PickDetailRow],
    odds: &OddsBook,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> UpsetReport {
    let best = contests
        .iter()
        .filter(|c| c.is_resolvable(now, stale_after))
        .filter_map(|c| {
            let winner = c.resolved_winner()?;
            let p = odds.get(c.contest_id, winner)?;
            Some((*c, winner, p))
        })
        .max_by(|a, b| (1.0 - a.2).total_cmp(&(1.0 - b.2)).then(b.0.contest_id.cmp(&a.0.contest_id)));

    let Some((contest, winner, p)) = best else {
        return UpsetReport::NoData;
    };
    let eliminated_picks = period_picks
        .iter()
        .filter(|pick| pick.contest_id == Some(contest.contest_id) && pick.is_elimination())
        .count();

    UpsetReport::Found {
        contest_id: contest.contest_id,
        winner,
        loser: contest.opponent_of(winner).unwrap_or(winner),
        winner_probability: p,
        magnitude: 1.0 - p,
        eliminated_picks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fixtures::{contest, kickoff, pick};

    #[test]
    fn picks_least_likely_winner_and_counts_its_victims() {
        let c1 = contest(1, 1, EntityCode::Kc, EntityCode::Buf, Some((10, 24)));
        let c2 = contest(2, 1, EntityCode::Dal, EntityCode::Phi, Some((30, 3)));
        let c3 = contest(3, 1, EntityCode::Sea, EntityCode::Sf, Some((7, 28)));
        let mut odds = OddsBook::default();
        odds.insert(1, EntityCode::Buf, 0.25);
        odds.insert(2, EntityCode::Dal, 0.6);
        // c3 has no odds for its winner and cannot qualify.
        odds.insert(3, EntityCode::Sea, 0.9);

        let p1 = pick(1, (1, "A"), 1, Some("KC"), Some(1), true, Some(false));
        let p2 = pick(2, (2, "B"), 1, Some("KC"), Some(1), true, Some(false));
        let p3 = pick(3, (3, "C"), 1, Some("BUF"), Some(1), true, Some(true));
        let p4 = pick(4, (4, "D"), 1, Some("SEA"), Some(3), true, Some(false));

        let report = detect_upset(
            &[&c1, &c2, &c3],
            &[&p1, &p2, &p3, &p4],
            &odds,
            kickoff() + Duration::days(1),
            Duration::hours(4),
        );
        assert_eq!(
            report,
            UpsetReport::Found {
                contest_id: 1,
                winner: EntityCode::Buf,
                loser: EntityCode::Kc,
                winner_probability: 0.25,
                magnitude: 0.75,
                eliminated_picks: 2,
            }
        );
    }

    #[test]
    fn unresolved_or_unpriced_period_is_no_data() {
        let pending = contest(1, 1, EntityCode::Kc, EntityCode::Buf, None);
        let mut odds = OddsBook::default();
        odds.insert(1, EntityCode::Kc, 0.5);
        let report = detect_upset(&[&pending], &[], &odds, kickoff(), Duration::hours(4));
        assert_eq!(report, UpsetReport::NoData);
    }
}
