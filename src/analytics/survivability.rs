use std::collections::BTreeSet;

use serde::Serialize;

use crate::db::queries::OddsBook;
use crate::types::{Contest, EntityCode};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodOutlook {
    pub period: i64,
    /// Top-K favourites that period, strongest first.
    pub favourites: Vec<EntityCode>,
    /// Favourites the participant has not used yet.
    pub available: Vec<EntityCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurvivabilityReport {
    /// No future period carries odds.
    NoData { uncovered_periods: Vec<i64> },
    Scored {
        total_available: usize,
        periods: Vec<PeriodOutlook>,
        uncovered_periods: Vec<i64>,
    },
}

/// Forward gauge for one participant: across every period after
/// `current_period` through `last_period`, count the period's top-K
/// favourites the participant can still select.
pub fn forward_survivability(
    contests: &[Contest],
    odds: &OddsBook,
    consumed: &BTreeSet<EntityCode>,
    current_period: i64,
    last_period: i64,
    top_k: usize,
) -> SurvivabilityReport {
    let mut periods = Vec::new();
    let mut uncovered = Vec::new();

    for period in (current_period + 1)..=last_period {
        let mut priced: Vec<(EntityCode, f64)> = contests
            .iter()
            .filter(|c| c.key.period == period)
            .flat_map(|c| [c.key.home, c.key.away].map(|side| (c.contest_id, side)))
            .filter_map(|(contest_id, side)| odds.get(contest_id, side).map(|p| (side, p)))
            .collect();
        if priced.is_empty() {
            uncovered.push(period);
            continue;
        }

        priced.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let favourites: Vec<EntityCode> = priced.into_iter().take(top_k).map(|(code, _)| code).collect();
        let available = favourites.iter().copied().filter(|c| !consumed.contains(c)).collect();
        periods.push(PeriodOutlook { period, favourites, available });
    }

    if periods.is_empty() {
        return SurvivabilityReport::NoData { uncovered_periods: uncovered };
    }
    SurvivabilityReport::Scored {
        total_available: periods.iter().map(|p| p.available.len()).sum(),
        periods,
        uncovered_periods: uncovered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fixtures::contest;

    fn setup() -> (Vec<Contest>, OddsBook) {
        let contests = vec![
            contest(1, 2, EntityCode::Kc, EntityCode::Buf, None),
            contest(2, 2, EntityCode::Dal, EntityCode::Phi, None),
            contest(3, 3, EntityCode::Sea, EntityCode::Sf, None),
            contest(4, 4, EntityCode::Det, EntityCode::Gb, None),
        ];
        let mut odds = OddsBook::default();
        odds.insert(1, EntityCode::Kc, 0.7);
        odds.insert(1, EntityCode::Buf, 0.3);
        odds.insert(2, EntityCode::Dal, 0.45);
        odds.insert(2, EntityCode::Phi, 0.55);
        odds.insert(4, EntityCode::Det, 0.8);
        odds.insert(4, EntityCode::Gb, 0.2);
        (contests, odds)
    }

    #[test]
    fn consumed_favourites_are_subtracted() {
        let (contests, odds) = setup();
        let consumed = BTreeSet::from([EntityCode::Kc, EntityCode::Det]);
        let report = forward_survivability(&contests, &odds, &consumed, 1, 4, 2);

        let SurvivabilityReport::Scored { total_available, periods, uncovered_periods } = report else {
            panic!("expected a gauge");
        };
        assert_eq!(periods[0].favourites, vec![EntityCode::Kc, EntityCode::Phi]);
        assert_eq!(periods[0].available, vec![EntityCode::Phi]);
        assert_eq!(periods[1].available, vec![EntityCode::Gb]);
        assert_eq!(total_available, 2);
        assert_eq!(uncovered_periods, vec![3]);
    }

    #[test]
    fn no_future_odds_is_no_data() {
        let (contests, odds) = setup();
        let report = forward_survivability(&contests, &odds, &BTreeSet::new(), 4, 6, 5);
        assert_eq!(report, SurvivabilityReport::NoData { uncovered_periods: vec![5, 6] });
    }
}
