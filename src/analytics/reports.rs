use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::analytics::SeasonSnapshot;
use crate::db::job_runs::JobRun;
use crate::db::models::PickDetailRow;
use crate::types::{EntityCode, Selection};

// ---------------------------------------------------------------------------
// Season summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityCount {
    pub code: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodCounts {
    pub period: i64,
    pub selections: Vec<EntityCount>,
    pub blank: usize,
    pub eliminated: usize,
    /// Entrants not yet eliminated once this period is counted.
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeasonSummary {
    pub season: i64,
    pub entrants_total: usize,
    pub entrants_remaining: usize,
    pub periods: Vec<PeriodCounts>,
    pub jobs: Vec<JobRun>,
}

pub fn season_summary(snapshot: &SeasonSnapshot, jobs: Vec<JobRun>) -> SeasonSummary {
    let mut periods: BTreeMap<i64, (BTreeMap<&str, usize>, usize, usize)> = BTreeMap::new();
    for pick in &snapshot.picks {
        let entry = periods.entry(pick.period).or_default();
        match pick.entity_code.as_deref() {
            Some(code) => *entry.0.entry(code).or_default() += 1,
            None => entry.1 += 1,
        }
        if pick.is_elimination() {
            entry.2 += 1;
        }
    }

    let entrants = entrants(&snapshot.picks);
    let mut first_loss: BTreeMap<i64, i64> = BTreeMap::new();
    for pick in snapshot.picks.iter().filter(|p| p.is_elimination()) {
        let period = first_loss.entry(pick.participant_id).or_insert(pick.period);
        *period = (*period).min(pick.period);
    }

    let periods = periods
        .into_iter()
        .map(|(period, (codes, blank, eliminated))| {
            let mut selections: Vec<EntityCount> = codes
                .into_iter()
                .map(|(code, count)| EntityCount { code: code.to_string(), count })
                .collect();
            selections.sort_by(|a, b| b.count.cmp(&a.count).then(a.code.cmp(&b.code)));
            let gone = first_loss.values().filter(|p| **p <= period).count();
            PeriodCounts { period, selections, blank, eliminated, remaining: entrants.len() - gone }
        })
        .collect();

    let eliminated = eliminated_participants(&snapshot.picks);
    SeasonSummary {
        season: snapshot.season,
        entrants_total: entrants.len(),
        entrants_remaining: entrants.difference(&eliminated).count(),
        periods,
        jobs,
    }
}

/// Participants with at least one pick in the season.
fn entrants(picks: &[PickDetailRow]) -> BTreeSet<i64> {
    picks.iter().map(|p| p.participant_id).collect()
}

fn eliminated_participants(picks: &[PickDetailRow]) -> BTreeSet<i64> {
    picks
        .iter()
        .filter(|p| p.is_elimination())
        .map(|p| p.participant_id)
        .collect()
}

// ---------------------------------------------------------------------------
// Participant history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PickHistoryEntry {
    pub period: i64,
    pub entity_code: Option<String>,
    pub source: String,
    pub opponent: Option<EntityCode>,
    pub is_locked: bool,
    pub is_valid: bool,
    pub survived: Option<bool>,
    pub overridden: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantHistory {
    pub participant: String,
    pub eliminated_in: Option<i64>,
    pub picks: Vec<PickHistoryEntry>,
}

pub fn participant_history(snapshot: &SeasonSnapshot, participant_id: i64, display_name: &str) -> ParticipantHistory {
    let mut picks: Vec<&PickDetailRow> = snapshot
        .picks
        .iter()
        .filter(|p| p.participant_id == participant_id)
        .collect();
    picks.sort_by_key(|p| p.period);

    let eliminated_in = picks.iter().find(|p| p.is_elimination()).map(|p| p.period);
    let picks = picks
        .into_iter()
        .map(|p| {
            let code = p.entity_code.as_deref().and_then(EntityCode::from_abbr);
            let opponent = p
                .contest_id
                .and_then(|id| snapshot.contest(id))
                .zip(code)
                .and_then(|(c, code)| c.opponent_of(code));
            PickHistoryEntry {
                period: p.period,
                entity_code: p.entity_code.clone(),
                source: p.source.clone(),
                opponent,
                is_locked: p.is_locked(),
                is_valid: p.is_valid(),
                survived: p.survived,
                overridden: p.is_overridden(),
            }
        })
        .collect();

    ParticipantHistory {
        participant: display_name.to_string(),
        eliminated_in,
        picks,
    }
}

/// Known entities a participant has already spent on valid picks.
pub fn consumed_entities(snapshot: &SeasonSnapshot, participant_id: i64) -> BTreeSet<EntityCode> {
    snapshot
        .picks
        .iter()
        .filter(|p| p.participant_id == participant_id && p.is_valid())
        .filter_map(|p| Selection::from_stored(p.entity_code.as_deref()).entity())
        .collect()
}

// ---------------------------------------------------------------------------
// Graveyard and survivors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationCause {
    Lost,
    InvalidSelection,
    NoSelection,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraveyardEntry {
    pub participant: String,
    pub period: i64,
    pub entity_code: Option<String>,
    pub cause: EliminationCause,
    pub opponent: Option<EntityCode>,
    /// `selected-opponent` final score.
    pub score: Option<String>,
    pub margin: Option<i64>,
}

/// First eliminating pick per participant, most recent period first.
pub fn graveyard(snapshot: &SeasonSnapshot) -> Vec<GraveyardEntry> {
    let mut first: BTreeMap<i64, &PickDetailRow> = BTreeMap::new();
    for pick in snapshot.picks.iter().filter(|p| p.is_elimination()) {
        let slot = first.entry(pick.participant_id).or_insert(pick);
        if pick.period < slot.period {
            *slot = pick;
        }
    }

    let mut out: Vec<GraveyardEntry> = first
        .into_values()
        .map(|p| {
            let code = p.entity_code.as_deref().and_then(EntityCode::from_abbr);
            let contest = p.contest_id.and_then(|id| snapshot.contest(id));
            let cause = match (&p.entity_code, p.is_valid()) {
                (None, _) => EliminationCause::NoSelection,
                (Some(_), false) => EliminationCause::InvalidSelection,
                (Some(_), true) => EliminationCause::Lost,
            };
            let (opponent, score, margin) = match (contest, code) {
                (Some(c), Some(code)) => {
                    let opponent = c.opponent_of(code);
                    let mine = c.score_of(code);
                    let theirs = opponent.and_then(|o| c.score_of(o));
                    match (mine, theirs) {
                        (Some(m), Some(t)) => (opponent, Some(format!("{m}-{t}")), Some(t - m)),
                        _ => (opponent, None, None),
                    }
                }
                _ => (None, None, None),
            };
            GraveyardEntry {
                participant: p.display_name.clone(),
                period: p.period,
                entity_code: p.entity_code.clone(),
                cause,
                opponent,
                score,
                margin,
            }
        })
        .collect();
    out.sort_by(|a, b| b.period.cmp(&a.period).then(a.participant.cmp(&b.participant)));
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct SurvivorEntry {
    pub participant: String,
    pub wins: usize,
    pub pending: usize,
    pub entities_used: Vec<String>,
}

pub fn survivors(snapshot: &SeasonSnapshot) -> Vec<SurvivorEntry> {
    let eliminated = eliminated_participants(&snapshot.picks);
    let mut by_participant: BTreeMap<i64, Vec<&PickDetailRow>> = BTreeMap::new();
    for pick in snapshot.picks.iter().filter(|p| !eliminated.contains(&p.participant_id)) {
        by_participant.entry(pick.participant_id).or_default().push(pick);
    }

    let mut out: Vec<SurvivorEntry> = by_participant
        .into_values()
        .map(|mut picks| {
            picks.sort_by_key(|p| p.period);
            SurvivorEntry {
                participant: picks[0].display_name.clone(),
                wins: picks.iter().filter(|p| p.survived == Some(true)).count(),
                pending: picks
                    .iter()
                    .filter(|p| p.survived.is_none() && p.entity_code.is_some())
                    .count(),
                entities_used: picks.iter().filter_map(|p| p.entity_code.clone()).collect(),
            }
        })
        .collect();
    out.sort_by(|a, b| b.wins.cmp(&a.wins).then(a.participant.cmp(&b.participant)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fixtures::{contest, pick};

    fn snapshot() -> SeasonSnapshot {
        SeasonSnapshot {
            season: 2025,
            contests: vec![
                contest(1, 1, EntityCode::Kc, EntityCode::Buf, Some((17, 20))),
                contest(2, 2, EntityCode::Dal, EntityCode::Phi, Some((27, 13))),
            ],
            picks: vec![
                pick(1, (1, "Alice"), 1, Some("BUF"), Some(1), true, Some(true)),
                pick(2, (1, "Alice"), 2, Some("DAL"), Some(2), true, Some(true)),
                pick(3, (2, "Bob"), 1, Some("KC"), Some(1), true, Some(false)),
                pick(4, (3, "Carol"), 1, Some("BUF"), Some(1), true, Some(true)),
                pick(5, (3, "Carol"), 2, None, None, false, Some(false)),
                pick(6, (4, "Dan"), 2, Some("PHI"), Some(2), true, None),
            ],
            ..SeasonSnapshot::default()
        }
    }

    #[test]
    fn summary_counts_entrants_and_selections() {
        let s = season_summary(&snapshot(), Vec::new());
        assert_eq!(s.entrants_total, 4);
        assert_eq!(s.entrants_remaining, 2);
        assert_eq!(s.periods[0].selections[0], EntityCount { code: "BUF".into(), count: 2 });
        assert_eq!(s.periods[1].blank, 1);
        assert_eq!(s.periods[1].eliminated, 1);
        let remaining: Vec<(i64, usize)> = s.periods.iter().map(|p| (p.period, p.remaining)).collect();
        assert_eq!(remaining, vec![(1, 3), (2, 2)]);
    }

    #[test]
    fn graveyard_reports_cause_and_margin() {
        let g = graveyard(&snapshot());
        assert_eq!(g.len(), 2);
        assert_eq!(g[0].participant, "Carol");
        assert_eq!(g[0].cause, EliminationCause::NoSelection);
        assert_eq!(g[1].participant, "Bob");
        assert_eq!(g[1].opponent, Some(EntityCode::Buf));
        assert_eq!(g[1].score.as_deref(), Some("17-20"));
        assert_eq!(g[1].margin, Some(3));
    }

    #[test]
    fn survivors_and_history() {
        let snap = snapshot();
        let alive = survivors(&snap);
        let names: Vec<_> = alive.iter().map(|s| (s.participant.as_str(), s.wins, s.pending)).collect();
        assert_eq!(names, vec![("Alice", 2, 0), ("Dan", 0, 1)]);

        let h = participant_history(&snap, 2, "Bob");
        assert_eq!(h.eliminated_in, Some(1));
        assert_eq!(h.picks[0].opponent, Some(EntityCode::Buf));

        let used = consumed_entities(&snap, 1);
        assert_eq!(used, BTreeSet::from([EntityCode::Buf, EntityCode::Dal]));
    }
}
