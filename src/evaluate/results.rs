use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::db::models::PickDetailRow;
use crate::db::queries;
use crate::error::Result;
use crate::evaluate::completion;
use crate::types::{Contest, EntityCode, Selection};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvalStats {
    pub picks: usize,
    pub linked: usize,
    pub newly_locked: usize,
    pub resolved: usize,
    pub survived: usize,
    pub eliminated: usize,
    /// Resolved through the stale-game fallback rather than a final status.
    pub stale_resolutions: usize,
    pub unknown_flagged: usize,
    /// Known entity with no contest this period (yet).
    pub unlinked: usize,
    pub overridden_skipped: usize,
    pub missing_eliminated: usize,
    pub contest_failures: usize,
    pub period_complete: bool,
}

impl EvalStats {
    pub fn is_partial(&self) -> bool {
        self.contest_failures > 0
    }
}

impl std::fmt::Display for EvalStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "picks={} linked={} locked={} resolved={} survived={} eliminated={} stale={} unknown={} unlinked={} missing={} failures={} complete={}",
            self.picks,
            self.linked,
            self.newly_locked,
            self.resolved,
            self.survived,
            self.eliminated,
            self.stale_resolutions,
            self.unknown_flagged,
            self.unlinked,
            self.missing_eliminated,
            self.contest_failures,
            self.period_complete
        )
    }
}

/// Result fields the evaluator may write for one pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResultState {
    contest_id: Option<i64>,
    is_locked: bool,
    survived: Option<bool>,
}

/// Link, lock and resolve every pick of a period, then run period-completion
/// eliminations once every contest is resolvable. Writes are grouped per
/// contest; a failed group leaves the others committed.
pub async fn evaluate_period(
    pool: &SqlitePool,
    season: i64,
    period: i64,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<EvalStats> {
    sqlx::query(
        "INSERT OR IGNORE INTO pick_results (pick_id, updated_at)
         SELECT pick_id, ? FROM picks WHERE season = ? AND period = ?",
    )
    .bind(now.timestamp())
    .bind(season)
    .bind(period)
    .execute(pool)
    .await?;

    let contests = queries::contests_for_period(pool, season, period).await?;
    let picks = queries::pick_details_for_period(pool, season, period).await?;

    let mut stats = EvalStats {
        picks: picks.len(),
        ..EvalStats::default()
    };
    let mut groups: BTreeMap<i64, Vec<(PickDetailRow, EntityCode)>> = BTreeMap::new();

    for pick in picks {
        if pick.is_overridden() {
            stats.overridden_skipped += 1;
            continue;
        }
        match Selection::from_stored(pick.entity_code.as_deref()) {
            Selection::Blank => {}
            Selection::Unknown(code) => {
                if pick.is_valid() {
                    flag_invalid(pool, pick.pick_id, now).await?;
                    stats.unknown_flagged += 1;
                    warn!(pick_id = pick.pick_id, participant = %pick.display_name, "Unknown entity code {code} flagged invalid");
                }
            }
            Selection::Entity(code) => match contests.iter().find(|c| c.involves(code)) {
                Some(contest) => groups.entry(contest.contest_id).or_default().push((pick, code)),
                None => {
                    stats.unlinked += 1;
                    debug!(pick_id = pick.pick_id, %code, "No contest this period for selected entity");
                }
            },
        }
    }

    for contest in &contests {
        let Some(group) = groups.get(&contest.contest_id) else {
            continue;
        };
        if let Err(e) = apply_contest_group(pool, contest, group, now, stale_after, &mut stats).await {
            stats.contest_failures += 1;
            warn!(contest_id = contest.contest_id, "Result write failed for contest group: {e}");
        }
    }

    stats.period_complete = !contests.is_empty() && contests.iter().all(|c| c.is_resolvable(now, stale_after));
    if stats.period_complete {
        stats.missing_eliminated = completion::eliminate_missing(pool, season, period, now).await?;
    }

    info!(
        season,
        period,
        resolved = stats.resolved,
        eliminated = stats.eliminated,
        stale = stats.stale_resolutions,
        failures = stats.contest_failures,
        "Evaluation complete: season {season} period {period}: {stats}",
    );
    Ok(stats)
}

async fn flag_invalid(pool: &SqlitePool, pick_id: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "UPDATE pick_results SET is_valid = 0, updated_at = ?
         WHERE pick_id = ? AND is_valid = 1 AND overridden = 0",
    )
    .bind(now.timestamp())
    .bind(pick_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Target state for one pick. `survived` is only ever filled in, never
/// changed, and an invalid pick cannot survive.
fn next_state(
    pick: &PickDetailRow,
    code: EntityCode,
    contest: &Contest,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> ResultState {
    let is_locked = pick.is_locked() || contest.has_started(now);
    let survived = match pick.survived {
        Some(frozen) => Some(frozen),
        None if contest.is_resolvable(now, stale_after) => {
            Some(pick.is_valid() && contest.resolved_winner() == Some(code))
        }
        None => None,
    };
    ResultState {
        contest_id: Some(contest.contest_id),
        is_locked,
        survived,
    }
}

async fn apply_contest_group(
    pool: &SqlitePool,
    contest: &Contest,
    group: &[(PickDetailRow, EntityCode)],
    now: DateTime<Utc>,
    stale_after: Duration,
    stats: &mut EvalStats,
) -> Result<()> {
    let stale = contest.is_stale_resolution(now, stale_after);
    let mut local = EvalStats::default();
    let mut tx = pool.begin().await?;

    for (pick, code) in group {
        let current = ResultState {
            contest_id: pick.contest_id,
            is_locked: pick.is_locked(),
            survived: pick.survived,
        };
        let next = next_state(pick, *code, contest, now, stale_after);
        if next == current {
            continue;
        }

        sqlx::query(
            r#"
            UPDATE pick_results
            SET contest_id = ?, is_locked = ?, survived = COALESCE(survived, ?), updated_at = ?
            WHERE pick_id = ? AND overridden = 0
            "#,
        )
        .bind(next.contest_id)
        .bind(next.is_locked)
        .bind(next.survived)
        .bind(now.timestamp())
        .bind(pick.pick_id)
        .execute(&mut *tx)
        .await?;

        if current.contest_id != next.contest_id {
            local.linked += 1;
        }
        if next.is_locked && !current.is_locked {
            local.newly_locked += 1;
        }
        if current.survived.is_none() {
            match next.survived {
                Some(true) => {
                    local.resolved += 1;
                    local.survived += 1;
                }
                Some(false) => {
                    local.resolved += 1;
                    local.eliminated += 1;
                    debug!(pick_id = pick.pick_id, participant = %pick.display_name, %code, "Pick eliminated");
                }
                None => {}
            }
            if next.survived.is_some() && stale {
                local.stale_resolutions += 1;
            }
        }
    }

    tx.commit().await?;
    if local.stale_resolutions > 0 {
        info!(
            contest_id = contest.contest_id,
            status = %contest.status,
            "Resolved {} picks via stale-game fallback: {} @ {}",
            local.stale_resolutions,
            contest.key.away,
            contest.key.home
        );
    }

    stats.linked += local.linked;
    stats.newly_locked += local.newly_locked;
    stats.resolved += local.resolved;
    stats.survived += local.survived;
    stats.eliminated += local.eliminated;
    stats.stale_resolutions += local.stale_resolutions;
    Ok(())
}
