use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::db::models::ContestRow;
use crate::error::{AppError, Result};
use crate::providers::ScoreProvider;
use crate::types::{ContestStatus, ContestUpdate};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Stored contest already final; the update was dropped.
    pub final_untouched: usize,
    /// Update reported a lower status than stored (stale upstream cache).
    pub status_regressions: usize,
    pub failed: usize,
}

impl SyncStats {
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }

    pub fn absorb(&mut self, other: &SyncStats) {
        self.fetched += other.fetched;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.final_untouched += other.final_untouched;
        self.status_regressions += other.status_regressions;
        self.failed += other.failed;
    }
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetched={} inserted={} updated={} unchanged={} final_untouched={} regressions={} failed={}",
            self.fetched,
            self.inserted,
            self.updated,
            self.unchanged,
            self.final_untouched,
            self.status_regressions,
            self.failed
        )
    }
}

/// Pull one period from the score provider and upsert it. A provider failure
/// returns before any row is touched.
pub async fn sync_contests(
    pool: &SqlitePool,
    provider: &dyn ScoreProvider,
    season: i64,
    period: i64,
    now: DateTime<Utc>,
) -> Result<SyncStats> {
    let updates = provider.get_schedule_and_scores(season, period).await?;
    let stats = apply_contest_updates(pool, &updates, now).await;
    info!(
        season,
        period,
        inserted = stats.inserted,
        updated = stats.updated,
        final_untouched = stats.final_untouched,
        failed = stats.failed,
        "Contest sync complete: season {season} period {period}: {stats}",
    );
    Ok(stats)
}

/// Upsert each update by natural key. One contest's failure never blocks
/// its siblings.
pub async fn apply_contest_updates(pool: &SqlitePool, updates: &[ContestUpdate], now: DateTime<Utc>) -> SyncStats {
    let mut stats = SyncStats {
        fetched: updates.len(),
        ..SyncStats::default()
    };

    for update in updates {
        match upsert_contest(pool, update, now).await {
            Ok(outcome) => match outcome {
                Outcome::Inserted => stats.inserted += 1,
                Outcome::Updated { regressed } => {
                    stats.updated += 1;
                    if regressed {
                        stats.status_regressions += 1;
                    }
                }
                Outcome::Unchanged { regressed } => {
                    stats.unchanged += 1;
                    if regressed {
                        stats.status_regressions += 1;
                    }
                }
                Outcome::FinalUntouched => stats.final_untouched += 1,
            },
            Err(e) => {
                stats.failed += 1;
                warn!(
                    home = %update.key.home,
                    away = %update.key.away,
                    "Contest upsert failed: {e}"
                );
            }
        }
    }
    stats
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Inserted,
    Updated { regressed: bool },
    Unchanged { regressed: bool },
    FinalUntouched,
}

/// Stored fields after merging an update into the current row.
#[derive(Debug, PartialEq, Eq)]
struct Merged {
    provider_id: Option<String>,
    start_time: i64,
    status: ContestStatus,
    home_score: Option<i64>,
    away_score: Option<i64>,
    winner: Option<String>,
}

/// A final report carrying neither both scores nor a winner is a partial
/// response. It is held at in-progress until a complete report arrives.
fn reported_status(update: &ContestUpdate) -> ContestStatus {
    let complete = update.winner.is_some() || (update.home_score.is_some() && update.away_score.is_some());
    if update.status == ContestStatus::Final && !complete {
        ContestStatus::InProgress
    } else {
        update.status
    }
}

/// Status only moves forward, scores are never nulled and the winner is
/// written only once the merged status is final.
fn merge(existing: &ContestRow, existing_status: ContestStatus, reported: ContestStatus, update: &ContestUpdate) -> Merged {
    let status = if reported.rank() >= existing_status.rank() {
        reported
    } else {
        existing_status
    };
    let home_score = update.home_score.or(existing.home_score);
    let away_score = update.away_score.or(existing.away_score);
    let winner = if status == ContestStatus::Final {
        update
            .winner
            .map(|w| w.as_str().to_string())
            .or_else(|| existing.winner.clone())
    } else {
        None
    };
    Merged {
        provider_id: update.provider_id.clone().or_else(|| existing.provider_id.clone()),
        start_time: update.start_time.timestamp(),
        status,
        home_score,
        away_score,
        winner,
    }
}

async fn upsert_contest(pool: &SqlitePool, update: &ContestUpdate, now: DateTime<Utc>) -> Result<Outcome> {
    let key = &update.key;
    if key.home == key.away {
        return Err(AppError::Validation(format!("contest lists {} on both sides", key.home)));
    }
    let reported = reported_status(update);
    if reported != update.status {
        warn!(home = %key.home, away = %key.away, "Final report without scores or winner held as in_progress");
    }

    let existing: Option<ContestRow> = sqlx::query_as(
        r#"
        SELECT contest_id, provider_id, season, period, home_entity, away_entity,
               start_time, status, home_score, away_score, winner, updated_at
        FROM contests
        WHERE season = ? AND period = ? AND home_entity = ? AND away_entity = ?
        "#,
    )
    .bind(key.season)
    .bind(key.period)
    .bind(key.home.as_str())
    .bind(key.away.as_str())
    .fetch_optional(pool)
    .await?;

    let Some(existing) = existing else {
        let winner = (reported == ContestStatus::Final)
            .then_some(update.winner)
            .flatten()
            .map(|w| w.as_str());
        // Another writer may have inserted the same key since the read above;
        // its row wins and this run's data lands on the next sync.
        let result = sqlx::query(
            r#"
            INSERT INTO contests (provider_id, season, period, home_entity, away_entity,
                                  start_time, status, home_score, away_score, winner, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(season, period, home_entity, away_entity) DO NOTHING
            "#,
        )
        .bind(update.provider_id.as_deref())
        .bind(key.season)
        .bind(key.period)
        .bind(key.home.as_str())
        .bind(key.away.as_str())
        .bind(update.start_time.timestamp())
        .bind(reported.to_string())
        .bind(update.home_score)
        .bind(update.away_score)
        .bind(winner)
        .bind(now.timestamp())
        .execute(pool)
        .await?;
        debug!(home = %key.home, away = %key.away, "Inserted contest");
        return Ok(if result.rows_affected() == 1 {
            Outcome::Inserted
        } else {
            Outcome::Unchanged { regressed: false }
        });
    };

    let existing_status = ContestStatus::parse(&existing.status).ok_or_else(|| {
        AppError::Validation(format!("contest {} has unknown status {}", existing.contest_id, existing.status))
    })?;
    if existing_status == ContestStatus::Final {
        if reported != ContestStatus::Final {
            debug!(
                contest_id = existing.contest_id,
                reported = %reported,
                "Ignoring non-final report for final contest"
            );
        }
        return Ok(Outcome::FinalUntouched);
    }

    let regressed = reported.rank() < existing_status.rank();
    if regressed {
        debug!(
            contest_id = existing.contest_id,
            stored = %existing_status,
            reported = %reported,
            "Ignoring status regression"
        );
    }

    let merged = merge(&existing, existing_status, reported, update);
    let current = Merged {
        provider_id: existing.provider_id.clone(),
        start_time: existing.start_time,
        status: existing_status,
        home_score: existing.home_score,
        away_score: existing.away_score,
        winner: existing.winner.clone(),
    };
    if merged == current {
        return Ok(Outcome::Unchanged { regressed });
    }

    // The status guard keeps a concurrent finalization from being overwritten.
    sqlx::query(
        r#"
        UPDATE contests SET
            provider_id = ?, start_time = ?, status = ?,
            home_score = ?, away_score = ?, winner = ?, updated_at = ?
        WHERE contest_id = ? AND status != 'final'
        "#,
    )
    .bind(merged.provider_id.as_deref())
    .bind(merged.start_time)
    .bind(merged.status.to_string())
    .bind(merged.home_score)
    .bind(merged.away_score)
    .bind(merged.winner.as_deref())
    .bind(now.timestamp())
    .bind(existing.contest_id)
    .execute(pool)
    .await?;

    Ok(Outcome::Updated { regressed })
}
