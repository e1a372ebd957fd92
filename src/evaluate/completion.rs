use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::models::PickDetailRow;
use crate::db::queries;
use crate::error::Result;
use crate::types::Selection;

/// Provenance tag for picks created on a participant's behalf when they
/// submitted nothing for a completed period.
pub const SOURCE_AUTO_ELIMINATION: &str = "auto_elimination";

/// Settle a completed period's picks that no contest can resolve:
/// unknown codes for everyone, and blank or absent picks for participants
/// who were still alive coming in. Returns how many results were written.
pub async fn eliminate_missing(pool: &SqlitePool, season: i64, period: i64, now: DateTime<Utc>) -> Result<usize> {
    let season_picks = queries::pick_details_for_season(pool, season).await?;

    let mut by_participant: BTreeMap<i64, Vec<&PickDetailRow>> = BTreeMap::new();
    for pick in &season_picks {
        by_participant.entry(pick.participant_id).or_default().push(pick);
    }

    // Entered before this period and not knocked out before it.
    let alive_coming_in: BTreeSet<i64> = by_participant
        .iter()
        .filter(|(_, picks)| {
            let earlier: Vec<_> = picks.iter().filter(|p| p.period < period).collect();
            !earlier.is_empty() && !earlier.iter().any(|p| p.is_elimination())
        })
        .map(|(id, _)| *id)
        .collect();

    let mut settled = 0;
    for (participant_id, picks) in &by_participant {
        let current = picks.iter().find(|p| p.period == period);
        let outcome = match current {
            Some(pick) if pick.is_overridden() || pick.survived.is_some() => continue,
            Some(pick) => match Selection::from_stored(pick.entity_code.as_deref()) {
                Selection::Unknown(_) => settle_existing(pool, pick.pick_id, now).await,
                Selection::Blank if alive_coming_in.contains(participant_id) => {
                    settle_existing(pool, pick.pick_id, now).await
                }
                _ => continue,
            },
            None if alive_coming_in.contains(participant_id) => {
                create_missing(pool, *participant_id, season, period, now).await
            }
            None => continue,
        };

        match outcome {
            Ok(()) => {
                settled += 1;
                let name = picks.first().map(|p| p.display_name.as_str()).unwrap_or("?");
                info!(participant_id, period, "Auto-eliminated {name}: no valid selection for period {period}");
            }
            Err(e) => warn!(participant_id, period, "Auto-elimination failed: {e}"),
        }
    }
    Ok(settled)
}

async fn settle_existing(pool: &SqlitePool, pick_id: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pick_results
        SET is_valid = 0, is_locked = 1, survived = 0, updated_at = ?
        WHERE pick_id = ? AND survived IS NULL AND overridden = 0
        "#,
    )
    .bind(now.timestamp())
    .bind(pick_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_missing(
    pool: &SqlitePool,
    participant_id: i64,
    season: i64,
    period: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    // A concurrent ingestion may have created the pick since the snapshot.
    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO picks (participant_id, season, period, entity_code, source, picked_at)
        VALUES (?, ?, ?, NULL, ?, ?)
        ON CONFLICT(participant_id, season, period) DO NOTHING
        RETURNING pick_id
        "#,
    )
    .bind(participant_id)
    .bind(season)
    .bind(period)
    .bind(SOURCE_AUTO_ELIMINATION)
    .bind(now.timestamp())
    .fetch_optional(&mut *tx)
    .await?;

    if let Some((pick_id,)) = inserted {
        sqlx::query(
            r#"
            INSERT INTO pick_results (pick_id, contest_id, is_valid, is_locked, survived, updated_at)
            VALUES (?, NULL, 0, 1, 0, ?)
            "#,
        )
        .bind(pick_id)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
