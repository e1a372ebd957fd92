use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::ingest::participants;
use crate::providers::PickSource;
use crate::types::{EntityCode, RawPickRow, Selection};

/// Provenance tag for rows read from the shared pick sheet.
pub const SOURCE_SHEET: &str = "sheet";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub rows: usize,
    pub participants_created: usize,
    pub picks_created: usize,
    pub picks_updated: usize,
    pub picks_cleared: usize,
    pub unchanged: usize,
    /// Rows addressing a locked pick; dropped without touching it.
    pub locked_ignored: usize,
    pub blank_skipped: usize,
    /// Codes outside the known entity set, stored for the evaluator to flag.
    pub unknown_codes: usize,
    pub invalid_rows: usize,
    pub duplicates_flagged: usize,
    pub failed: usize,
}

impl IngestStats {
    pub fn is_partial(&self) -> bool {
        self.failed > 0 || self.invalid_rows > 0
    }
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rows={} created={} updated={} cleared={} unchanged={} locked_ignored={} unknown={} invalid={} duplicates={} failed={}",
            self.rows,
            self.picks_created,
            self.picks_updated,
            self.picks_cleared,
            self.unchanged,
            self.locked_ignored,
            self.unknown_codes,
            self.invalid_rows,
            self.duplicates_flagged,
            self.failed
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RowOutcome {
    Created,
    Updated,
    Cleared,
    Unchanged,
    BlankSkipped,
}

/// Fetch the season's rows from the pick source and ingest them.
pub async fn ingest_picks(
    pool: &SqlitePool,
    source: &dyn PickSource,
    season: i64,
    now: DateTime<Utc>,
) -> Result<IngestStats> {
    let rows = source.fetch_rows(season).await?;
    let stats = ingest_rows(pool, season, &rows, SOURCE_SHEET, now).await?;
    info!(
        season,
        rows = stats.rows,
        created = stats.picks_created,
        updated = stats.picks_updated,
        locked_ignored = stats.locked_ignored,
        duplicates = stats.duplicates_flagged,
        "Pick ingestion complete: {stats}",
    );
    Ok(stats)
}

/// Upsert raw rows. Each row commits on its own; a bad row is counted and
/// skipped. Every participant seen is rescanned for repeated selections
/// afterwards.
pub async fn ingest_rows(
    pool: &SqlitePool,
    season: i64,
    rows: &[RawPickRow],
    source: &str,
    now: DateTime<Utc>,
) -> Result<IngestStats> {
    let mut stats = IngestStats {
        rows: rows.len(),
        ..IngestStats::default()
    };
    let mut seen: BTreeSet<i64> = BTreeSet::new();

    for row in rows {
        if row.period < 1 {
            stats.invalid_rows += 1;
            warn!(participant = %row.participant_name, period = row.period, "Skipping pick row with invalid period");
            continue;
        }
        let selection = Selection::parse(&row.raw_code);
        match ingest_row(pool, season, row, &selection, source, now).await {
            Ok((participant_id, created, outcome)) => {
                seen.insert(participant_id);
                if created {
                    stats.participants_created += 1;
                }
                if matches!(selection, Selection::Unknown(_))
                    && matches!(outcome, RowOutcome::Created | RowOutcome::Updated)
                {
                    stats.unknown_codes += 1;
                    debug!(participant = %row.participant_name, code = %row.raw_code, "Stored unknown entity code");
                }
                match outcome {
                    RowOutcome::Created => stats.picks_created += 1,
                    RowOutcome::Updated => stats.picks_updated += 1,
                    RowOutcome::Cleared => stats.picks_cleared += 1,
                    RowOutcome::Unchanged => stats.unchanged += 1,
                    RowOutcome::BlankSkipped => stats.blank_skipped += 1,
                }
            }
            Err(AppError::LockedRecord(msg)) => {
                stats.locked_ignored += 1;
                warn!(participant = %row.participant_name, period = row.period, "Ignoring sheet change: {msg}");
            }
            Err(AppError::Validation(msg)) => {
                stats.invalid_rows += 1;
                warn!(participant = %row.participant_name, "Skipping pick row: {msg}");
            }
            Err(e) => {
                stats.failed += 1;
                warn!(participant = %row.participant_name, period = row.period, "Pick row failed: {e}");
            }
        }
    }

    for participant_id in seen {
        match flag_duplicate_selections(pool, participant_id, season, now).await {
            Ok(n) => stats.duplicates_flagged += n,
            Err(e) => {
                stats.failed += 1;
                warn!(participant_id, "Duplicate rescan failed: {e}");
            }
        }
    }

    Ok(stats)
}

async fn ingest_row(
    pool: &SqlitePool,
    season: i64,
    row: &RawPickRow,
    selection: &Selection,
    source: &str,
    now: DateTime<Utc>,
) -> Result<(i64, bool, RowOutcome)> {
    let mut tx = pool.begin().await?;
    let resolved = participants::resolve_or_create(&mut *tx, &row.participant_name, now).await?;
    let new_code = selection.stored_code();

    let existing: Option<(i64, Option<String>)> = sqlx::query_as(
        "SELECT pick_id, entity_code FROM picks WHERE participant_id = ? AND season = ? AND period = ?",
    )
    .bind(resolved.participant_id)
    .bind(season)
    .bind(row.period)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = match existing {
        None if new_code.is_none() => RowOutcome::BlankSkipped,
        None => {
            let pick_id: (i64,) = sqlx::query_as(
                r#"
                INSERT INTO picks (participant_id, season, period, entity_code, source, picked_at)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING pick_id
                "#,
            )
            .bind(resolved.participant_id)
            .bind(season)
            .bind(row.period)
            .bind(new_code.as_deref())
            .bind(source)
            .bind(now.timestamp())
            .fetch_one(&mut *tx)
            .await?;
            ensure_result_row(&mut *tx, pick_id.0, now).await?;
            RowOutcome::Created
        }
        Some((pick_id, current)) => {
            if current == new_code {
                ensure_result_row(&mut *tx, pick_id, now).await?;
                RowOutcome::Unchanged
            } else if is_locked(&mut *tx, pick_id, season, row.period, current.as_deref(), now).await? {
                ensure_result_row(&mut *tx, pick_id, now).await?;
                tx.commit().await?;
                return Err(AppError::LockedRecord(format!(
                    "pick {pick_id} keeps {} over {}",
                    current.as_deref().unwrap_or("-"),
                    new_code.as_deref().unwrap_or("-"),
                )));
            } else {
                sqlx::query("UPDATE picks SET entity_code = ?, source = ?, picked_at = ? WHERE pick_id = ?")
                    .bind(new_code.as_deref())
                    .bind(source)
                    .bind(now.timestamp())
                    .bind(pick_id)
                    .execute(&mut *tx)
                    .await?;
                ensure_result_row(&mut *tx, pick_id, now).await?;
                // Contest link belonged to the old selection.
                sqlx::query(
                    "UPDATE pick_results SET contest_id = NULL, updated_at = ?
                     WHERE pick_id = ? AND is_locked = 0 AND survived IS NULL",
                )
                .bind(now.timestamp())
                .bind(pick_id)
                .execute(&mut *tx)
                .await?;
                if new_code.is_none() {
                    RowOutcome::Cleared
                } else {
                    RowOutcome::Updated
                }
            }
        }
    };

    tx.commit().await?;
    Ok((resolved.participant_id, resolved.created, outcome))
}

async fn ensure_result_row(conn: &mut SqliteConnection, pick_id: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO pick_results (pick_id, updated_at) VALUES (?, ?)")
        .bind(pick_id)
        .bind(now.timestamp())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Locked once the evaluator has marked it, once its linked contest has
/// started, or once the period's contest for its current entity has started
/// (the evaluator may not have linked it yet).
async fn is_locked(
    conn: &mut SqliteConnection,
    pick_id: i64,
    season: i64,
    period: i64,
    current_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result: Option<(bool, Option<i64>)> = sqlx::query_as(
        r#"
        SELECT r.is_locked, c.start_time
        FROM pick_results r
        LEFT JOIN contests c ON c.contest_id = r.contest_id
        WHERE r.pick_id = ?
        "#,
    )
    .bind(pick_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((locked, linked_start)) = result {
        if locked || linked_start.is_some_and(|s| s <= now.timestamp()) {
            return Ok(true);
        }
    }

    let Some(entity) = current_code.and_then(EntityCode::from_abbr) else {
        return Ok(false);
    };
    let start: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT start_time FROM contests
        WHERE season = ? AND period = ? AND (home_entity = ? OR away_entity = ?)
        ORDER BY start_time
        LIMIT 1
        "#,
    )
    .bind(season)
    .bind(period)
    .bind(entity.as_str())
    .bind(entity.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(start.is_some_and(|(s,)| s <= now.timestamp()))
}

/// Mark every pick whose code the participant used in more than one period of
/// the season as invalid. Only ever downgrades; overridden results are left
/// to their override. Returns the number of results newly flagged.
pub async fn flag_duplicate_selections(
    pool: &SqlitePool,
    participant_id: i64,
    season: i64,
    now: DateTime<Utc>,
) -> Result<usize> {
    let picks: Vec<(i64, i64, String)> = sqlx::query_as(
        "SELECT pick_id, period, entity_code FROM picks
         WHERE participant_id = ? AND season = ? AND entity_code IS NOT NULL",
    )
    .bind(participant_id)
    .bind(season)
    .fetch_all(pool)
    .await?;

    let mut by_code: HashMap<&str, Vec<(i64, i64)>> = HashMap::new();
    for (pick_id, period, code) in &picks {
        by_code.entry(code.as_str()).or_default().push((*pick_id, *period));
    }

    let mut flagged = 0;
    for (code, group) in by_code.iter().filter(|(_, g)| g.len() > 1) {
        let mut newly = 0;
        let mut tx = pool.begin().await?;
        for (pick_id, _) in group {
            ensure_result_row(&mut *tx, *pick_id, now).await?;
            let res = sqlx::query(
                "UPDATE pick_results SET is_valid = 0, updated_at = ?
                 WHERE pick_id = ? AND is_valid = 1 AND overridden = 0",
            )
            .bind(now.timestamp())
            .bind(pick_id)
            .execute(&mut *tx)
            .await?;
            newly += res.rows_affected() as usize;
        }
        tx.commit().await?;
        flagged += newly;

        let periods: Vec<i64> = group.iter().map(|(_, p)| *p).collect();
        if newly > 0 {
            warn!(participant_id, code, ?periods, "Repeated selection flagged invalid");
        }
    }
    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{queries, test_pool};
    use crate::sync::apply_contest_updates;
    use crate::testing::{raw, scheduled_update, FakePicks};
    use crate::types::from_unix;

    async fn result_snapshot(pool: &SqlitePool) -> Vec<(i64, Option<String>, Option<bool>, Option<bool>)> {
        queries::pick_details_for_season(pool, 2025)
            .await
            .unwrap()
            .into_iter()
            .map(|p| (p.period, p.entity_code, p.is_valid, p.survived))
            .collect()
    }

    #[tokio::test]
    async fn identical_rerun_changes_nothing() {
        let pool = test_pool().await;
        let now = from_unix(1_000);
        let rows = vec![raw("Alice", 1, "KC"), raw("Alice", 2, "buf"), raw("Bob", 1, "DAL")];

        let first = ingest_rows(&pool, 2025, &rows, SOURCE_SHEET, now).await.unwrap();
        assert_eq!(first.picks_created, 3);
        assert_eq!(first.participants_created, 2);
        let before = result_snapshot(&pool).await;

        let second = ingest_rows(&pool, 2025, &rows, SOURCE_SHEET, from_unix(2_000)).await.unwrap();
        assert_eq!(second.picks_created, 0);
        assert_eq!(second.unchanged, 3);
        assert_eq!(second.participants_created, 0);
        assert_eq!(result_snapshot(&pool).await, before);
    }

    #[tokio::test]
    async fn locked_pick_ignores_new_code() {
        let pool = test_pool().await;
        let kickoff = from_unix(10_000);
        apply_contest_updates(
            &pool,
            &[scheduled_update(2025, 1, EntityCode::Kc, EntityCode::Buf, kickoff)],
            from_unix(1_000),
        )
        .await;

        ingest_rows(&pool, 2025, &[raw("Alice", 1, "KC")], SOURCE_SHEET, from_unix(5_000))
            .await
            .unwrap();

        // After kickoff the sheet says DAL; the stored KC must survive.
        let stats = ingest_rows(&pool, 2025, &[raw("Alice", 1, "DAL")], SOURCE_SHEET, from_unix(10_001))
            .await
            .unwrap();
        assert_eq!(stats.locked_ignored, 1);
        assert_eq!(stats.failed, 0);
        assert!(!stats.is_partial());

        let row = raw("Alice", 1, "DAL");
        let err = ingest_row(&pool, 2025, &row, &Selection::parse("DAL"), SOURCE_SHEET, from_unix(10_002))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LockedRecord(_)));

        let picks = queries::pick_details_for_season(&pool, 2025).await.unwrap();
        assert_eq!(picks[0].entity_code.as_deref(), Some("KC"));
    }

    #[tokio::test]
    async fn unlocked_pick_can_change_and_clear() {
        let pool = test_pool().await;
        let now = from_unix(1_000);
        ingest_rows(&pool, 2025, &[raw("Alice", 1, "KC")], SOURCE_SHEET, now).await.unwrap();

        let changed = ingest_rows(&pool, 2025, &[raw("Alice", 1, "DAL")], SOURCE_SHEET, now).await.unwrap();
        assert_eq!(changed.picks_updated, 1);

        let cleared = ingest_rows(&pool, 2025, &[raw("Alice", 1, "  ")], SOURCE_SHEET, now).await.unwrap();
        assert_eq!(cleared.picks_cleared, 1);
        let picks = queries::pick_details_for_season(&pool, 2025).await.unwrap();
        assert_eq!(picks[0].entity_code, None);
    }

    #[tokio::test]
    async fn blank_without_existing_pick_creates_participant_only() {
        let pool = test_pool().await;
        let stats = ingest_rows(&pool, 2025, &[raw("Carol", 1, "")], SOURCE_SHEET, from_unix(1_000))
            .await
            .unwrap();
        assert_eq!(stats.blank_skipped, 1);
        assert_eq!(stats.participants_created, 1);
        assert!(queries::pick_details_for_season(&pool, 2025).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_selection_invalidates_both_periods() {
        let pool = test_pool().await;
        let rows = vec![raw("Alice", 1, "KC"), raw("Alice", 2, "BUF"), raw("Alice", 3, "KC")];
        let stats = ingest_rows(&pool, 2025, &rows, SOURCE_SHEET, from_unix(1_000)).await.unwrap();
        assert_eq!(stats.duplicates_flagged, 2);

        let validity: Vec<(i64, bool)> = queries::pick_details_for_season(&pool, 2025)
            .await
            .unwrap()
            .iter()
            .map(|p| (p.period, p.is_valid()))
            .collect();
        assert_eq!(validity, vec![(1, false), (2, true), (3, false)]);

        // Rerun: already flagged, nothing new.
        let again = ingest_rows(&pool, 2025, &rows, SOURCE_SHEET, from_unix(2_000)).await.unwrap();
        assert_eq!(again.duplicates_flagged, 0);
    }

    #[tokio::test]
    async fn correcting_a_repeat_before_lock_keeps_both_invalid() {
        let pool = test_pool().await;
        let rows = vec![raw("Alice", 1, "KC"), raw("Alice", 3, "KC")];
        let stats = ingest_rows(&pool, 2025, &rows, SOURCE_SHEET, from_unix(1_000)).await.unwrap();
        assert_eq!(stats.duplicates_flagged, 2);

        // No contests are scheduled yet, so period 3 is still editable.
        let fixed = ingest_rows(&pool, 2025, &[raw("Alice", 3, "DAL")], SOURCE_SHEET, from_unix(2_000))
            .await
            .unwrap();
        assert_eq!(fixed.picks_updated, 1);
        assert_eq!(fixed.duplicates_flagged, 0);

        let picks: Vec<(i64, Option<String>, bool)> = queries::pick_details_for_season(&pool, 2025)
            .await
            .unwrap()
            .into_iter()
            .map(|p| (p.period, p.entity_code.clone(), p.is_valid()))
            .collect();
        assert_eq!(
            picks,
            vec![(1, Some("KC".to_string()), false), (3, Some("DAL".to_string()), false)]
        );
    }

    #[tokio::test]
    async fn duplicate_rescan_leaves_overridden_results_alone() {
        let pool = test_pool().await;
        let rows = vec![raw("Alice", 1, "KC"), raw("Alice", 3, "KC")];
        ingest_rows(&pool, 2025, &rows, SOURCE_SHEET, from_unix(1_000)).await.unwrap();

        let picks = queries::pick_details_for_season(&pool, 2025).await.unwrap();
        let participant_id = picks[0].participant_id;
        let req = crate::evaluate::OverrideRequest {
            pick_id: picks[1].pick_id,
            is_valid: true,
            survived: None,
            actor: "commissioner".to_string(),
            reason: "approved by league vote".to_string(),
        };
        crate::evaluate::override_result(&pool, &req, from_unix(2_000)).await.unwrap();

        let flagged = flag_duplicate_selections(&pool, participant_id, 2025, from_unix(3_000))
            .await
            .unwrap();
        assert_eq!(flagged, 0);

        let validity: Vec<(i64, bool, bool)> = queries::pick_details_for_season(&pool, 2025)
            .await
            .unwrap()
            .iter()
            .map(|p| (p.period, p.is_valid(), p.is_overridden()))
            .collect();
        assert_eq!(validity, vec![(1, false, false), (3, true, true)]);
    }

    #[tokio::test]
    async fn unknown_codes_are_stored_not_rejected() {
        let pool = test_pool().await;
        let rows = vec![raw("Dan", 1, "chefs"), raw("Dan", 0, "KC")];
        let stats = ingest_rows(&pool, 2025, &rows, SOURCE_SHEET, from_unix(1_000)).await.unwrap();
        assert_eq!(stats.unknown_codes, 1);
        assert_eq!(stats.invalid_rows, 1);

        let picks = queries::pick_details_for_season(&pool, 2025).await.unwrap();
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].entity_code.as_deref(), Some("CHEFS"));
        assert!(picks[0].is_valid());
    }

    #[tokio::test]
    async fn ingest_picks_reads_from_source() {
        let pool = test_pool().await;
        let source = FakePicks::new(vec![raw("Eve", 1, "SEA")]);
        let stats = ingest_picks(&pool, &source, 2025, from_unix(1_000)).await.unwrap();
        assert_eq!(stats.picks_created, 1);
        assert_eq!(queries::pick_details_for_season(&pool, 2025).await.unwrap()[0].source, SOURCE_SHEET);

        let err = ingest_picks(&pool, &FakePicks::failing(), 2025, from_unix(1_000))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable(_)));
    }
}
