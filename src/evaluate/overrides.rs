use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::{PickResultRow, ResultOverrideRow};
use crate::error::{AppError, Result};
use crate::types::from_unix;

/// Administrative correction of one pick result.
#[derive(Debug, Clone)]
pub struct OverrideRequest {
    pub pick_id: i64,
    pub is_valid: bool,
    pub survived: Option<bool>,
    pub actor: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultOverride {
    pub override_id: i64,
    pub pick_id: i64,
    pub actor: String,
    pub reason: String,
    pub previous_valid: bool,
    pub previous_survived: Option<bool>,
    pub new_valid: bool,
    pub new_survived: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl From<ResultOverrideRow> for ResultOverride {
    fn from(row: ResultOverrideRow) -> Self {
        Self {
            override_id: row.override_id,
            pick_id: row.pick_id,
            actor: row.actor,
            reason: row.reason,
            previous_valid: row.previous_valid,
            previous_survived: row.previous_survived,
            new_valid: row.new_valid,
            new_survived: row.new_survived,
            created_at: from_unix(row.created_at),
        }
    }
}

/// Overwrite a result's validity and outcome, recording who did it and why.
/// The result is marked overridden so later automated runs leave it alone.
pub async fn override_result(pool: &SqlitePool, req: &OverrideRequest, now: DateTime<Utc>) -> Result<ResultOverride> {
    if req.actor.trim().is_empty() || req.reason.trim().is_empty() {
        return Err(AppError::Validation("override needs an actor and a reason".to_string()));
    }

    let mut tx = pool.begin().await?;

    let pick_exists: Option<(i64,)> = sqlx::query_as("SELECT pick_id FROM picks WHERE pick_id = ?")
        .bind(req.pick_id)
        .fetch_optional(&mut *tx)
        .await?;
    if pick_exists.is_none() {
        return Err(AppError::NotFound(format!("pick {}", req.pick_id)));
    }

    sqlx::query("INSERT OR IGNORE INTO pick_results (pick_id, updated_at) VALUES (?, ?)")
        .bind(req.pick_id)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await?;
    let previous: PickResultRow = sqlx::query_as(
        "SELECT pick_id, contest_id, is_valid, is_locked, survived, overridden, updated_at
         FROM pick_results WHERE pick_id = ?",
    )
    .bind(req.pick_id)
    .fetch_one(&mut *tx)
    .await?;

    let row: ResultOverrideRow = sqlx::query_as(
        r#"
        INSERT INTO result_overrides (pick_id, actor, reason, previous_valid, previous_survived,
                                      new_valid, new_survived, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING override_id, pick_id, actor, reason, previous_valid, previous_survived,
                  new_valid, new_survived, created_at
        "#,
    )
    .bind(req.pick_id)
    .bind(req.actor.trim())
    .bind(req.reason.trim())
    .bind(previous.is_valid)
    .bind(previous.survived)
    .bind(req.is_valid)
    .bind(req.survived)
    .bind(now.timestamp())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE pick_results SET is_valid = ?, survived = ?, overridden = 1, updated_at = ? WHERE pick_id = ?",
    )
    .bind(req.is_valid)
    .bind(req.survived)
    .bind(now.timestamp())
    .bind(req.pick_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        pick_id = req.pick_id,
        actor = %req.actor,
        "Result overridden: valid {} -> {}, survived {:?} -> {:?} ({})",
        previous.is_valid,
        req.is_valid,
        previous.survived,
        req.survived,
        req.reason
    );
    Ok(row.into())
}

pub async fn overrides_for_pick(pool: &SqlitePool, pick_id: i64) -> Result<Vec<ResultOverride>> {
    let rows: Vec<ResultOverrideRow> = sqlx::query_as(
        "SELECT override_id, pick_id, actor, reason, previous_valid, previous_survived,
                new_valid, new_survived, created_at
         FROM result_overrides WHERE pick_id = ? ORDER BY override_id",
    )
    .bind(pick_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(ResultOverride::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queries;
    use crate::evaluate::evaluate_period;
    use crate::ingest::{ingest_rows, SOURCE_SHEET};
    use crate::sync::apply_contest_updates;
    use crate::testing::{final_update, raw};
    use crate::types::EntityCode;
    use chrono::Duration;

    #[tokio::test]
    async fn override_is_audited_and_survives_reevaluation() {
        let pool = crate::db::test_pool().await;
        ingest_rows(&pool, 2025, &[raw("Alice", 1, "KC")], SOURCE_SHEET, from_unix(1_000))
            .await
            .unwrap();
        let now = from_unix(500_000);
        apply_contest_updates(
            &pool,
            &[final_update(2025, 1, EntityCode::Kc, EntityCode::Buf, from_unix(100_000), 10, 13)],
            now,
        )
        .await;
        evaluate_period(&pool, 2025, 1, now, Duration::hours(4)).await.unwrap();
        let pick_id = queries::pick_details_for_period(&pool, 2025, 1).await.unwrap()[0].pick_id;

        let req = OverrideRequest {
            pick_id,
            is_valid: true,
            survived: Some(true),
            actor: "commissioner".to_string(),
            reason: "provider posted the wrong final".to_string(),
        };
        let audit = override_result(&pool, &req, now).await.unwrap();
        assert_eq!(audit.previous_survived, Some(false));
        assert_eq!(audit.new_survived, Some(true));

        let rerun = evaluate_period(&pool, 2025, 1, now, Duration::hours(4)).await.unwrap();
        assert_eq!(rerun.overridden_skipped, 1);
        let pick = &queries::pick_details_for_period(&pool, 2025, 1).await.unwrap()[0];
        assert_eq!(pick.survived, Some(true));
        assert_eq!(overrides_for_pick(&pool, pick_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn override_requires_reason_and_existing_pick() {
        let pool = crate::db::test_pool().await;
        let mut req = OverrideRequest {
            pick_id: 99,
            is_valid: false,
            survived: Some(false),
            actor: "ops".to_string(),
            reason: " ".to_string(),
        };
        let err = override_result(&pool, &req, from_unix(1)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        req.reason = "typo".to_string();
        let err = override_result(&pool, &req, from_unix(1)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
