use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::db::models::ParticipantRow;
use crate::error::{AppError, Result};
use crate::types::{clean_display_name, normalize_name};

/// Outcome of resolving a raw name against the participant store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub participant_id: i64,
    pub created: bool,
}

/// Alias first, then the participant's own key; create on first sighting.
pub async fn resolve_or_create(conn: &mut SqliteConnection, raw_name: &str, now: DateTime<Utc>) -> Result<Resolved> {
    let key = normalize_name(raw_name);
    if key.is_empty() {
        return Err(AppError::Validation("empty participant name".to_string()));
    }

    if let Some(participant_id) = lookup(&mut *conn, &key).await? {
        return Ok(Resolved { participant_id, created: false });
    }

    let inserted = sqlx::query(
        "INSERT INTO participants (name_key, display_name, created_at) VALUES (?, ?, ?)
         ON CONFLICT(name_key) DO NOTHING",
    )
    .bind(&key)
    .bind(clean_display_name(raw_name))
    .bind(now.timestamp())
    .execute(&mut *conn)
    .await?;

    let participant_id = lookup(&mut *conn, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("participant {key} vanished after insert")))?;
    Ok(Resolved {
        participant_id,
        created: inserted.rows_affected() == 1,
    })
}

async fn lookup(conn: &mut SqliteConnection, key: &str) -> Result<Option<i64>> {
    let aliased: Option<(i64,)> = sqlx::query_as("SELECT participant_id FROM participant_aliases WHERE alias_key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some((id,)) = aliased {
        return Ok(Some(id));
    }
    let own: Option<(i64,)> = sqlx::query_as("SELECT participant_id FROM participants WHERE name_key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(own.map(|(id,)| id))
}

/// Participant by display name or alias, for read paths.
pub async fn find(pool: &SqlitePool, name: &str) -> Result<Option<ParticipantRow>> {
    let mut conn = pool.acquire().await?;
    let Some(id) = lookup(&mut conn, &normalize_name(name)).await? else {
        return Ok(None);
    };
    let row = sqlx::query_as(
        "SELECT participant_id, name_key, display_name, created_at FROM participants WHERE participant_id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Map `alias` onto an existing participant, so later rows under the new
/// name land on the same identity. Re-pointing an existing alias is allowed;
/// shadowing another participant's own name is not.
pub async fn add_alias(pool: &SqlitePool, alias: &str, participant_name: &str, now: DateTime<Utc>) -> Result<i64> {
    let alias_key = normalize_name(alias);
    if alias_key.is_empty() {
        return Err(AppError::Validation("alias must not be empty".to_string()));
    }

    let target = find(pool, participant_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("participant {participant_name}")))?;

    let shadowed: Option<(i64,)> = sqlx::query_as("SELECT participant_id FROM participants WHERE name_key = ?")
        .bind(&alias_key)
        .fetch_optional(pool)
        .await?;
    if let Some((other,)) = shadowed {
        if other != target.participant_id {
            return Err(AppError::Validation(format!(
                "alias {alias_key} is already the name of participant {other}"
            )));
        }
    }

    sqlx::query(
        r#"
        INSERT INTO participant_aliases (alias_key, participant_id, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT(alias_key) DO UPDATE SET participant_id = excluded.participant_id
        "#,
    )
    .bind(&alias_key)
    .bind(target.participant_id)
    .bind(now.timestamp())
    .execute(pool)
    .await?;

    info!(
        alias = %alias_key,
        participant_id = target.participant_id,
        "Alias {alias_key} now maps to {}",
        target.display_name
    );
    Ok(target.participant_id)
}
