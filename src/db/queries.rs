//! Shared read queries over the contest, pick and odds stores.

use std::collections::HashMap;

use sqlx::{Executor, Sqlite};
use tracing::warn;

use crate::db::models::{ContestRow, OddsRow, PickDetailRow};
use crate::error::Result;
use crate::types::{Contest, EntityCode};

const CONTEST_COLUMNS: &str = "contest_id, provider_id, season, period, home_entity, away_entity, \
     start_time, status, home_score, away_score, winner, updated_at";

const PICK_DETAIL_SELECT: &str = r#"
    SELECT p.pick_id, p.participant_id, pa.display_name, p.season, p.period,
           p.entity_code, p.source,
           r.contest_id, r.is_valid, r.is_locked, r.survived, r.overridden
    FROM picks p
    JOIN participants pa ON pa.participant_id = p.participant_id
    LEFT JOIN pick_results r ON r.pick_id = p.pick_id
"#;

pub async fn contests_for_period<'e, E>(exec: E, season: i64, period: i64) -> Result<Vec<Contest>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<ContestRow> = sqlx::query_as(&format!(
        "SELECT {CONTEST_COLUMNS} FROM contests WHERE season = ? AND period = ? ORDER BY start_time, contest_id"
    ))
    .bind(season)
    .bind(period)
    .fetch_all(exec)
    .await?;
    Ok(into_contests(rows))
}

pub async fn contests_for_season<'e, E>(exec: E, season: i64) -> Result<Vec<Contest>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<ContestRow> = sqlx::query_as(&format!(
        "SELECT {CONTEST_COLUMNS} FROM contests WHERE season = ? ORDER BY period, start_time, contest_id"
    ))
    .bind(season)
    .fetch_all(exec)
    .await?;
    Ok(into_contests(rows))
}

fn into_contests(rows: Vec<ContestRow>) -> Vec<Contest> {
    rows.into_iter()
        .filter_map(|row| match row.into_contest() {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("Skipping unreadable contest row: {e}");
                None
            }
        })
        .collect()
}

pub async fn pick_details_for_season<'e, E>(exec: E, season: i64) -> Result<Vec<PickDetailRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as(&format!(
        "{PICK_DETAIL_SELECT} WHERE p.season = ? ORDER BY p.period, pa.display_name"
    ))
    .bind(season)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

pub async fn pick_details_for_period<'e, E>(exec: E, season: i64, period: i64) -> Result<Vec<PickDetailRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as(&format!(
        "{PICK_DETAIL_SELECT} WHERE p.season = ? AND p.period = ? ORDER BY pa.display_name"
    ))
    .bind(season)
    .bind(period)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Odds
// ---------------------------------------------------------------------------

/// Pregame win probabilities keyed by `(contest_id, side)`.
/// Empty when the odds provider is unconfigured.
#[derive(Debug, Clone, Default)]
pub struct OddsBook {
    quotes: HashMap<(i64, EntityCode), f64>,
}

impl OddsBook {
    pub fn insert(&mut self, contest_id: i64, side: EntityCode, win_probability: f64) {
        self.quotes.insert((contest_id, side), win_probability);
    }

    pub fn get(&self, contest_id: i64, side: EntityCode) -> Option<f64> {
        self.quotes.get(&(contest_id, side)).copied()
    }
}

pub async fn odds_for_season<'e, E>(exec: E, season: i64) -> Result<OddsBook>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<OddsRow> = sqlx::query_as(
        r#"
        SELECT o.contest_id, o.entity_code, o.win_probability, o.fetched_at
        FROM odds_quotes o
        JOIN contests c ON c.contest_id = o.contest_id
        WHERE c.season = ?
        "#,
    )
    .bind(season)
    .fetch_all(exec)
    .await?;

    let mut book = OddsBook::default();
    for row in rows {
        if let Some(side) = EntityCode::from_abbr(&row.entity_code) {
            book.insert(row.contest_id, side, row.win_probability);
        }
    }
    Ok(book)
}
