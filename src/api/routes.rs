use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::analytics::reports::{
    consumed_entities, graveyard, participant_history, season_summary, survivors, GraveyardEntry,
    ParticipantHistory, SeasonSummary, SurvivorEntry,
};
use crate::analytics::{
    chaos_score, detect_upset, elimination_attribution, forward_survivability, AttributionEntry, ChaosReport,
    SeasonSnapshot, SurvivabilityReport, UpsetReport,
};
use crate::api::health::{get_health, get_stats_latency};
use crate::config::Config;
use crate::db::job_runs::{self, JobRun};
use crate::error::AppError;
use crate::evaluate::overrides::{overrides_for_pick, ResultOverride};
use crate::ingest::participants;
use crate::providers::LatencyStats;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub cfg: Config,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/seasons/:season/summary", get(get_season_summary))
        .route("/seasons/:season/participants/:name", get(get_participant))
        .route("/seasons/:season/graveyard", get(get_graveyard))
        .route("/seasons/:season/survivors", get(get_survivors))
        .route("/seasons/:season/analytics/attribution", get(get_attribution))
        .route("/seasons/:season/analytics/periods/:period/chaos", get(get_chaos))
        .route("/seasons/:season/analytics/periods/:period/upset", get(get_upset))
        .route(
            "/seasons/:season/analytics/participants/:name/survivability",
            get(get_survivability),
        )
        .route("/picks/:pick_id/overrides", get(get_pick_overrides))
        .route("/jobs", get(get_jobs))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SurvivabilityQuery {
    /// Defaults to the latest period the season has picks for.
    pub current_period: Option<i64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_season_summary(
    State(state): State<ApiState>,
    Path(season): Path<i64>,
) -> Result<Json<SeasonSummary>, AppError> {
    let snapshot = SeasonSnapshot::load(&state.pool, season).await?;
    let jobs = job_runs::all(&state.pool).await?;
    Ok(Json(season_summary(&snapshot, jobs)))
}

async fn get_participant(
    State(state): State<ApiState>,
    Path((season, name)): Path<(i64, String)>,
) -> Result<Json<ParticipantHistory>, AppError> {
    let participant = participants::find(&state.pool, &name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("participant {name:?}")))?;
    let snapshot = SeasonSnapshot::load(&state.pool, season).await?;
    Ok(Json(participant_history(
        &snapshot,
        participant.participant_id,
        &participant.display_name,
    )))
}

async fn get_graveyard(
    State(state): State<ApiState>,
    Path(season): Path<i64>,
) -> Result<Json<Vec<GraveyardEntry>>, AppError> {
    let snapshot = SeasonSnapshot::load(&state.pool, season).await?;
    Ok(Json(graveyard(&snapshot)))
}

async fn get_survivors(
    State(state): State<ApiState>,
    Path(season): Path<i64>,
) -> Result<Json<Vec<SurvivorEntry>>, AppError> {
    let snapshot = SeasonSnapshot::load(&state.pool, season).await?;
    Ok(Json(survivors(&snapshot)))
}

async fn get_attribution(
    State(state): State<ApiState>,
    Path(season): Path<i64>,
) -> Result<Json<Vec<AttributionEntry>>, AppError> {
    let snapshot = SeasonSnapshot::load(&state.pool, season).await?;
    Ok(Json(elimination_attribution(&snapshot.picks)))
}

async fn get_chaos(
    State(state): State<ApiState>,
    Path((season, period)): Path<(i64, i64)>,
) -> Result<Json<ChaosReport>, AppError> {
    let snapshot = SeasonSnapshot::load(&state.pool, season).await?;
    Ok(Json(chaos_score(&snapshot.picks_in(period), &snapshot.odds)))
}

async fn get_upset(
    State(state): State<ApiState>,
    Path((season, period)): Path<(i64, i64)>,
) -> Result<Json<UpsetReport>, AppError> {
    let snapshot = SeasonSnapshot::load(&state.pool, season).await?;
    Ok(Json(detect_upset(
        &snapshot.contests_in(period),
        &snapshot.picks_in(period),
        &snapshot.odds,
        Utc::now(),
        state.cfg.stale_game_threshold(),
    )))
}

async fn get_survivability(
    State(state): State<ApiState>,
    Path((season, name)): Path<(i64, String)>,
    Query(params): Query<SurvivabilityQuery>,
) -> Result<Json<SurvivabilityReport>, AppError> {
    let participant = participants::find(&state.pool, &name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("participant {name:?}")))?;
    let snapshot = SeasonSnapshot::load(&state.pool, season).await?;

    let current_period = params
        .current_period
        .unwrap_or_else(|| snapshot.picks.iter().map(|p| p.period).max().unwrap_or(0));
    let consumed = consumed_entities(&snapshot, participant.participant_id);

    Ok(Json(forward_survivability(
        &snapshot.contests,
        &snapshot.odds,
        &consumed,
        current_period,
        state.cfg.last_period,
        state.cfg.survivability_top_k,
    )))
}

async fn get_pick_overrides(
    State(state): State<ApiState>,
    Path(pick_id): Path<i64>,
) -> Result<Json<Vec<ResultOverride>>, AppError> {
    Ok(Json(overrides_for_pick(&state.pool, pick_id).await?))
}

async fn get_jobs(State(state): State<ApiState>) -> Result<Json<Vec<JobRun>>, AppError> {
    Ok(Json(job_runs::all(&state.pool).await?))
}
