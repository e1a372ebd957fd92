//! Liveness view over `job_runs` for the /health endpoint, plus per-provider
//! latency percentiles.

use axum::{extract::State, Json};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::api::routes::ApiState;
use crate::config::JOB_STALE_AFTER_SECS;
use crate::db::job_runs::{self, JobRun};
use crate::error::AppError;
use crate::providers::ProviderLatency;

#[derive(Debug, Clone, Serialize)]
pub struct JobHealth {
    pub job_name: String,
    pub status: String,
    pub last_success_at: Option<DateTime<Utc>>,
    /// No success within the staleness window (or never).
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok` when no job is stale, `degraded` otherwise.
    pub status: &'static str,
    pub jobs: Vec<JobHealth>,
}

pub fn job_health(runs: Vec<JobRun>, now: DateTime<Utc>, stale_after: Duration) -> HealthResponse {
    let jobs: Vec<JobHealth> = runs
        .into_iter()
        .map(|run| JobHealth {
            stale: run.last_success_at.map_or(true, |t| now - t > stale_after),
            job_name: run.job_name,
            status: run.status,
            last_success_at: run.last_success_at,
        })
        .collect();
    let status = if jobs.iter().any(|j| j.stale) { "degraded" } else { "ok" };
    HealthResponse { status, jobs }
}

pub async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let runs = job_runs::all(&state.pool).await?;
    Ok(Json(job_health(runs, Utc::now(), Duration::seconds(JOB_STALE_AFTER_SECS))))
}

pub async fn get_stats_latency(State(state): State<ApiState>) -> Json<Vec<ProviderLatency>> {
    Json(state.latency.snapshot())
}
