use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use crate::db::models::JobRunRow;
use crate::error::Result;
use crate::types::{from_unix, JobStatus};

/// Run metadata for one batch job, read by callers for staleness detection.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub job_name: String,
    pub last_attempt_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub status: String,
    pub message: String,
}

impl From<JobRunRow> for JobRun {
    fn from(row: JobRunRow) -> Self {
        Self {
            job_name: row.job_name,
            last_attempt_at: from_unix(row.last_attempt_at),
            last_success_at: row.last_success_at.map(from_unix),
            status: row.status,
            message: row.message,
        }
    }
}

/// Mark a job as started. Leaves `last_success_at` untouched.
pub async fn record_attempt(pool: &sqlx::SqlitePool, job_name: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO job_runs (job_name, last_attempt_at, status, message)
        VALUES (?, ?, ?, '')
        ON CONFLICT(job_name) DO UPDATE SET
            last_attempt_at = excluded.last_attempt_at,
            status = excluded.status
        "#,
    )
    .bind(job_name)
    .bind(now.timestamp())
    .bind(JobStatus::Running.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_finish(
    pool: &sqlx::SqlitePool,
    job_name: &str,
    status: JobStatus,
    message: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let success_at = status.is_success().then(|| now.timestamp());
    sqlx::query(
        r#"
        INSERT INTO job_runs (job_name, last_attempt_at, last_success_at, status, message)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(job_name) DO UPDATE SET
            last_success_at = COALESCE(excluded.last_success_at, job_runs.last_success_at),
            status = excluded.status,
            message = excluded.message
        "#,
    )
    .bind(job_name)
    .bind(now.timestamp())
    .bind(success_at)
    .bind(status.to_string())
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the outcome of a job without letting a metadata write failure
/// mask the job's own result.
pub async fn finish_logged(pool: &sqlx::SqlitePool, job_name: &str, status: JobStatus, message: &str) {
    if status == JobStatus::Error {
        error!(job = job_name, "{job_name} failed: {message}");
    }
    if let Err(e) = record_finish(pool, job_name, status, message, Utc::now()).await {
        warn!(job = job_name, "Failed to record job outcome: {e}");
    }
}

pub async fn all(pool: &sqlx::SqlitePool) -> Result<Vec<JobRun>> {
    let rows: Vec<JobRunRow> = sqlx::query_as(
        "SELECT job_name, last_attempt_at, last_success_at, status, message FROM job_runs ORDER BY job_name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(JobRun::from).collect())
}
