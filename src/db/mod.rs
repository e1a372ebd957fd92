pub mod job_runs;
pub mod models;
pub mod queries;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::Result;

/// Open (creating if missing) the SQLite database and apply migrations.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite:{db_path}?mode=rwc"))
        .await?;
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {db_path}");
    Ok(pool)
}

/// Single-connection in-memory database for tests. The connection is never
/// recycled, so the schema lives for the pool's lifetime.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    pool
}
