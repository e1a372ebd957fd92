use crate::error::{AppError, Result};

pub const SCORES_API_URL: &str = "https://site.api.espn.com/apis/site/v2/sports/football/nfl";
pub const ODDS_API_URL: &str = "https://api.the-odds-api.com/v4";

/// Scores present but status still non-final after this many hours → resolvable.
pub const DEFAULT_STALE_GAME_HOURS: i64 = 4;

/// Entities per future period counted by the survivability gauge.
pub const DEFAULT_SURVIVABILITY_TOP_K: usize = 5;

/// Regular-season length; periods past this are never considered.
pub const DEFAULT_LAST_PERIOD: i64 = 18;

/// Period pipeline (sync + ingest → evaluate) interval (seconds).
pub const PIPELINE_INTERVAL_SECS: u64 = 600;

/// Odds refresh interval (seconds). Odds APIs are quota-limited.
pub const ODDS_INTERVAL_SECS: u64 = 6 * 3_600;

/// How often the pre-lock watcher checks for an imminent kickoff (seconds).
pub const PRE_LOCK_CHECK_SECS: u64 = 60;

/// A job with no success for this long is reported stale by /health.
pub const JOB_STALE_AFTER_SECS: i64 = 2 * 3_600;

/// Max concurrent provider fetches during a backfill or schedule refresh.
pub const BACKFILL_CONCURRENCY: usize = 4;

/// Future periods whose schedules are kept synced for odds and the
/// survivability gauge.
pub const DEFAULT_SCHEDULE_LOOKAHEAD: i64 = 17;

/// Job names recorded in `job_runs`.
pub mod jobs {
    pub const SYNC_CONTESTS: &str = "sync_contests";
    pub const INGEST_PICKS: &str = "ingest_picks";
    pub const EVALUATE_RESULTS: &str = "evaluate_results";
    pub const UPDATE_ODDS: &str = "update_odds";
    pub const SYNC_SCHEDULE: &str = "sync_schedule";
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Season processed by scheduled jobs (SEASON)
    pub season: i64,
    /// Final period of the season (LAST_PERIOD)
    pub last_period: i64,
    /// Stale-game fallback threshold in hours (STALE_GAME_HOURS)
    pub stale_game_hours: i64,
    /// Top-K entities per period for the survivability gauge (SURVIVABILITY_TOP_K)
    pub survivability_top_k: usize,
    /// Upcoming periods synced by the outlook refresh (SCHEDULE_LOOKAHEAD)
    pub schedule_lookahead: i64,
    pub scores_api_url: String,
    pub odds_api_url: String,
    /// No key → odds provider unconfigured; every consumer runs in no-odds mode.
    pub odds_api_key: Option<String>,
    /// Sheet values endpoint for the pick source (PICK_SHEET_URL)
    pub pick_sheet_url: Option<String>,
    /// Per-call timeout for every external provider (PROVIDER_TIMEOUT_SECS)
    pub provider_timeout_secs: u64,
    pub pipeline_interval_secs: u64,
    pub odds_interval_secs: u64,
    /// Extra ingestion this many minutes ahead of the next kickoff (PRE_LOCK_LEAD_MINS)
    pub pre_lock_lead_mins: i64,
    /// TTL for cached odds responses (ODDS_CACHE_SECS)
    pub odds_cache_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "survivor.db".to_string()),
            api_port: parse_var("API_PORT", 3000)?,
            season: parse_var("SEASON", 2025)?,
            last_period: parse_var("LAST_PERIOD", DEFAULT_LAST_PERIOD)?,
            stale_game_hours: parse_var("STALE_GAME_HOURS", DEFAULT_STALE_GAME_HOURS)?,
            survivability_top_k: parse_var("SURVIVABILITY_TOP_K", DEFAULT_SURVIVABILITY_TOP_K)?,
            schedule_lookahead: parse_var("SCHEDULE_LOOKAHEAD", DEFAULT_SCHEDULE_LOOKAHEAD)?,
            scores_api_url: std::env::var("SCORES_API_URL")
                .unwrap_or_else(|_| SCORES_API_URL.to_string()),
            odds_api_url: std::env::var("ODDS_API_URL").unwrap_or_else(|_| ODDS_API_URL.to_string()),
            odds_api_key: non_empty_var("ODDS_API_KEY"),
            pick_sheet_url: non_empty_var("PICK_SHEET_URL"),
            provider_timeout_secs: parse_var("PROVIDER_TIMEOUT_SECS", 30)?,
            pipeline_interval_secs: parse_var("PIPELINE_INTERVAL_SECS", PIPELINE_INTERVAL_SECS)?,
            odds_interval_secs: parse_var("ODDS_INTERVAL_SECS", ODDS_INTERVAL_SECS)?,
            pre_lock_lead_mins: parse_var("PRE_LOCK_LEAD_MINS", 30)?,
            odds_cache_secs: parse_var("ODDS_CACHE_SECS", 300)?,
        })
    }

    pub fn stale_game_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stale_game_hours)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "survivor.db".to_string(),
            api_port: 3000,
            season: 2025,
            last_period: DEFAULT_LAST_PERIOD,
            stale_game_hours: DEFAULT_STALE_GAME_HOURS,
            survivability_top_k: DEFAULT_SURVIVABILITY_TOP_K,
            schedule_lookahead: DEFAULT_SCHEDULE_LOOKAHEAD,
            scores_api_url: SCORES_API_URL.to_string(),
            odds_api_url: ODDS_API_URL.to_string(),
            odds_api_key: None,
            pick_sheet_url: None,
            provider_timeout_secs: 30,
            pipeline_interval_secs: PIPELINE_INTERVAL_SECS,
            odds_interval_secs: ODDS_INTERVAL_SECS,
            pre_lock_lead_mins: 30,
            odds_cache_secs: 300,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} must be a valid number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
