//! External collaborators: score provider, odds provider and pick source.
//! Each is consumed through a trait so jobs can run against fakes in tests.

pub mod cache;
pub mod espn;
pub mod latency;
pub mod odds_api;
pub mod sheet;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::Result;
use crate::types::{ContestUpdate, OddsQuote, RawPickRow};

pub use latency::{LatencyStats, ProviderLatency};

#[async_trait]
pub trait ScoreProvider: Send + Sync {
    /// Schedule, scores and status for every contest of a period.
    /// Status is known to lag; callers must not trust it alone.
    async fn get_schedule_and_scores(&self, season: i64, period: i64) -> Result<Vec<ContestUpdate>>;

    async fn get_current_period(&self, season: i64) -> Result<i64>;
}

#[async_trait]
pub trait OddsProvider: Send + Sync {
    /// Pregame win probability per contest side. Contests are named by
    /// natural key; the board may include games of later periods, which the
    /// caller matches by home and away.
    async fn get_win_probabilities(&self, season: i64, period: i64) -> Result<Vec<OddsQuote>>;
}

#[async_trait]
pub trait PickSource: Send + Sync {
    /// Raw `(participant, period, code-or-blank)` rows for a season.
    async fn fetch_rows(&self, season: i64) -> Result<Vec<RawPickRow>>;
}

/// Every external collaborator a job may need. Odds and the pick source are
/// optional; jobs that need a missing one record a skipped run.
#[derive(Clone)]
pub struct Providers {
    pub scores: Arc<dyn ScoreProvider>,
    pub odds: Option<Arc<dyn OddsProvider>>,
    pub picks: Option<Arc<dyn PickSource>>,
    pub latency: Arc<LatencyStats>,
}

impl Providers {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.provider_timeout_secs))
            .build()?;
        let latency = Arc::new(LatencyStats::new());

        let scores: Arc<dyn ScoreProvider> = Arc::new(espn::EspnScoreProvider::new(
            client.clone(),
            cfg.scores_api_url.clone(),
            Arc::clone(&latency),
        ));

        let odds = cfg.odds_api_key.as_ref().map(|key| {
            Arc::new(odds_api::OddsApiProvider::new(
                client.clone(),
                cfg.odds_api_url.clone(),
                key.clone(),
                Duration::from_secs(cfg.odds_cache_secs),
                Arc::clone(&latency),
            )) as Arc<dyn OddsProvider>
        });

        let picks = cfg.pick_sheet_url.as_ref().map(|url| {
            Arc::new(sheet::SheetPickSource::new(client.clone(), url.clone(), Arc::clone(&latency)))
                as Arc<dyn PickSource>
        });

        Ok(Self { scores, odds, picks, latency })
    }
}
