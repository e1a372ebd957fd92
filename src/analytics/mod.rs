//! Read-only derived views over evaluated results and (optional) odds.
//!
//! Every view is a pure function over a [`SeasonSnapshot`]; only the loader
//! touches the database. Views that need odds return an explicit no-data
//! variant instead of zeros when coverage is missing.

pub mod attribution;
pub mod chaos;
pub mod reports;
pub mod survivability;
pub mod upset;

use sqlx::SqlitePool;

use crate::db::models::PickDetailRow;
use crate::db::queries::{self, OddsBook};
use crate::error::Result;
use crate::types::Contest;

pub use attribution::{elimination_attribution, AttributionEntry};
pub use chaos::{chaos_score, ChaosReport};
pub use survivability::{forward_survivability, SurvivabilityReport};
pub use upset::{detect_upset, UpsetReport};

/// Everything the analytics views read for one season.
#[derive(Debug, Clone, Default)]
pub struct SeasonSnapshot {
    pub season: i64,
    pub contests: Vec<Contest>,
    pub picks: Vec<PickDetailRow>,
    pub odds: OddsBook,
}

impl SeasonSnapshot {
    pub async fn load(pool: &SqlitePool, season: i64) -> Result<Self> {
        let contests = queries::contests_for_season(pool, season).await?;
        let picks = queries::pick_details_for_season(pool, season).await?;
        let odds = queries::odds_for_season(pool, season).await?;
        Ok(Self { season, contests, picks, odds })
    }

    pub fn contests_in(&self, period: i64) -> Vec<&Contest> {
        self.contests.iter().filter(|c| c.key.period == period).collect()
    }

    pub fn picks_in(&self, period: i64) -> Vec<&PickDetailRow> {
        self.picks.iter().filter(|p| p.period == period).collect()
    }

    pub fn contest(&self, contest_id: i64) -> Option<&Contest> {
        self.contests.iter().find(|c| c.contest_id == contest_id)
    }
}
