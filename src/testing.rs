//! Fixtures and fake providers shared by unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::providers::{OddsProvider, PickSource, ScoreProvider};
use crate::types::{ContestKey, ContestStatus, ContestUpdate, EntityCode, OddsQuote, RawPickRow};

pub fn raw(name: &str, period: i64, code: &str) -> RawPickRow {
    RawPickRow {
        participant_name: name.to_string(),
        period,
        raw_code: code.to_string(),
    }
}

pub fn scheduled_update(
    season: i64,
    period: i64,
    home: EntityCode,
    away: EntityCode,
    start_time: DateTime<Utc>,
) -> ContestUpdate {
    ContestUpdate {
        key: ContestKey { season, period, home, away },
        provider_id: Some(format!("{season}-{period}-{home}-{away}")),
        start_time,
        status: ContestStatus::Scheduled,
        home_score: None,
        away_score: None,
        winner: None,
    }
}

pub fn final_update(
    season: i64,
    period: i64,
    home: EntityCode,
    away: EntityCode,
    start_time: DateTime<Utc>,
    home_score: i64,
    away_score: i64,
) -> ContestUpdate {
    let winner = match home_score.cmp(&away_score) {
        std::cmp::Ordering::Greater => Some(home),
        std::cmp::Ordering::Less => Some(away),
        std::cmp::Ordering::Equal => None,
    };
    ContestUpdate {
        status: ContestStatus::Final,
        home_score: Some(home_score),
        away_score: Some(away_score),
        winner,
        ..scheduled_update(season, period, home, away, start_time)
    }
}

pub fn quote(season: i64, period: i64, home: EntityCode, away: EntityCode, side: EntityCode, p: f64) -> OddsQuote {
    OddsQuote {
        contest: ContestKey { season, period, home, away },
        side,
        win_probability: p,
    }
}

fn unavailable() -> AppError {
    AppError::SourceUnavailable("fake provider down".to_string())
}

#[derive(Default)]
pub struct FakeScores {
    pub updates: Vec<ContestUpdate>,
    pub current_period: i64,
    pub fail: bool,
}

impl FakeScores {
    pub fn new(updates: Vec<ContestUpdate>, current_period: i64) -> Self {
        Self { updates, current_period, fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }
}

#[async_trait]
impl ScoreProvider for FakeScores {
    async fn get_schedule_and_scores(&self, season: i64, period: i64) -> Result<Vec<ContestUpdate>> {
        if self.fail {
            return Err(unavailable());
        }
        Ok(self
            .updates
            .iter()
            .filter(|u| u.key.season == season && u.key.period == period)
            .cloned()
            .collect())
    }

    async fn get_current_period(&self, _season: i64) -> Result<i64> {
        if self.fail {
            return Err(unavailable());
        }
        Ok(self.current_period)
    }
}

#[derive(Default)]
pub struct FakePicks {
    pub rows: Vec<RawPickRow>,
    pub fail: bool,
}

impl FakePicks {
    pub fn new(rows: Vec<RawPickRow>) -> Self {
        Self { rows, fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }
}

#[async_trait]
impl PickSource for FakePicks {
    async fn fetch_rows(&self, _season: i64) -> Result<Vec<RawPickRow>> {
        if self.fail {
            return Err(unavailable());
        }
        Ok(self.rows.clone())
    }
}

#[derive(Default)]
pub struct FakeOdds {
    pub quotes: Vec<OddsQuote>,
}

impl FakeOdds {
    pub fn new(quotes: Vec<OddsQuote>) -> Self {
        Self { quotes }
    }
}

#[async_trait]
impl OddsProvider for FakeOdds {
    async fn get_win_probabilities(&self, season: i64, _period: i64) -> Result<Vec<OddsQuote>> {
        Ok(self.quotes.iter().filter(|q| q.contest.season == season).cloned().collect())
    }
}
