/// Database row types matching the schema in migrations/.
/// Used by sqlx for typed queries.
use crate::error::{AppError, Result};
use crate::types::{from_unix, Contest, ContestKey, ContestStatus, EntityCode};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ParticipantRow {
    pub participant_id: i64,
    pub name_key: String,
    pub display_name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContestRow {
    pub contest_id: i64,
    pub provider_id: Option<String>,
    pub season: i64,
    pub period: i64,
    pub home_entity: String,
    pub away_entity: String,
    pub start_time: i64,
    pub status: String,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub winner: Option<String>,
    pub updated_at: i64,
}

impl ContestRow {
    pub fn into_contest(self) -> Result<Contest> {
        let home = EntityCode::from_abbr(&self.home_entity).ok_or_else(|| {
            AppError::Validation(format!("contest {} has unknown home entity {}", self.contest_id, self.home_entity))
        })?;
        let away = EntityCode::from_abbr(&self.away_entity).ok_or_else(|| {
            AppError::Validation(format!("contest {} has unknown away entity {}", self.contest_id, self.away_entity))
        })?;
        let status = ContestStatus::parse(&self.status).ok_or_else(|| {
            AppError::Validation(format!("contest {} has unknown status {}", self.contest_id, self.status))
        })?;
        Ok(Contest {
            contest_id: self.contest_id,
            provider_id: self.provider_id,
            key: ContestKey { season: self.season, period: self.period, home, away },
            start_time: from_unix(self.start_time),
            status,
            home_score: self.home_score,
            away_score: self.away_score,
            winner: self.winner.as_deref().and_then(EntityCode::from_abbr),
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PickResultRow {
    pub pick_id: i64,
    pub contest_id: Option<i64>,
    pub is_valid: bool,
    pub is_locked: bool,
    pub survived: Option<bool>,
    pub overridden: bool,
    pub updated_at: i64,
}

/// Pick joined with its participant and (optional) result.
/// The read model shared by the evaluator and the analytics engine.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PickDetailRow {
    pub pick_id: i64,
    pub participant_id: i64,
    pub display_name: String,
    pub season: i64,
    pub period: i64,
    pub entity_code: Option<String>,
    pub source: String,
    pub contest_id: Option<i64>,
    pub is_valid: Option<bool>,
    pub is_locked: Option<bool>,
    pub survived: Option<bool>,
    pub overridden: Option<bool>,
}

impl PickDetailRow {
    /// Missing result row reads as a fresh, valid, unlocked result.
    pub fn is_valid(&self) -> bool {
        self.is_valid.unwrap_or(true)
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked.unwrap_or(false)
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden.unwrap_or(false)
    }

    /// Eliminating outcome: invalid selection or a lost contest.
    pub fn is_elimination(&self) -> bool {
        !self.is_valid() || self.survived == Some(false)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OddsRow {
    pub contest_id: i64,
    pub entity_code: String,
    pub win_probability: f64,
    pub fetched_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRunRow {
    pub job_name: String,
    pub last_attempt_at: i64,
    pub last_success_at: Option<i64>,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResultOverrideRow {
    pub override_id: i64,
    pub pick_id: i64,
    pub actor: String,
    pub reason: String,
    pub previous_valid: bool,
    pub previous_survived: Option<bool>,
    pub new_valid: bool,
    pub new_survived: Option<bool>,
    pub created_at: i64,
}
