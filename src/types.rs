use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Closed set of selectable entities (NFL franchises).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityCode {
    Ari, Atl, Bal, Buf, Car, Chi, Cin, Cle,
    Dal, Den, Det, Gb, Hou, Ind, Jax, Kc,
    Lac, Lar, Lv, Mia, Min, Ne, No, Nyg,
    Nyj, Phi, Pit, Sea, Sf, Tb, Ten, Was,
}

/// `(code, canonical abbreviation, full name)`.
const ENTITIES: [(EntityCode, &str, &str); 32] = [
    (EntityCode::Ari, "ARI", "Arizona Cardinals"),
    (EntityCode::Atl, "ATL", "Atlanta Falcons"),
    (EntityCode::Bal, "BAL", "Baltimore Ravens"),
    (EntityCode::Buf, "BUF", "Buffalo Bills"),
    (EntityCode::Car, "CAR", "Carolina Panthers"),
    (EntityCode::Chi, "CHI", "Chicago Bears"),
    (EntityCode::Cin, "CIN", "Cincinnati Bengals"),
    (EntityCode::Cle, "CLE", "Cleveland Browns"),
    (EntityCode::Dal, "DAL", "Dallas Cowboys"),
    (EntityCode::Den, "DEN", "Denver Broncos"),
    (EntityCode::Det, "DET", "Detroit Lions"),
    (EntityCode::Gb, "GB", "Green Bay Packers"),
    (EntityCode::Hou, "HOU", "Houston Texans"),
    (EntityCode::Ind, "IND", "Indianapolis Colts"),
    (EntityCode::Jax, "JAX", "Jacksonville Jaguars"),
    (EntityCode::Kc, "KC", "Kansas City Chiefs"),
    (EntityCode::Lac, "LAC", "Los Angeles Chargers"),
    (EntityCode::Lar, "LAR", "Los Angeles Rams"),
    (EntityCode::Lv, "LV", "Las Vegas Raiders"),
    (EntityCode::Mia, "MIA", "Miami Dolphins"),
    (EntityCode::Min, "MIN", "Minnesota Vikings"),
    (EntityCode::Ne, "NE", "New England Patriots"),
    (EntityCode::No, "NO", "New Orleans Saints"),
    (EntityCode::Nyg, "NYG", "New York Giants"),
    (EntityCode::Nyj, "NYJ", "New York Jets"),
    (EntityCode::Phi, "PHI", "Philadelphia Eagles"),
    (EntityCode::Pit, "PIT", "Pittsburgh Steelers"),
    (EntityCode::Sea, "SEA", "Seattle Seahawks"),
    (EntityCode::Sf, "SF", "San Francisco 49ers"),
    (EntityCode::Tb, "TB", "Tampa Bay Buccaneers"),
    (EntityCode::Ten, "TEN", "Tennessee Titans"),
    (EntityCode::Was, "WAS", "Washington Commanders"),
];

/// Legacy and provider-specific abbreviations.
const CODE_ALIASES: &[(&str, EntityCode)] = &[
    ("WSH", EntityCode::Was),
    ("JAC", EntityCode::Jax),
    ("LA", EntityCode::Lar),
    ("STL", EntityCode::Lar),
    ("OAK", EntityCode::Lv),
    ("SD", EntityCode::Lac),
    ("GNB", EntityCode::Gb),
    ("KAN", EntityCode::Kc),
    ("NWE", EntityCode::Ne),
    ("NOR", EntityCode::No),
    ("SFO", EntityCode::Sf),
    ("TAM", EntityCode::Tb),
];

impl EntityCode {
    pub fn as_str(self) -> &'static str {
        ENTITIES
            .iter()
            .find(|(code, _, _)| *code == self)
            .map(|(_, abbr, _)| *abbr)
            .unwrap_or("???")
    }

    /// Case-insensitive abbreviation lookup, including legacy aliases.
    pub fn from_abbr(s: &str) -> Option<EntityCode> {
        let upper = s.trim().to_ascii_uppercase();
        ENTITIES
            .iter()
            .find(|(_, abbr, _)| *abbr == upper)
            .map(|(code, _, _)| *code)
            .or_else(|| {
                CODE_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == upper)
                    .map(|(_, code)| *code)
            })
    }

    /// Lookup by franchise full name (odds feeds use these).
    pub fn from_full_name(s: &str) -> Option<EntityCode> {
        let s = s.trim();
        ENTITIES
            .iter()
            .find(|(_, _, name)| name.eq_ignore_ascii_case(s))
            .map(|(code, _, _)| *code)
    }
}

impl std::fmt::Display for EntityCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of validating one raw pick cell at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Empty cell: no selection yet.
    Blank,
    /// Non-empty but not in the closed code set. Stored upper-cased and
    /// flagged by the evaluator, never rejected at ingestion.
    Unknown(String),
    Entity(EntityCode),
}

impl Selection {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Selection::Blank;
        }
        match EntityCode::from_abbr(trimmed) {
            Some(code) => Selection::Entity(code),
            None => Selection::Unknown(trimmed.to_ascii_uppercase()),
        }
    }

    /// Value written to `picks.entity_code`.
    pub fn stored_code(&self) -> Option<String> {
        match self {
            Selection::Blank => None,
            Selection::Unknown(raw) => Some(raw.clone()),
            Selection::Entity(code) => Some(code.as_str().to_string()),
        }
    }

    pub fn from_stored(code: Option<&str>) -> Self {
        code.map(Selection::parse).unwrap_or(Selection::Blank)
    }

    pub fn entity(&self) -> Option<EntityCode> {
        match self {
            Selection::Entity(code) => Some(*code),
            _ => None,
        }
    }
}

/// Participant identity key: trimmed, inner whitespace collapsed, case-folded.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Display form: trimmed with inner whitespace collapsed, case preserved.
pub fn clean_display_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Contests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestStatus {
    Scheduled,
    InProgress,
    /// Terminal. No sync may move a contest out of this state.
    Final,
}

impl ContestStatus {
    pub fn rank(self) -> u8 {
        match self {
            ContestStatus::Scheduled => 0,
            ContestStatus::InProgress => 1,
            ContestStatus::Final => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(ContestStatus::Scheduled),
            "in_progress" => Some(ContestStatus::InProgress),
            "final" => Some(ContestStatus::Final),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContestStatus::Scheduled => "scheduled",
            ContestStatus::InProgress => "in_progress",
            ContestStatus::Final => "final",
        };
        write!(f, "{s}")
    }
}

/// Natural key of a contest. Stable across provider id churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContestKey {
    pub season: i64,
    pub period: i64,
    pub home: EntityCode,
    pub away: EntityCode,
}

/// One contest as reported by a score provider.
#[derive(Debug, Clone)]
pub struct ContestUpdate {
    pub key: ContestKey,
    pub provider_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub status: ContestStatus,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub winner: Option<EntityCode>,
}

/// A stored contest.
#[derive(Debug, Clone, Serialize)]
pub struct Contest {
    pub contest_id: i64,
    pub provider_id: Option<String>,
    pub key: ContestKey,
    pub start_time: DateTime<Utc>,
    pub status: ContestStatus,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub winner: Option<EntityCode>,
}

impl Contest {
    pub fn involves(&self, code: EntityCode) -> bool {
        self.key.home == code || self.key.away == code
    }

    pub fn opponent_of(&self, code: EntityCode) -> Option<EntityCode> {
        if self.key.home == code {
            Some(self.key.away)
        } else if self.key.away == code {
            Some(self.key.home)
        } else {
            None
        }
    }

    pub fn score_of(&self, code: EntityCode) -> Option<i64> {
        if self.key.home == code {
            self.home_score
        } else if self.key.away == code {
            self.away_score
        } else {
            None
        }
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_time
    }

    /// Final with a known outcome (a winner, or both scores for a tie), or
    /// scores present and the game started more than `stale_after` ago.
    /// The second branch covers upstream feeds that never flip to final.
    pub fn is_resolvable(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let scored = self.home_score.is_some() && self.away_score.is_some();
        if self.status == ContestStatus::Final {
            return scored || self.winner.is_some();
        }
        scored && now - self.start_time > stale_after
    }

    /// True when resolvable only through the stale-game fallback.
    pub fn is_stale_resolution(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.status != ContestStatus::Final && self.is_resolvable(now, stale_after)
    }

    /// Winner as stored, else derived from scores. `None` on a tie.
    pub fn resolved_winner(&self) -> Option<EntityCode> {
        if self.winner.is_some() {
            return self.winner;
        }
        match (self.home_score, self.away_score) {
            (Some(h), Some(a)) if h > a => Some(self.key.home),
            (Some(h), Some(a)) if a > h => Some(self.key.away),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Picks and odds
// ---------------------------------------------------------------------------

/// One raw row from the pick source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPickRow {
    pub participant_name: String,
    pub period: i64,
    pub raw_code: String,
}

/// Pregame win probability for one side of a contest.
#[derive(Debug, Clone, PartialEq)]
pub struct OddsQuote {
    pub contest: ContestKey,
    pub side: EntityCode,
    pub win_probability: f64,
}

// ---------------------------------------------------------------------------
// Job metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    /// Completed, but some rows or contests were skipped.
    Partial,
    Error,
    /// Nothing to do (e.g. provider unconfigured).
    Skipped,
}

impl JobStatus {
    /// Whether this status counts as a successful run for staleness checks.
    pub fn is_success(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Partial | JobStatus::Skipped)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Partial => "partial",
            JobStatus::Error => "error",
            JobStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

pub fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
