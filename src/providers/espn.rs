use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::providers::{LatencyStats, ScoreProvider};
use crate::types::{ContestKey, ContestStatus, ContestUpdate, EntityCode};

/// Regular season on the ESPN scoreboard.
const SEASON_TYPE_REGULAR: u8 = 2;

/// ESPN public scoreboard adapter.
pub struct EspnScoreProvider {
    client: reqwest::Client,
    base_url: String,
    latency: Arc<LatencyStats>,
}

#[derive(Debug, Default)]
pub struct ParseStats {
    pub api_total: usize,
    pub rejected_malformed: usize,
    pub rejected_unknown_entity: usize,
}

#[derive(Debug, PartialEq)]
enum Rejection {
    Malformed(&'static str),
    UnknownEntity(String),
}

impl EspnScoreProvider {
    pub fn new(client: reqwest::Client, base_url: String, latency: Arc<LatencyStats>) -> Self {
        Self { client, base_url, latency }
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<serde_json::Value> {
        let started = Instant::now();
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::SourceUnavailable(format!("scoreboard request failed: {e}")))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AppError::SourceUnavailable(format!("scoreboard body unreadable: {e}")))?;
        self.latency.record_since("scoreboard", started);
        Ok(body)
    }
}

#[async_trait]
impl ScoreProvider for EspnScoreProvider {
    async fn get_schedule_and_scores(&self, season: i64, period: i64) -> Result<Vec<ContestUpdate>> {
        let url = format!("{}/scoreboard", self.base_url);
        let body = self
            .get_json(
                &url,
                &[
                    ("dates", season.to_string()),
                    ("seasontype", SEASON_TYPE_REGULAR.to_string()),
                    ("week", period.to_string()),
                ],
            )
            .await?;

        let (contests, stats) = parse_scoreboard(&body, season, period)?;
        info!(
            season,
            period,
            total = stats.api_total,
            parsed = contests.len(),
            malformed = stats.rejected_malformed,
            unknown_entity = stats.rejected_unknown_entity,
            "Scoreboard fetched: {} contests for season {season} period {period}",
            contests.len(),
        );
        Ok(contests)
    }

    async fn get_current_period(&self, season: i64) -> Result<i64> {
        let url = format!("{}/scoreboard", self.base_url);
        let body = self.get_json(&url, &[("dates", season.to_string())]).await?;
        body.get("week")
            .and_then(|w| w.get("number"))
            .and_then(|n| n.as_i64())
            .ok_or_else(|| AppError::SourceUnavailable("scoreboard response has no week.number".to_string()))
    }
}

/// Parse a scoreboard payload. A malformed event is skipped and counted;
/// it never blocks its siblings. A payload without an `events` array is a
/// source failure.
pub fn parse_scoreboard(
    body: &serde_json::Value,
    season: i64,
    period: i64,
) -> Result<(Vec<ContestUpdate>, ParseStats)> {
    let events = body
        .get("events")
        .and_then(|e| e.as_array())
        .ok_or_else(|| AppError::SourceUnavailable("scoreboard response has no events array".to_string()))?;

    let mut stats = ParseStats {
        api_total: events.len(),
        ..ParseStats::default()
    };
    let mut contests = Vec::with_capacity(events.len());

    for event in events {
        match parse_event(event, season, period) {
            Ok(c) => contests.push(c),
            Err(Rejection::Malformed(why)) => {
                stats.rejected_malformed += 1;
                let id = event.get("id").and_then(|i| i.as_str()).unwrap_or("?");
                warn!(event_id = id, "Skipping malformed scoreboard event: {why}");
            }
            Err(Rejection::UnknownEntity(abbr)) => {
                stats.rejected_unknown_entity += 1;
                warn!("Skipping scoreboard event with unknown entity {abbr}");
            }
        }
    }

    Ok((contests, stats))
}

fn parse_event(event: &serde_json::Value, season: i64, period: i64) -> std::result::Result<ContestUpdate, Rejection> {
    let provider_id = event.get("id").and_then(|i| i.as_str()).map(|s| s.to_string());

    let start_time = event
        .get("date")
        .and_then(|d| d.as_str())
        .and_then(parse_start_time)
        .ok_or(Rejection::Malformed("missing or unparseable date"))?;

    let competition = event
        .get("competitions")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or(Rejection::Malformed("no competitions"))?;

    let competitors = competition
        .get("competitors")
        .and_then(|c| c.as_array())
        .filter(|a| a.len() == 2)
        .ok_or(Rejection::Malformed("expected exactly two competitors"))?;

    let home_c = pick_side(competitors, "home", 0);
    let away_c = pick_side(competitors, "away", 1);

    let home = competitor_entity(home_c)?;
    let away = competitor_entity(away_c)?;

    let status_type = competition
        .get("status")
        .or_else(|| event.get("status"))
        .and_then(|s| s.get("type"));
    let status = parse_status(status_type);

    let (home_score, away_score) = if status == ContestStatus::Scheduled {
        (None, None)
    } else {
        (competitor_score(home_c), competitor_score(away_c))
    };

    let winner = match (status, home_score, away_score) {
        (ContestStatus::Final, Some(h), Some(a)) if h > a => Some(home),
        (ContestStatus::Final, Some(h), Some(a)) if a > h => Some(away),
        _ => None,
    };

    debug!(?provider_id, %home, %away, %status, "parsed scoreboard event");

    Ok(ContestUpdate {
        key: ContestKey { season, period, home, away },
        provider_id,
        start_time,
        status,
        home_score,
        away_score,
        winner,
    })
}

/// Competitor flagged `homeAway`, falling back to list position.
fn pick_side<'a>(competitors: &'a [serde_json::Value], home_away: &str, fallback: usize) -> &'a serde_json::Value {
    competitors
        .iter()
        .find(|c| c.get("homeAway").and_then(|h| h.as_str()) == Some(home_away))
        .unwrap_or(&competitors[fallback])
}

fn competitor_entity(c: &serde_json::Value) -> std::result::Result<EntityCode, Rejection> {
    let abbr = c
        .get("team")
        .and_then(|t| t.get("abbreviation"))
        .and_then(|a| a.as_str())
        .ok_or(Rejection::Malformed("competitor without team abbreviation"))?;
    EntityCode::from_abbr(abbr).ok_or_else(|| Rejection::UnknownEntity(abbr.to_string()))
}

fn competitor_score(c: &serde_json::Value) -> Option<i64> {
    let score = c.get("score")?;
    score
        .as_i64()
        .or_else(|| score.as_str().and_then(|s| s.trim().parse().ok()))
}

/// `status.type.state` is "pre" / "in" / "post"; `completed` distinguishes a
/// finished game from a postponed one.
fn parse_status(status_type: Option<&serde_json::Value>) -> ContestStatus {
    let Some(t) = status_type else {
        return ContestStatus::Scheduled;
    };
    let state = t.get("state").and_then(|s| s.as_str()).unwrap_or("");
    let completed = t.get("completed").and_then(|c| c.as_bool()).unwrap_or(false);
    let name = t.get("name").and_then(|n| n.as_str()).unwrap_or("").to_ascii_uppercase();

    match state {
        "in" => ContestStatus::InProgress,
        "post" if completed => ContestStatus::Final,
        "post" => ContestStatus::Scheduled,
        "pre" => ContestStatus::Scheduled,
        _ if name.ends_with("FINAL") || name.contains("FINAL_") => ContestStatus::Final,
        _ if name.contains("IN_PROGRESS") || name.contains("HALFTIME") => ContestStatus::InProgress,
        _ => ContestStatus::Scheduled,
    }
}

/// ESPN dates omit seconds (`2025-09-05T00:20Z`); accept both forms.
pub fn parse_start_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%MZ")
        .ok()
        .map(|naive| naive.and_utc())
}
