use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::providers::cache::ResponseCache;
use crate::providers::{LatencyStats, OddsProvider};
use crate::types::{ContestKey, EntityCode, OddsQuote};

const SPORT_KEY: &str = "americanfootball_nfl";

/// Sportsbooks tried first, in order, before falling back to any book.
const PREFERRED_BOOKS: &[&str] = &["draftkings", "fanduel", "betmgm", "caesars"];

/// The Odds API adapter. Reads head-to-head (moneyline) prices and turns
/// them into vig-free win probabilities.
pub struct OddsApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    cache: ResponseCache<Vec<MatchupOdds>>,
    latency: Arc<LatencyStats>,
}

/// Win probabilities for one upcoming matchup, before it is tied to a period.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchupOdds {
    pub home: EntityCode,
    pub away: EntityCode,
    pub home_probability: f64,
    pub away_probability: f64,
}

impl OddsApiProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        cache_ttl: Duration,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            cache: ResponseCache::new(cache_ttl),
            latency,
        }
    }

    async fn fetch_matchups(&self) -> Result<Vec<MatchupOdds>> {
        let url = format!("{}/sports/{SPORT_KEY}/odds", self.base_url);
        let started = Instant::now();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("regions", "us"),
                ("markets", "h2h"),
                ("oddsFormat", "american"),
                ("dateFormat", "iso"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::SourceUnavailable(format!("odds request failed: {e}")))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AppError::SourceUnavailable(format!("odds body unreadable: {e}")))?;
        self.latency.record_since("odds_api", started);

        let matchups = parse_odds_response(&body)?;
        info!("Odds API: fetched win probabilities for {} matchups", matchups.len());
        Ok(matchups)
    }
}

#[async_trait]
impl OddsProvider for OddsApiProvider {
    async fn get_win_probabilities(&self, season: i64, period: i64) -> Result<Vec<OddsQuote>> {
        // The feed lists every upcoming game regardless of period; cache the
        // whole board once and label it with the requested period. The odds
        // job places each matchup in that period or a later one.
        let matchups = self
            .cache
            .get_or_fetch(&format!("{SPORT_KEY}_h2h"), || self.fetch_matchups())
            .await?;

        let quotes = matchups
            .iter()
            .flat_map(|m| {
                let contest = ContestKey { season, period, home: m.home, away: m.away };
                [
                    OddsQuote { contest, side: m.home, win_probability: m.home_probability },
                    OddsQuote { contest, side: m.away, win_probability: m.away_probability },
                ]
            })
            .collect();
        Ok(quotes)
    }
}

pub fn parse_odds_response(body: &serde_json::Value) -> Result<Vec<MatchupOdds>> {
    let games = body
        .as_array()
        .ok_or_else(|| AppError::SourceUnavailable("odds response was not an array".to_string()))?;

    let mut out = Vec::with_capacity(games.len());
    for game in games {
        let names = (
            game.get("home_team").and_then(|t| t.as_str()),
            game.get("away_team").and_then(|t| t.as_str()),
        );
        let (Some(home_name), Some(away_name)) = names else {
            warn!("Skipping odds entry without team names");
            continue;
        };
        let (Some(home), Some(away)) = (EntityCode::from_full_name(home_name), EntityCode::from_full_name(away_name))
        else {
            warn!("Skipping odds entry with unknown teams: {away_name} @ {home_name}");
            continue;
        };

        let bookmakers = game
            .get("bookmakers")
            .and_then(|b| b.as_array())
            .map(|b| b.as_slice())
            .unwrap_or(&[]);
        match pick_h2h_prices(bookmakers, home_name, away_name) {
            Some((home_price, away_price)) => {
                let (home_probability, away_probability) = devig(home_price, away_price);
                out.push(MatchupOdds { home, away, home_probability, away_probability });
            }
            None => warn!("No usable h2h prices for {away_name} @ {home_name}"),
        }
    }
    Ok(out)
}

/// `(home_price, away_price)` in American odds from the first preferred
/// book that quotes both sides, else from any book.
fn pick_h2h_prices(bookmakers: &[serde_json::Value], home_name: &str, away_name: &str) -> Option<(f64, f64)> {
    let book_key = |b: &serde_json::Value| {
        b.get("key")
            .and_then(|k| k.as_str())
            .unwrap_or("")
            .to_ascii_lowercase()
    };

    let preferred = PREFERRED_BOOKS.iter().find_map(|name| {
        bookmakers
            .iter()
            .filter(|b| book_key(b).contains(name))
            .find_map(|b| book_h2h_prices(b, home_name, away_name))
    });
    preferred.or_else(|| {
        bookmakers
            .iter()
            .find_map(|b| book_h2h_prices(b, home_name, away_name))
    })
}

fn book_h2h_prices(book: &serde_json::Value, home_name: &str, away_name: &str) -> Option<(f64, f64)> {
    let market = book
        .get("markets")?
        .as_array()?
        .iter()
        .find(|m| m.get("key").and_then(|k| k.as_str()) == Some("h2h"))?;
    let outcomes = market.get("outcomes")?.as_array()?;

    let price_for = |team: &str| {
        outcomes
            .iter()
            .find(|o| o.get("name").and_then(|n| n.as_str()) == Some(team))
            .and_then(|o| o.get("price"))
            .and_then(|p| p.as_f64())
    };
    Some((price_for(home_name)?, price_for(away_name)?))
}

/// Implied probability of an American price, including the book's margin.
pub fn implied_probability(american: f64) -> f64 {
    let decimal = if american > 0.0 {
        1.0 + american / 100.0
    } else {
        1.0 + 100.0 / american.abs()
    };
    1.0 / decimal
}

/// Normalize both implied probabilities so they sum to 1.
pub fn devig(home_price: f64, away_price: f64) -> (f64, f64) {
    let h = implied_probability(home_price);
    let a = implied_probability(away_price);
    let total = h + a;
    if total <= 0.0 {
        return (0.5, 0.5);
    }
    (h / total, a / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn american_prices_convert_to_probabilities() {
        assert!((implied_probability(-200.0) - 2.0 / 3.0).abs() < 1e-9);
        assert!((implied_probability(100.0) - 0.5).abs() < 1e-9);
        let (h, a) = devig(-150.0, 130.0);
        assert!((h + a - 1.0).abs() < 1e-9);
        assert!(h > a);
    }

    #[test]
    fn preferred_book_wins_over_first_listed() {
        let body = json!([{
            "home_team": "Kansas City Chiefs",
            "away_team": "Buffalo Bills",
            "bookmakers": [
                { "key": "lowvig", "markets": [{ "key": "h2h", "outcomes": [
                    { "name": "Kansas City Chiefs", "price": 100 },
                    { "name": "Buffalo Bills", "price": 100 }
                ]}]},
                { "key": "fanduel", "markets": [{ "key": "h2h", "outcomes": [
                    { "name": "Kansas City Chiefs", "price": -300 },
                    { "name": "Buffalo Bills", "price": 300 }
                ]}]}
            ]
        }]);
        let parsed = parse_odds_response(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].home, EntityCode::Kc);
        assert!(parsed[0].home_probability > 0.7);
    }

    #[test]
    fn unknown_team_is_skipped() {
        let body = json!([{ "home_team": "Springfield Atoms", "away_team": "Buffalo Bills", "bookmakers": [] }]);
        assert!(parse_odds_response(&body).unwrap().is_empty());
    }
}
