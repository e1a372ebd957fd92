use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::providers::{LatencyStats, PickSource};
use crate::types::RawPickRow;

/// Pick sheet exposed as a values range: first row is the header
/// (`Name`, `Week 1`, `Week 2`, ...), every further row is one participant.
pub struct SheetPickSource {
    client: reqwest::Client,
    url: String,
    latency: Arc<LatencyStats>,
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

impl SheetPickSource {
    pub fn new(client: reqwest::Client, url: String, latency: Arc<LatencyStats>) -> Self {
        Self { client, url, latency }
    }
}

#[async_trait]
impl PickSource for SheetPickSource {
    async fn fetch_rows(&self, season: i64) -> Result<Vec<RawPickRow>> {
        let started = Instant::now();
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::SourceUnavailable(format!("pick sheet request failed: {e}")))?;
        let body: ValuesResponse = resp
            .json()
            .await
            .map_err(|e| AppError::SourceUnavailable(format!("pick sheet body unreadable: {e}")))?;
        self.latency.record_since("pick_sheet", started);

        if body.values.is_empty() {
            return Err(AppError::SourceUnavailable("pick sheet returned no rows".to_string()));
        }

        let rows = parse_sheet_grid(&body.values);
        info!(season, rows = rows.len(), "Pick sheet fetched");
        Ok(rows)
    }
}

/// Period number from a header cell such as `Week 3` or `wk3`.
fn header_period(cell: &str) -> Option<i64> {
    let lower = cell.trim().to_ascii_lowercase();
    let digits = lower
        .strip_prefix("week")
        .or_else(|| lower.strip_prefix("wk"))?
        .trim();
    digits.parse().ok().filter(|p| *p > 0)
}

/// Flatten the sheet grid into raw rows. Blank cells are emitted too, since a
/// blank means "cleared" to the ingestor; cells past a row's end are not.
pub fn parse_sheet_grid(grid: &[Vec<String>]) -> Vec<RawPickRow> {
    let Some((header, body)) = grid.split_first() else {
        return Vec::new();
    };

    let period_columns: Vec<(usize, i64)> = header
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(idx, cell)| header_period(cell).map(|p| (idx, p)))
        .collect();
    if period_columns.is_empty() {
        warn!("Pick sheet header has no period columns");
        return Vec::new();
    }

    let mut out = Vec::new();
    for row in body {
        let Some(name) = row.first().map(|n| n.trim()).filter(|n| !n.is_empty()) else {
            continue;
        };
        for &(idx, period) in &period_columns {
            if let Some(cell) = row.get(idx) {
                out.push(RawPickRow {
                    participant_name: name.to_string(),
                    period,
                    raw_code: cell.clone(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn header_columns_map_to_periods() {
        assert_eq!(header_period("Week 3"), Some(3));
        assert_eq!(header_period(" wk12 "), Some(12));
        assert_eq!(header_period("Notes"), None);
        assert_eq!(header_period("Week 0"), None);
    }

    #[test]
    fn grid_is_flattened_per_participant_and_period() {
        let g = grid(&[
            &["Name", "Week 1", "Week 2", "Notes"],
            &["Alice", "KC", "", "paid"],
            &["  ", "BUF"],
            &["Bob", "DAL"],
        ]);
        let rows = parse_sheet_grid(&g);
        assert_eq!(
            rows,
            vec![
                RawPickRow { participant_name: "Alice".into(), period: 1, raw_code: "KC".into() },
                RawPickRow { participant_name: "Alice".into(), period: 2, raw_code: "".into() },
                RawPickRow { participant_name: "Bob".into(), period: 1, raw_code: "DAL".into() },
            ]
        );
    }

    #[test]
    fn header_only_grid_yields_nothing() {
        assert!(parse_sheet_grid(&grid(&[&["Name", "Week 1"]])).is_empty());
        assert!(parse_sheet_grid(&[]).is_empty());
    }
}
