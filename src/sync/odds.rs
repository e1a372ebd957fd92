use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::db::queries;
use crate::error::Result;
use crate::providers::OddsProvider;
use crate::types::Contest;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OddsStats {
    pub quotes: usize,
    pub stored: usize,
    /// Contest already started; its pregame probability is frozen.
    pub frozen: usize,
    /// Quote names a matchup not scheduled from this period on.
    pub unmatched: usize,
    pub out_of_range: usize,
    pub failed: usize,
}

impl std::fmt::Display for OddsStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "quotes={} stored={} frozen={} unmatched={} out_of_range={} failed={}",
            self.quotes, self.stored, self.frozen, self.unmatched, self.out_of_range, self.failed
        )
    }
}

/// Pull the pregame odds board and attach each quote to the earliest stored
/// contest of the same matchup in `period` or later. Quotes for contests that
/// already kicked off are dropped so the stored value stays the last
/// pregame one.
pub async fn update_odds(
    pool: &SqlitePool,
    provider: &dyn OddsProvider,
    season: i64,
    period: i64,
    now: DateTime<Utc>,
) -> Result<OddsStats> {
    let quotes = provider.get_win_probabilities(season, period).await?;
    let contests: Vec<Contest> = queries::contests_for_season(pool, season)
        .await?
        .into_iter()
        .filter(|c| c.key.period >= period)
        .collect();
    let mut stats = OddsStats {
        quotes: quotes.len(),
        ..OddsStats::default()
    };

    for q in &quotes {
        if !(0.0..=1.0).contains(&q.win_probability) || q.win_probability.is_nan() {
            stats.out_of_range += 1;
            warn!(side = %q.side, p = q.win_probability, "Dropping out-of-range win probability");
            continue;
        }
        let Some(contest) = contests
            .iter()
            .filter(|c| c.key.home == q.contest.home && c.key.away == q.contest.away)
            .min_by_key(|c| c.key.period)
        else {
            stats.unmatched += 1;
            debug!(home = %q.contest.home, away = %q.contest.away, "No upcoming contest for odds quote");
            continue;
        };
        if !contest.involves(q.side) {
            stats.unmatched += 1;
            continue;
        }
        if contest.has_started(now) {
            stats.frozen += 1;
            continue;
        }

        let res = sqlx::query(
            r#"
            INSERT INTO odds_quotes (contest_id, entity_code, win_probability, fetched_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(contest_id, entity_code) DO UPDATE SET
                win_probability = excluded.win_probability,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(contest.contest_id)
        .bind(q.side.as_str())
        .bind(q.win_probability)
        .bind(now.timestamp())
        .execute(pool)
        .await;
        match res {
            Ok(_) => stats.stored += 1,
            Err(e) => {
                stats.failed += 1;
                warn!(contest_id = contest.contest_id, "Odds upsert failed: {e}");
            }
        }
    }

    info!(
        season,
        period,
        stored = stats.stored,
        frozen = stats.frozen,
        unmatched = stats.unmatched,
        "Odds update complete: {stats}",
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::sync::apply_contest_updates;
    use crate::testing::{quote, scheduled_update, FakeOdds};
    use crate::types::{from_unix, EntityCode};

    #[tokio::test]
    async fn quotes_attach_to_unstarted_contests_only() {
        let pool = test_pool().await;
        let now = from_unix(50_000);
        apply_contest_updates(
            &pool,
            &[
                scheduled_update(2025, 1, EntityCode::Kc, EntityCode::Buf, from_unix(40_000)),
                scheduled_update(2025, 1, EntityCode::Dal, EntityCode::Phi, from_unix(90_000)),
            ],
            from_unix(1_000),
        )
        .await;
        let provider = FakeOdds::new(vec![
            quote(2025, 1, EntityCode::Kc, EntityCode::Buf, EntityCode::Kc, 0.6),
            quote(2025, 1, EntityCode::Dal, EntityCode::Phi, EntityCode::Dal, 0.45),
            quote(2025, 1, EntityCode::Dal, EntityCode::Phi, EntityCode::Phi, 0.55),
            quote(2025, 1, EntityCode::Sea, EntityCode::Sf, EntityCode::Sf, 0.5),
            quote(2025, 1, EntityCode::Dal, EntityCode::Phi, EntityCode::Phi, 1.4),
        ]);

        let stats = update_odds(&pool, &provider, 2025, 1, now).await.unwrap();
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.frozen, 1);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.out_of_range, 1);

        let book = queries::odds_for_season(&pool, 2025).await.unwrap();
        assert_eq!(book.get(2, EntityCode::Dal), Some(0.45));
        assert_eq!(book.get(1, EntityCode::Kc), None);
    }

    #[tokio::test]
    async fn board_quotes_attach_to_later_periods() {
        let pool = test_pool().await;
        apply_contest_updates(
            &pool,
            &[
                scheduled_update(2025, 1, EntityCode::Kc, EntityCode::Buf, from_unix(40_000)),
                scheduled_update(2025, 3, EntityCode::Sea, EntityCode::Sf, from_unix(900_000)),
            ],
            from_unix(1_000),
        )
        .await;
        // The board labels every game with the requested period.
        let provider = FakeOdds::new(vec![
            quote(2025, 2, EntityCode::Sea, EntityCode::Sf, EntityCode::Sea, 0.3),
            quote(2025, 2, EntityCode::Sea, EntityCode::Sf, EntityCode::Sf, 0.7),
        ]);

        let stats = update_odds(&pool, &provider, 2025, 2, from_unix(50_000)).await.unwrap();
        assert_eq!(stats.stored, 2);
        let contests = queries::contests_for_period(&pool, 2025, 3).await.unwrap();
        let book = queries::odds_for_season(&pool, 2025).await.unwrap();
        assert_eq!(book.get(contests[0].contest_id, EntityCode::Sf), Some(0.7));
    }
}
