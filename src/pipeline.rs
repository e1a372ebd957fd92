use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{jobs, Config, BACKFILL_CONCURRENCY, PRE_LOCK_CHECK_SECS};
use crate::db::job_runs;
use crate::error::{AppError, Result};
use crate::evaluate::{evaluate_period, EvalStats};
use crate::ingest::{ingest_picks, IngestStats};
use crate::providers::Providers;
use crate::sync::{sync_contests, update_odds, OddsStats, SyncStats};
use crate::types::JobStatus;

/// Stats a batch job reports back for its `job_runs` row.
pub trait JobReport: std::fmt::Display {
    fn is_partial(&self) -> bool;
}

impl JobReport for SyncStats {
    fn is_partial(&self) -> bool {
        SyncStats::is_partial(self)
    }
}

impl JobReport for IngestStats {
    fn is_partial(&self) -> bool {
        IngestStats::is_partial(self)
    }
}

impl JobReport for EvalStats {
    fn is_partial(&self) -> bool {
        EvalStats::is_partial(self)
    }
}

impl JobReport for OddsStats {
    fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

/// Shared handles for every batch job.
#[derive(Clone)]
pub struct Jobs {
    pub pool: SqlitePool,
    pub cfg: Config,
    pub providers: Providers,
    /// Ingestion and evaluation never interleave; sync may run alongside.
    results_guard: Arc<Mutex<()>>,
}

impl Jobs {
    pub fn new(pool: SqlitePool, cfg: Config, providers: Providers) -> Self {
        Self {
            pool,
            cfg,
            providers,
            results_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Run `fut` as job `name`, recording attempt and outcome in `job_runs`.
    /// Returns the job's stats when it completed.
    async fn tracked<T, F>(&self, name: &str, fut: F) -> Option<T>
    where
        T: JobReport,
        F: Future<Output = Result<T>>,
    {
        if let Err(e) = job_runs::record_attempt(&self.pool, name, Utc::now()).await {
            warn!(job = name, "Failed to record job attempt: {e}");
        }
        match fut.await {
            Ok(stats) => {
                let status = if stats.is_partial() { JobStatus::Partial } else { JobStatus::Success };
                job_runs::finish_logged(&self.pool, name, status, &stats.to_string()).await;
                Some(stats)
            }
            Err(e) => {
                job_runs::finish_logged(&self.pool, name, JobStatus::Error, &e.to_string()).await;
                None
            }
        }
    }

    async fn skipped(&self, name: &str, why: &str) {
        info!(job = name, "Skipping {name}: {why}");
        job_runs::finish_logged(&self.pool, name, JobStatus::Skipped, why).await;
    }

    pub async fn sync(&self, season: i64, period: i64, now: DateTime<Utc>) -> Option<SyncStats> {
        let provider = Arc::clone(&self.providers.scores);
        self.tracked(jobs::SYNC_CONTESTS, async move {
            sync_contests(&self.pool, provider.as_ref(), season, period, now).await
        })
        .await
    }

    pub async fn ingest(&self, season: i64, now: DateTime<Utc>) -> Option<IngestStats> {
        let Some(source) = self.providers.picks.clone() else {
            self.skipped(jobs::INGEST_PICKS, "pick source not configured").await;
            return None;
        };
        let _guard = self.results_guard.lock().await;
        self.tracked(jobs::INGEST_PICKS, async move {
            ingest_picks(&self.pool, source.as_ref(), season, now).await
        })
        .await
    }

    pub async fn evaluate(&self, season: i64, period: i64, now: DateTime<Utc>) -> Option<EvalStats> {
        let _guard = self.results_guard.lock().await;
        let stale_after = self.cfg.stale_game_threshold();
        self.tracked(jobs::EVALUATE_RESULTS, async move {
            evaluate_period(&self.pool, season, period, now, stale_after).await
        })
        .await
    }

    pub async fn odds(&self, season: i64, period: i64, now: DateTime<Utc>) -> Option<OddsStats> {
        let Some(provider) = self.providers.odds.clone() else {
            self.skipped(jobs::UPDATE_ODDS, "odds provider not configured").await;
            return None;
        };
        self.tracked(jobs::UPDATE_ODDS, async move {
            update_odds(&self.pool, provider.as_ref(), season, period, now).await
        })
        .await
    }

    /// Sync schedules for the periods after `current`, so odds and the
    /// survivability gauge have future contests to attach to.
    pub async fn sync_upcoming(&self, season: i64, current: i64, now: DateTime<Utc>) -> Option<SyncStats> {
        let last = (current + self.cfg.schedule_lookahead).min(self.cfg.last_period);
        if last <= current {
            return Some(SyncStats::default());
        }
        let provider = Arc::clone(&self.providers.scores);
        self.tracked(jobs::SYNC_SCHEDULE, async move {
            let results: Vec<(i64, Result<SyncStats>)> = stream::iter((current + 1)..=last)
                .map(|period| {
                    let provider = Arc::clone(&provider);
                    async move { (period, sync_contests(&self.pool, provider.as_ref(), season, period, now).await) }
                })
                .buffer_unordered(BACKFILL_CONCURRENCY)
                .collect()
                .await;

            let mut total = SyncStats::default();
            let mut failed_periods = Vec::new();
            for (period, res) in results {
                match res {
                    Ok(stats) => total.absorb(&stats),
                    Err(e) => {
                        warn!(season, period, "Schedule sync failed: {e}");
                        failed_periods.push(period);
                    }
                }
            }
            if failed_periods.len() as i64 == last - current {
                return Err(AppError::SourceUnavailable(format!(
                    "schedule sync failed for every period {}..={last}",
                    current + 1
                )));
            }
            total.failed += failed_periods.len();
            Ok(total)
        })
        .await
    }

    /// Upcoming schedules, then the odds board attached from `current` on.
    pub async fn refresh_outlook(&self, season: i64, current: i64, now: DateTime<Utc>) {
        self.sync_upcoming(season, current, now).await;
        self.odds(season, current, now).await;
    }

    pub async fn current_period(&self, season: i64) -> Result<i64> {
        let period = self.providers.scores.get_current_period(season).await?;
        if period < 1 || period > self.cfg.last_period {
            return Err(AppError::SourceUnavailable(format!(
                "provider reported period {period} outside 1..={}",
                self.cfg.last_period
            )));
        }
        Ok(period)
    }

    /// Sync and ingest concurrently, then evaluate the period (and the one
    /// before it, which may still hold late finals).
    pub async fn run_period(&self, season: i64, period: i64, now: DateTime<Utc>) {
        let (synced, _) = tokio::join!(self.sync(season, period, now), self.ingest(season, now));
        if synced.is_none() {
            warn!(season, period, "Sync failed; evaluating against stored contests");
        }
        if period > 1 {
            self.evaluate(season, period - 1, now).await;
        }
        self.evaluate(season, period, now).await;
    }

    /// One scheduled pipeline tick for the configured season.
    pub async fn tick(&self) -> Result<i64> {
        let season = self.cfg.season;
        let period = self.current_period(season).await?;
        self.run_period(season, period, Utc::now()).await;
        Ok(period)
    }

    /// Sync a range of periods with bounded concurrency, then evaluate each
    /// in order.
    pub async fn backfill(&self, season: i64, from: i64, to: i64) -> Result<Vec<(i64, EvalStats)>> {
        if from < 1 || to < from || to > self.cfg.last_period {
            return Err(AppError::Validation(format!(
                "backfill range {from}..={to} is outside 1..={}",
                self.cfg.last_period
            )));
        }
        let now = Utc::now();

        let synced: Vec<(i64, bool)> = stream::iter(from..=to)
            .map(|period| async move { (period, self.sync(season, period, now).await.is_some()) })
            .buffer_unordered(BACKFILL_CONCURRENCY)
            .collect()
            .await;
        let failed: Vec<i64> = synced.iter().filter(|(_, ok)| !ok).map(|(p, _)| *p).collect();
        if !failed.is_empty() {
            warn!(?failed, "Backfill sync failed for some periods");
        }

        self.ingest(season, now).await;

        let mut out = Vec::new();
        for period in from..=to {
            if let Some(stats) = self.evaluate(season, period, now).await {
                out.push((period, stats));
            }
        }
        info!(season, from, to, evaluated = out.len(), "Backfill complete: periods {from}..={to}");
        Ok(out)
    }

    /// Start of the next contest of the season that has not kicked off.
    async fn next_kickoff(&self, season: i64, now: DateTime<Utc>) -> Result<Option<i64>> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MIN(start_time) FROM contests WHERE season = ? AND start_time > ?")
                .bind(season)
                .bind(now.timestamp())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}

// ---------------------------------------------------------------------------
// Background runners
// ---------------------------------------------------------------------------

pub struct PipelineRunner {
    jobs: Jobs,
}

impl PipelineRunner {
    pub fn new(jobs: Jobs) -> Self {
        Self { jobs }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(self.jobs.cfg.pipeline_interval_secs));
        ticker.tick().await; // skip immediate first tick; startup already ran one pass

        loop {
            ticker.tick().await;
            if let Err(e) = self.jobs.tick().await {
                error!("Period pipeline failed: {e}");
            }
        }
    }
}

pub struct OddsRunner {
    jobs: Jobs,
}

impl OddsRunner {
    pub fn new(jobs: Jobs) -> Self {
        Self { jobs }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(self.jobs.cfg.odds_interval_secs));
        loop {
            ticker.tick().await;
            let season = self.jobs.cfg.season;
            match self.jobs.current_period(season).await {
                Ok(period) => self.jobs.refresh_outlook(season, period, Utc::now()).await,
                Err(e) => error!("Outlook refresh failed: {e}"),
            }
        }
    }
}

/// Triggers an extra ingestion shortly before each kickoff so late pick
/// changes land before the lock.
pub struct PreLockWatcher {
    jobs: Jobs,
    /// Kickoff already covered by a supplementary ingestion.
    last_triggered: Option<i64>,
}

impl PreLockWatcher {
    pub fn new(jobs: Jobs) -> Self {
        Self { jobs, last_triggered: None }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(Duration::from_secs(PRE_LOCK_CHECK_SECS));
        loop {
            ticker.tick().await;
            if let Err(e) = self.check(Utc::now()).await {
                error!("Pre-lock check failed: {e}");
            }
        }
    }

    async fn check(&mut self, now: DateTime<Utc>) -> Result<()> {
        let season = self.jobs.cfg.season;
        let Some(kickoff) = self.jobs.next_kickoff(season, now).await? else {
            return Ok(());
        };
        let lead_secs = self.jobs.cfg.pre_lock_lead_mins * 60;
        if kickoff - now.timestamp() > lead_secs || self.last_triggered == Some(kickoff) {
            return Ok(());
        }

        info!(season, kickoff, "Kickoff within {} min, running supplementary ingestion", self.jobs.cfg.pre_lock_lead_mins);
        self.last_triggered = Some(kickoff);
        self.jobs.ingest(season, now).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::reports::consumed_entities;
    use crate::analytics::{forward_survivability, SeasonSnapshot, SurvivabilityReport};
    use crate::db::{queries, test_pool};
    use crate::providers::LatencyStats;
    use crate::testing::{final_update, raw, scheduled_update, FakeOdds, FakePicks, FakeScores};
    use crate::types::{from_unix, EntityCode};

    fn harness(pool: SqlitePool, scores: FakeScores, picks: Option<FakePicks>, odds: Option<FakeOdds>) -> Jobs {
        let providers = Providers {
            scores: Arc::new(scores),
            picks: picks.map(|p| Arc::new(p) as Arc<dyn crate::providers::PickSource>),
            odds: odds.map(|o| Arc::new(o) as Arc<dyn crate::providers::OddsProvider>),
            latency: Arc::new(LatencyStats::new()),
        };
        Jobs::new(pool, Config::default(), providers)
    }

    #[tokio::test]
    async fn period_run_syncs_ingests_and_evaluates() {
        let pool = test_pool().await;
        let scores = FakeScores::new(
            vec![final_update(2025, 1, EntityCode::Kc, EntityCode::Buf, from_unix(100_000), 13, 20)],
            1,
        );
        let picks = FakePicks::new(vec![raw("Alice", 1, "KC"), raw("Bob", 1, "BUF")]);
        let runner = harness(pool.clone(), scores, Some(picks), None);

        runner.run_period(2025, 1, from_unix(500_000)).await;

        let results = queries::pick_details_for_period(&pool, 2025, 1).await.unwrap();
        let outcomes: Vec<_> = results.iter().map(|p| (p.display_name.as_str(), p.survived)).collect();
        assert_eq!(outcomes, vec![("Alice", Some(false)), ("Bob", Some(true))]);

        let runs = job_runs::all(&pool).await.unwrap();
        let names: Vec<_> = runs.iter().map(|r| (r.job_name.as_str(), r.status.as_str())).collect();
        assert_eq!(
            names,
            vec![("evaluate_results", "success"), ("ingest_picks", "success"), ("sync_contests", "success")]
        );
    }

    #[tokio::test]
    async fn provider_outage_is_recorded_not_raised() {
        let pool = test_pool().await;
        let runner = harness(pool.clone(), FakeScores::failing(), None, None);
        runner.run_period(2025, 1, from_unix(500_000)).await;

        let runs = job_runs::all(&pool).await.unwrap();
        let sync = runs.iter().find(|r| r.job_name == jobs::SYNC_CONTESTS).unwrap();
        assert_eq!(sync.status, "error");
        assert_eq!(sync.last_success_at, None);
        let ingest = runs.iter().find(|r| r.job_name == jobs::INGEST_PICKS).unwrap();
        assert_eq!(ingest.status, "skipped");
    }

    #[tokio::test]
    async fn backfill_covers_every_period_in_range() {
        let pool = test_pool().await;
        let scores = FakeScores::new(
            vec![
                final_update(2025, 1, EntityCode::Kc, EntityCode::Buf, from_unix(100_000), 30, 20),
                final_update(2025, 2, EntityCode::Dal, EntityCode::Phi, from_unix(700_000), 10, 20),
                scheduled_update(2025, 3, EntityCode::Sea, EntityCode::Sf, from_unix(4_000_000_000)),
            ],
            3,
        );
        let picks = FakePicks::new(vec![raw("Alice", 1, "KC"), raw("Alice", 2, "DAL")]);
        let runner = harness(pool.clone(), scores, Some(picks), None);

        let evaluated = runner.backfill(2025, 1, 3).await.unwrap();
        assert_eq!(evaluated.len(), 3);
        assert_eq!(queries::contests_for_season(&pool, 2025).await.unwrap().len(), 3);
        assert!(evaluated[2].1.picks == 0 && !evaluated[2].1.period_complete);

        assert!(matches!(runner.backfill(2025, 3, 1).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn odds_job_skips_without_provider_and_runs_with_one() {
        let pool = test_pool().await;
        let scores = FakeScores::new(
            vec![scheduled_update(2025, 1, EntityCode::Kc, EntityCode::Buf, from_unix(900_000))],
            1,
        );
        let without = harness(pool.clone(), FakeScores::default(), None, None);
        assert!(without.odds(2025, 1, from_unix(1_000)).await.is_none());

        let odds = FakeOdds::new(vec![crate::testing::quote(
            2025,
            1,
            EntityCode::Kc,
            EntityCode::Buf,
            EntityCode::Kc,
            0.65,
        )]);
        let with = harness(pool.clone(), scores, None, Some(odds));
        with.sync(2025, 1, from_unix(1_000)).await.unwrap();
        let stats = with.odds(2025, 1, from_unix(1_000)).await.unwrap();
        assert_eq!(stats.stored, 1);
    }

    #[tokio::test]
    async fn outlook_refresh_feeds_the_survivability_gauge() {
        let pool = test_pool().await;
        let scores = FakeScores::new(
            vec![
                scheduled_update(2025, 1, EntityCode::Kc, EntityCode::Buf, from_unix(100_000)),
                scheduled_update(2025, 2, EntityCode::Dal, EntityCode::Phi, from_unix(700_000)),
                scheduled_update(2025, 3, EntityCode::Sea, EntityCode::Sf, from_unix(1_300_000)),
            ],
            1,
        );
        // The board carries later games but is labelled with the current period.
        let odds = FakeOdds::new(vec![
            crate::testing::quote(2025, 1, EntityCode::Dal, EntityCode::Phi, EntityCode::Dal, 0.7),
            crate::testing::quote(2025, 1, EntityCode::Dal, EntityCode::Phi, EntityCode::Phi, 0.3),
            crate::testing::quote(2025, 1, EntityCode::Sea, EntityCode::Sf, EntityCode::Sf, 0.6),
        ]);
        let picks = FakePicks::new(vec![raw("Alice", 1, "DAL")]);
        let runner = harness(pool.clone(), scores, Some(picks), Some(odds));

        let now = from_unix(50_000);
        runner.run_period(2025, 1, now).await;
        runner.refresh_outlook(2025, 1, now).await;

        assert_eq!(queries::contests_for_season(&pool, 2025).await.unwrap().len(), 3);
        let snapshot = SeasonSnapshot::load(&pool, 2025).await.unwrap();
        let consumed = consumed_entities(&snapshot, 1);
        let report = forward_survivability(&snapshot.contests, &snapshot.odds, &consumed, 1, 3, 1);
        let SurvivabilityReport::Scored { periods, total_available, .. } = report else {
            panic!("expected a gauge");
        };
        assert_eq!(periods[0].favourites, vec![EntityCode::Dal]);
        assert!(periods[0].available.is_empty());
        assert_eq!(periods[1].available, vec![EntityCode::Sf]);
        assert_eq!(total_available, 1);

        let runs = job_runs::all(&pool).await.unwrap();
        let schedule = runs.iter().find(|r| r.job_name == jobs::SYNC_SCHEDULE).unwrap();
        assert_eq!(schedule.status, "success");
    }

    #[tokio::test]
    async fn pre_lock_watcher_ingests_once_per_kickoff() {
        let pool = test_pool().await;
        let kickoff = from_unix(1_000_000);
        let scores = FakeScores::new(vec![scheduled_update(2025, 1, EntityCode::Kc, EntityCode::Buf, kickoff)], 1);
        let picks = FakePicks::new(vec![raw("Alice", 1, "KC")]);
        let runner = harness(pool.clone(), scores, Some(picks), None);
        runner.sync(2025, 1, from_unix(1_000)).await.unwrap();

        let mut watcher = PreLockWatcher::new(runner);
        watcher.check(kickoff - chrono::Duration::hours(3)).await.unwrap();
        assert!(queries::pick_details_for_season(&pool, 2025).await.unwrap().is_empty());

        watcher.check(kickoff - chrono::Duration::minutes(10)).await.unwrap();
        assert_eq!(watcher.last_triggered, Some(kickoff.timestamp()));
        assert_eq!(queries::pick_details_for_season(&pool, 2025).await.unwrap().len(), 1);
    }
}
