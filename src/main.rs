mod analytics;
mod api;
mod config;
mod db;
mod error;
mod evaluate;
mod ingest;
mod pipeline;
mod providers;
mod sync;
mod types;

#[cfg(test)]
mod testing;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::evaluate::{override_result, OverrideRequest};
use crate::pipeline::{Jobs, OddsRunner, PipelineRunner, PreLockWatcher};
use crate::providers::Providers;

#[derive(Parser)]
#[command(name = "tracker", about = "Survivor pool reconciliation engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduled jobs and the HTTP API (default).
    Serve,
    /// Pull schedule and scores for one period.
    Sync {
        #[arg(long)]
        season: Option<i64>,
        #[arg(long)]
        period: Option<i64>,
    },
    /// Read the pick sheet and upsert picks.
    Ingest {
        #[arg(long)]
        season: Option<i64>,
    },
    /// Resolve survival for one period's picks.
    Evaluate {
        #[arg(long)]
        season: Option<i64>,
        #[arg(long)]
        period: Option<i64>,
    },
    /// Refresh pregame win probabilities for one period.
    Odds {
        #[arg(long)]
        season: Option<i64>,
        #[arg(long)]
        period: Option<i64>,
    },
    /// One full sync + ingest + evaluate pass.
    Pipeline {
        #[arg(long)]
        season: Option<i64>,
        #[arg(long)]
        period: Option<i64>,
    },
    /// Sync and evaluate a range of past periods.
    Backfill {
        #[arg(long)]
        season: Option<i64>,
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },
    /// Map an alternate spelling onto an existing participant.
    Alias { alias: String, participant: String },
    /// Manually correct a pick result. Recorded in the audit log.
    Override {
        #[arg(long)]
        pick_id: i64,
        #[arg(long, action = ArgAction::Set)]
        valid: bool,
        #[arg(long)]
        survived: Option<bool>,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg, cli.command.unwrap_or(Command::Serve)).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config, command: Command) -> Result<()> {
    let pool = db::connect(&cfg.db_path).await?;

    let providers = Providers::from_config(&cfg)?;
    let jobs = Jobs::new(pool.clone(), cfg.clone(), providers.clone());
    let now = Utc::now();

    match command {
        Command::Serve => serve(cfg, jobs, providers).await,
        Command::Sync { season, period } => {
            let (season, period) = resolve(&jobs, season, period).await?;
            let stats = jobs.sync(season, period, now).await.ok_or_else(|| failed("sync"))?;
            println!("{stats}");
            Ok(())
        }
        Command::Ingest { season } => {
            let season = season.unwrap_or(cfg.season);
            let stats = jobs.ingest(season, now).await.ok_or_else(|| failed("ingest"))?;
            println!("{stats}");
            Ok(())
        }
        Command::Evaluate { season, period } => {
            let (season, period) = resolve(&jobs, season, period).await?;
            let stats = jobs.evaluate(season, period, now).await.ok_or_else(|| failed("evaluate"))?;
            println!("{stats}");
            Ok(())
        }
        Command::Odds { season, period } => {
            let (season, period) = resolve(&jobs, season, period).await?;
            let stats = jobs.odds(season, period, now).await.ok_or_else(|| failed("odds"))?;
            println!("{stats}");
            Ok(())
        }
        Command::Pipeline { season, period } => {
            let (season, period) = resolve(&jobs, season, period).await?;
            jobs.run_period(season, period, now).await;
            Ok(())
        }
        Command::Backfill { season, from, to } => {
            let season = season.unwrap_or(cfg.season);
            for (period, stats) in jobs.backfill(season, from, to).await? {
                println!("period {period}: {stats}");
            }
            Ok(())
        }
        Command::Alias { alias, participant } => {
            let id = ingest::add_alias(&pool, &alias, &participant, now).await?;
            info!(participant_id = id, "Alias {alias:?} now maps to {participant:?}");
            Ok(())
        }
        Command::Override { pick_id, valid, survived, actor, reason } => {
            let req = OverrideRequest { pick_id, is_valid: valid, survived, actor, reason };
            let audit = override_result(&pool, &req, now).await?;
            println!("{}", serde_json::to_string_pretty(&audit)?);
            Ok(())
        }
    }
}

async fn serve(cfg: Config, jobs: Jobs, providers: Providers) -> Result<()> {
    // --- Startup pass so the API has fresh data before the first tick ---
    match jobs.tick().await {
        Ok(period) => info!(season = cfg.season, period, "Startup pipeline pass complete"),
        Err(e) => error!("Startup pipeline pass failed: {e}"),
    }

    // --- Background runners ---
    let pipeline = PipelineRunner::new(jobs.clone());
    tokio::spawn(async move { pipeline.run().await });

    let odds = OddsRunner::new(jobs.clone());
    tokio::spawn(async move { odds.run().await });

    let watcher = PreLockWatcher::new(jobs.clone());
    tokio::spawn(async move { watcher.run().await });

    // --- HTTP API server ---
    let api_state = ApiState {
        pool: jobs.pool.clone(),
        cfg: cfg.clone(),
        latency: providers.latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Fill in the configured season and the provider's current period.
async fn resolve(jobs: &Jobs, season: Option<i64>, period: Option<i64>) -> Result<(i64, i64)> {
    let season = season.unwrap_or(jobs.cfg.season);
    let period = match period {
        Some(p) => p,
        None => jobs.current_period(season).await?,
    };
    Ok((season, period))
}

fn failed(job: &str) -> AppError {
    AppError::SourceUnavailable(format!("{job} did not complete; see job_runs"))
}
