//! rmsyncd — the rmsync daemon.
//!
//! Polls every configured resource manager on a fixed interval and keeps
//! the cluster model reconciled. A one-shot `check` mode answers a single
//! admission question against a freshly polled model.
//!
//! # Usage
//!
//! ```text
//! rmsyncd run --config rmsync.toml
//! rmsyncd check --config rmsync.toml --job job.json --node n01 --tasks 4
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rmsync_core::SchedulerConfig;
use rmsync_state::Job;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "rmsyncd", about = "rmsync resource manager synchronization daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the poll loop until Ctrl-C.
    Run {
        /// Path to rmsync.toml.
        #[arg(long, default_value = "rmsync.toml")]
        config: PathBuf,

        /// Stop after this many iterations.
        #[arg(long)]
        iterations: Option<u64>,

        /// Print each iteration report as JSON on stdout.
        #[arg(long)]
        json: bool,
    },
    /// Poll once, then print the admission decision for a job on a node.
    Check {
        #[arg(long, default_value = "rmsync.toml")]
        config: PathBuf,

        /// Job description as JSON.
        #[arg(long)]
        job: PathBuf,

        /// Candidate node id.
        #[arg(long)]
        node: String,

        /// Start time in seconds after now.
        #[arg(long, default_value = "0")]
        start_offset: u64,

        /// Upper bound on tasks to place.
        #[arg(long)]
        tasks: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rmsyncd=debug,rmsync=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            iterations,
            json,
        } => run(config, iterations, json).await,
        Command::Check {
            config,
            job,
            node,
            start_offset,
            tasks,
        } => check(config, job, node, start_offset, tasks).await,
    }
}

async fn run(config_path: PathBuf, iterations: Option<u64>, json: bool) -> anyhow::Result<()> {
    let config = SchedulerConfig::from_file(&config_path)
        .with_context(|| format!("load {}", config_path.display()))?;
    let interval = config.poll_interval();
    info!(
        path = %config_path.display(),
        rms = config.resource_managers.len(),
        interval_secs = interval.as_secs(),
        "rmsyncd starting"
    );

    let orchestrator = rmsyncd::build_orchestrator(&config).await?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let completed = orchestrator
        .run(interval, shutdown_rx, iterations, |report| {
            if json {
                match serde_json::to_string(report) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::error!(error = %e, "report not serialized"),
                }
            }
        })
        .await;

    info!(iterations = completed, "rmsyncd stopped");
    Ok(())
}

async fn check(
    config_path: PathBuf,
    job_path: PathBuf,
    node: String,
    start_offset: u64,
    tasks: Option<u32>,
) -> anyhow::Result<()> {
    let config = SchedulerConfig::from_file(&config_path)
        .with_context(|| format!("load {}", config_path.display()))?;
    let raw = std::fs::read_to_string(&job_path)
        .with_context(|| format!("read {}", job_path.display()))?;
    let job: Job = serde_json::from_str(&raw).context("parse job")?;

    let orchestrator = rmsyncd::build_orchestrator(&config).await?;
    orchestrator.run_iteration().await;

    let admission =
        rmsyncd::check_admission(&orchestrator, &job, &node, start_offset, tasks).await?;
    println!("{}", serde_json::to_string_pretty(&admission)?);
    Ok(())
}
