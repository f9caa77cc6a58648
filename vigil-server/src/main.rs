//! # Vigil Server
//!
//! Vulnerability-scan manager daemon.
//!
//! ## Overview
//!
//! The daemon drives one scanner process over its line-oriented wire
//! protocol, persists task and report state, launches or stops scans on
//! recurrence schedules, and optionally delegates execution of a task to a
//! remote manager ("slave") over the manager's own XML command protocol.
//!
//! ## Architecture
//!
//! One tokio task owns the scanner connection and its session state; the
//! recurrence scheduler runs beside it and dispatches due tasks through a
//! command channel. All shared state lives behind the store accessor
//! trait.

mod daemon;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vigil_core::{MemoryStore, Scheduler, TaskStore};

use daemon::{ChannelScheduleConnector, ScannerSupervisor, SessionCommand};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "vigil-server")]
#[command(about = "Vulnerability-scan manager daemon")]
struct Cli {
    /// Path to the daemon configuration file (TOML).
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Tracing filter, e.g. `info` or `vigil_core=debug,info`. Overrides
    /// the config file and `VIGIL_LOG`.
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; a malformed one is not silently ignored.
    if let Err(error) = dotenvy::dotenv()
        && !error.not_found()
    {
        eprintln!("warning: failed to load .env: {error}");
    }

    let cli = Cli::parse();
    let (config, source) =
        vigil_config::load(cli.config.as_deref()).context("loading configuration")?;

    let filter = cli
        .log
        .clone()
        .or_else(|| config.log_filter.clone())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&filter).context("parsing log filter")?)
        .init();

    info!(?source, "vigil-server starting");

    // The SQL-backed store plugs in behind the same trait; the in-memory
    // store carries a single daemon's state.
    let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());
    let shutdown = CancellationToken::new();
    let (command_tx, command_rx) = mpsc::channel::<SessionCommand>(64);

    let supervisor = ScannerSupervisor::new(
        Arc::clone(&store),
        config.clone(),
        command_rx,
        shutdown.clone(),
    );
    let supervisor_handle = tokio::spawn(supervisor.run());

    let scheduler_handle = if config.scheduler.enabled {
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::new(ChannelScheduleConnector::new(command_tx.clone())),
            Duration::from_secs(config.scheduler.poll_interval_secs.max(1)),
            shutdown.clone(),
        );
        Some(tokio::spawn(async move { scheduler.run().await }))
    } else {
        info!("recurrence scheduler disabled by configuration");
        None
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {
            warn!("daemon shutting down");
        }
    }

    drop(command_tx);
    if let Some(handle) = scheduler_handle {
        let _ = handle.await;
    }
    let _ = supervisor_handle.await;
    info!("vigil-server stopped");
    Ok(())
}
