//! arrem-sync - Main entry point
//!
//! Copies Radarr/Sonarr tags onto matching Emby library items, additively.
//!
//! Exit codes:
//! - 0: run succeeded (or every connectivity check passed)
//! - 1: run-level failure (configuration, destination unreachable, every
//!   source unreachable, failed connectivity check)
//! - 3: run completed with item failures, degraded sources or interruption

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use arrem_common::config::{self, AppConfig, CliOverrides};
use arrem_sync::clients::{build_destination_client, build_source_clients};
use arrem_sync::reconciler::{ConnectivityReport, Reconciler, ReconcilerOptions};
use arrem_sync::summary::{RunStatus, RunSummary};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EXIT_FATAL: u8 = 1;
const EXIT_PARTIAL: u8 = 3;

/// Command-line arguments for arrem-sync
#[derive(Parser, Debug)]
#[command(name = "arrem-sync")]
#[command(about = "Additive tag sync from Radarr/Sonarr to Emby")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile tags (default when no subcommand is given)
    Sync(SyncArgs),
    /// Check connectivity to the destination and every source
    Test,
}

#[derive(clap::Args, Debug, Default)]
struct SyncArgs {
    /// Compute deltas without writing to Emby
    #[arg(long, conflicts_with = "no_dry_run")]
    dry_run: bool,

    /// Write tags to Emby
    #[arg(long)]
    no_dry_run: bool,

    /// Destination writes per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

impl SyncArgs {
    fn dry_run_override(&self) -> Option<bool> {
        match (self.dry_run, self.no_dry_run) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Sync(SyncArgs::default()));

    let sync_args = match &command {
        Command::Sync(sync_args) => Some(sync_args),
        Command::Test => None,
    };
    let overrides = CliOverrides {
        config_path: args.config,
        dry_run: sync_args.and_then(SyncArgs::dry_run_override),
        batch_size: sync_args.and_then(|a| a.batch_size),
        log_level: args.log_level,
    };

    let config = match config::load(&overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("arrem-sync: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if let Err(e) = arrem_common::logging::init_tracing(&config.log_level) {
        eprintln!("arrem-sync: {}", e);
        return ExitCode::from(EXIT_FATAL);
    }

    let result = match &command {
        Command::Sync(sync_args) => run_sync(&config, sync_args.json).await,
        Command::Test => run_test(&config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("arrem-sync: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn build_reconciler(config: &AppConfig) -> Result<Reconciler> {
    let sources = build_source_clients(config).context("Failed to create source clients")?;
    let destination =
        build_destination_client(config).context("Failed to create destination client")?;
    Ok(Reconciler::new(sources, destination, ReconcilerOptions::from(config)))
}

async fn run_sync(config: &AppConfig, json: bool) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let reconciler = build_reconciler(config)?.with_cancellation(cancel.clone());

    info!(
        run_id = %reconciler.run_id(),
        dry_run = config.dry_run,
        sources = config.sources.len(),
        "Starting arrem-sync"
    );
    if config.dry_run {
        info!("Dry run enabled, no tags will be written");
    }

    let signal_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let outcome = reconciler.run().await;
    signal_task.abort();

    let summary = outcome.context("Sync run aborted")?;
    print_summary(&summary, json)?;
    Ok(exit_code(&summary))
}

async fn run_test(config: &AppConfig) -> Result<ExitCode> {
    let reconciler = build_reconciler(config)?;
    let report = reconciler.check_connectivity().await;
    print_connectivity(&report);

    if report.all_ok() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_FATAL))
    }
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
        println!("{}", rendered);
    } else {
        print!("{}", summary);
    }
    Ok(())
}

fn print_connectivity(report: &ConnectivityReport) {
    for check in &report.checks {
        let mark = if check.ok { "OK  " } else { "FAIL" };
        println!("[{}] {}: {}", mark, check.service, check.detail);
    }
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    match summary.status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Degraded | RunStatus::CompletedWithFailures | RunStatus::Interrupted => {
            ExitCode::from(EXIT_PARTIAL)
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing current batch");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current batch");
        },
    }
}
