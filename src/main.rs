// ABOUTME: CLI entry point for archive-replicator
// ABOUTME: Parses commands, sets up logging and Ctrl+C cancellation, routes to handlers

use anyhow::Context;
use archive_replicator::commands::{self, fill::FillOptions, sync::SyncCommandOptions};
use archive_replicator::commands::write_abin::WriteAbinOptions;
use archive_replicator::config::{Config, DEFAULT_CONFIG_PATH};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "archive-replicator")]
#[command(about = "Keep archive databases in step with the authoritative telemetry store", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, env = "ARCHIVE_REPLICATOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring every destination up to the source for the configured tables
    Sync {
        /// Report the ranges and chunks without transferring
        #[arg(long)]
        dry_run: bool,
        /// Sync only these tables (repeatable; default: tables from the config)
        #[arg(long = "table")]
        tables: Vec<String>,
        /// Sync only these destinations (repeatable; default: all)
        #[arg(long = "destination")]
        destinations: Vec<String>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Transfer an explicit time range of one table
    Fill {
        #[arg(long)]
        table: String,
        /// Range start, RFC 3339 (telemetry tables only)
        #[arg(long, requires = "end")]
        start: Option<DateTime<Utc>>,
        /// Range end, exclusive, RFC 3339 (telemetry tables only)
        #[arg(long, requires = "start")]
        end: Option<DateTime<Utc>>,
        #[arg(long = "destination")]
        destinations: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Write one calibration record to the source and both replicas
    WriteAbin {
        /// LabVIEW time in seconds
        #[arg(long)]
        timestamp: f64,
        /// Record version, 1 to 20
        #[arg(long)]
        version: f64,
        /// Calibration type, one of the configured known tags
        #[arg(long)]
        description: String,
        /// File holding the binary record
        #[arg(long)]
        payload_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    // Cancellation is honored between chunks, so a batch in flight still commits.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Received Ctrl+C, stopping after the current chunk");
                signal_token.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    match cli.command {
        Commands::Sync {
            dry_run,
            tables,
            destinations,
            json,
        } => {
            commands::sync(
                &config,
                SyncCommandOptions {
                    dry_run,
                    tables,
                    destinations,
                    json,
                },
                cancel,
            )
            .await
        }
        Commands::Fill {
            table,
            start,
            end,
            destinations,
            dry_run,
        } => {
            commands::fill(
                &config,
                FillOptions {
                    table,
                    start,
                    end,
                    destinations,
                    dry_run,
                },
                cancel,
            )
            .await
        }
        Commands::WriteAbin {
            timestamp,
            version,
            description,
            payload_file,
        } => {
            commands::write_abin(
                &config,
                WriteAbinOptions {
                    timestamp,
                    version,
                    description,
                    payload_file,
                },
            )
            .await
        }
    }
}
