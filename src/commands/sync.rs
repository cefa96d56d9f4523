// ABOUTME: sync command - brings every configured destination up to the source
// ABOUTME: Runs sync_all over the selected tables and destinations and prints the summary

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::table::TableDescriptor;

pub struct SyncCommandOptions {
    pub dry_run: bool,
    /// Overrides the configured table list when non-empty
    pub tables: Vec<String>,
    /// Restricts destinations by name when non-empty
    pub destinations: Vec<String>,
    /// Print the full summary as JSON
    pub json: bool,
}

pub async fn sync(
    config: &Config,
    opts: SyncCommandOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let table_names = if opts.tables.is_empty() {
        &config.tables
    } else {
        &opts.tables
    };
    let tables = table_names
        .iter()
        .map(|name| TableDescriptor::new(name))
        .collect::<Result<Vec<_>>>()?;

    let endpoints = config.select_destinations(&opts.destinations)?;
    let destinations = super::connect_destinations(&endpoints).await;

    let synchronizer = super::build_synchronizer(config, opts.dry_run, cancel).await?;
    let summary = synchronizer.sync_all(&tables, &destinations).await;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for report in &summary.reports {
            let state = if report.zero_lag {
                "current".to_string()
            } else if report.dry_run {
                format!("would transfer {} chunks", report.planned.len())
            } else {
                format!("{} rows", report.rows_written())
            };
            println!(
                "{:<12} -> {:<12} {}{}",
                report.table,
                report.destination,
                state,
                if report.is_success() { "" } else { " (errors)" }
            );
        }
        println!(
            "{} pairs ok, {} rows, {} errors, {}ms",
            summary.tables_synced,
            summary.rows_synced,
            summary.errors.len(),
            summary.duration_ms
        );
        for error in &summary.errors {
            println!("  {}", error);
        }
    }

    if !summary.is_success() {
        bail!("Sync finished with {} errors", summary.errors.len());
    }
    Ok(())
}
