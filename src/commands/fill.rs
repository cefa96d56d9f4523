// ABOUTME: fill command - transfers an explicit range of one table to selected destinations
// ABOUTME: Telemetry tables take a time window; abin derives its Id floor per destination

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::table::{TableDescriptor, TransferRange};
use crate::time::Timestamp;

pub struct FillOptions {
    pub table: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub destinations: Vec<String>,
    pub dry_run: bool,
}

/// Range for `table` from the command line, or `None` to derive it.
pub fn explicit_range(
    table: &TableDescriptor,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Option<TransferRange>> {
    match (table.class().is_telemetry(), start, end) {
        (true, Some(start), Some(end)) => {
            if end < start {
                bail!("--end {} is before --start {}", end, start);
            }
            Ok(Some(TransferRange::time(
                Timestamp::from_datetime(start),
                Timestamp::from_datetime(end),
            )))
        }
        (true, None, None) => Ok(None),
        (true, _, _) => bail!("--start and --end must be given together"),
        (false, None, None) => Ok(None),
        (false, _, _) => bail!(
            "{} is keyed by Id; its range is derived from each destination",
            table.name()
        ),
    }
}

pub async fn fill(config: &Config, opts: FillOptions, cancel: CancellationToken) -> Result<()> {
    let table = TableDescriptor::new(&opts.table)?;
    let range = explicit_range(&table, opts.start, opts.end)?;

    let endpoints = config.select_destinations(&opts.destinations)?;
    let destinations = super::connect_destinations(&endpoints).await;
    let synchronizer = super::build_synchronizer(config, opts.dry_run, cancel).await?;

    let mut errors = Vec::new();
    for destination in &destinations {
        let report = synchronizer
            .sync_table(&table, destination.as_ref(), range)
            .await;
        if report.dry_run {
            println!(
                "{} -> {}: would transfer {} chunks",
                report.table,
                report.destination,
                report.planned.len()
            );
            for chunk in &report.planned {
                println!("  {}", chunk);
            }
        } else {
            println!(
                "{} -> {}: {} rows in {} chunks",
                report.table,
                report.destination,
                report.rows_written(),
                report.chunks.len()
            );
        }
        for skipped in &report.skipped_days {
            println!("  skipped {}: {}", skipped.day, skipped.error);
        }
        errors.extend(
            report
                .errors()
                .map(|e| format!("{}: {}: {}", report.destination, e.kind(), e)),
        );
    }

    if !errors.is_empty() {
        for error in &errors {
            eprintln!("{}", error);
        }
        bail!("Fill finished with {} errors", errors.len());
    }
    Ok(())
}
