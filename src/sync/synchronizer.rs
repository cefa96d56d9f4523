// ABOUTME: Synchronizer - derives each (table, destination) lag and drives planner and engine
// ABOUTME: Failures are recorded per chunk and per pair; one pair never blocks another

use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::engine::{TransferEngine, TransferOutcome};
use super::planner::{ChunkPlanner, PlanStep};
use super::watermark::{self, Watermark};
use crate::config::Timeouts;
use crate::error::{StoreError, SyncError};
use crate::schema::SchemaCatalog;
use crate::store::Store;
use crate::table::{TableClass, TableDescriptor, TransferRange};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Plan and report without transferring
    pub dry_run: bool,
    /// Sync destinations concurrently in `sync_all`
    pub parallel_destinations: bool,
}

/// A daily-table day left out of a plan.
#[derive(Debug, Serialize)]
pub struct SkippedDay {
    pub day: NaiveDate,
    #[serde(serialize_with = "crate::error::serialize_sync_error")]
    pub error: SyncError,
}

/// Outcome of syncing one table to one destination.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub table: String,
    pub destination: String,
    pub source_watermark: Option<Watermark>,
    pub destination_watermark: Option<Watermark>,
    /// Range transferred (or that would be, in a dry run)
    pub range: Option<TransferRange>,
    pub zero_lag: bool,
    pub dry_run: bool,
    /// Chunks a dry run would transfer
    pub planned: Vec<TransferRange>,
    pub chunks: Vec<TransferOutcome>,
    pub skipped_days: Vec<SkippedDay>,
    /// Failure that stopped the pair before or between chunks
    #[serde(serialize_with = "crate::error::serialize_error")]
    pub error: Option<SyncError>,
    pub cancelled: bool,
}

impl SyncReport {
    fn new(table: &TableDescriptor, destination: &str, dry_run: bool) -> Self {
        Self {
            table: table.name().to_string(),
            destination: destination.to_string(),
            source_watermark: None,
            destination_watermark: None,
            range: None,
            zero_lag: false,
            dry_run,
            planned: Vec::new(),
            chunks: Vec::new(),
            skipped_days: Vec::new(),
            error: None,
            cancelled: false,
        }
    }

    fn failed(mut self, error: SyncError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn rows_written(&self) -> u64 {
        self.chunks.iter().map(|c| c.rows_written).sum()
    }

    pub fn rows_read(&self) -> u64 {
        self.chunks.iter().map(|c| c.rows_read).sum()
    }

    /// Every failure in the report: the pair-level one and each failed chunk.
    pub fn errors(&self) -> impl Iterator<Item = &SyncError> {
        self.error
            .iter()
            .chain(self.chunks.iter().filter_map(|c| c.error.as_ref()))
    }

    /// True when nothing failed; skipped days do not count as failures.
    pub fn is_success(&self) -> bool {
        self.errors().next().is_none()
    }
}

/// Totals over a `sync_all` run.
#[derive(Debug, Default, Serialize)]
pub struct SyncSummary {
    pub tables_synced: usize,
    pub rows_synced: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub reports: Vec<SyncReport>,
}

impl SyncSummary {
    fn from_reports(reports: Vec<SyncReport>, started: Instant) -> Self {
        let mut summary = SyncSummary {
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        };
        for report in &reports {
            if report.is_success() {
                summary.tables_synced += 1;
            }
            summary.rows_synced += report.rows_written();
            summary.errors.extend(report.errors().map(|e| {
                format!(
                    "{} -> {}: {}: {}",
                    report.table,
                    report.destination,
                    e.kind(),
                    e
                )
            }));
        }
        summary.reports = reports;
        summary
    }

    /// Check if every pair completed without errors.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Keeps destinations current with one source.
///
/// Watermarks are read fresh for every pair. The only state kept between
/// calls is the highest destination watermark seen per pair, so a
/// regressed destination is reported as zero lag instead of re-planned.
pub struct Synchronizer {
    source: Arc<dyn Store>,
    catalog: Arc<SchemaCatalog>,
    planner: ChunkPlanner,
    engine: TransferEngine,
    timeouts: Timeouts,
    options: SyncOptions,
    cancel: CancellationToken,
    observed: Mutex<HashMap<(String, String), Watermark>>,
}

impl Synchronizer {
    pub fn new(
        source: Arc<dyn Store>,
        catalog: Arc<SchemaCatalog>,
        planner: ChunkPlanner,
        timeouts: Timeouts,
        batch_size: usize,
    ) -> Self {
        let engine = TransferEngine::new(Arc::clone(&source), timeouts, batch_size);
        Self {
            source,
            catalog,
            planner,
            engine,
            timeouts,
            options: SyncOptions::default(),
            cancel: CancellationToken::new(),
            observed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Honor `token` between chunks and between pairs.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sync one table to one destination.
    ///
    /// Without `explicit`, the range runs from the destination watermark
    /// through the source watermark, both ends included (telemetry), or
    /// above the destination's highest `Id` (binary).
    pub async fn sync_table(
        &self,
        table: &TableDescriptor,
        destination: &dyn Store,
        explicit: Option<TransferRange>,
    ) -> SyncReport {
        let mut report = SyncReport::new(table, destination.name(), self.options.dry_run);
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return report.failed(SyncError::Cancelled(format!(
                "syncing {} to '{}'",
                table.name(),
                destination.name()
            )));
        }

        let columns = match self.catalog.resolve(table.name()) {
            Ok(columns) => columns,
            Err(e) => return report.failed(e),
        };

        let range = match explicit {
            Some(range) => match range.check_class(table) {
                Ok(()) => range,
                Err(e) => return report.failed(e),
            },
            None => match self.derive_range(table, destination, &mut report).await {
                Ok(Some(range)) => range,
                Ok(None) => {
                    report.zero_lag = true;
                    tracing::info!(
                        "{} is current at '{}', nothing to transfer",
                        table.name(),
                        destination.name()
                    );
                    return report;
                }
                Err(e) => return report.failed(e),
            },
        };
        report.range = Some(range);

        let mut cursor = match self.planner.plan(table, range) {
            Ok(cursor) => cursor,
            Err(e) => return report.failed(e),
        };

        if self.options.dry_run {
            let plan = self.planner.collect(cursor).await;
            tracing::info!(
                "Dry run: {} to '{}' would transfer {} in {} chunks",
                table.name(),
                destination.name(),
                range,
                plan.chunks.len()
            );
            report.planned = plan.chunks;
            report.skipped_days = plan
                .skipped_days
                .into_iter()
                .map(|(day, error)| SkippedDay { day, error })
                .collect();
            return report;
        }

        tracing::info!(
            "Syncing {} to '{}' over {}",
            table.name(),
            destination.name(),
            range
        );
        while let Some(step) = self.planner.next_step(&mut cursor).await {
            match step {
                PlanStep::SkippedDay { day, error } => {
                    report.skipped_days.push(SkippedDay { day, error });
                }
                PlanStep::Chunk(chunk) => {
                    if self.cancel.is_cancelled() {
                        tracing::warn!(
                            "Cancelled {} to '{}' before chunk {}",
                            table.name(),
                            destination.name(),
                            chunk
                        );
                        report.cancelled = true;
                        report.error = Some(SyncError::Cancelled(format!("chunk {}", chunk)));
                        break;
                    }
                    let outcome = self
                        .engine
                        .transfer(table, &chunk, &columns, destination)
                        .await;
                    if let Some(e) = &outcome.error {
                        tracing::warn!("Chunk {} of {} failed: {}", chunk, table.name(), e);
                    }
                    report.chunks.push(outcome);
                }
            }
        }

        tracing::info!(
            "Finished {} to '{}': {} rows in {} chunks ({} failed, {} days skipped)",
            table.name(),
            destination.name(),
            report.rows_written(),
            report.chunks.len(),
            report.chunks.iter().filter(|c| !c.is_success()).count(),
            report.skipped_days.len()
        );
        report
    }

    /// Range still missing at `destination`, or `None` when it is current.
    async fn derive_range(
        &self,
        table: &TableDescriptor,
        destination: &dyn Store,
        report: &mut SyncReport,
    ) -> Result<Option<TransferRange>, SyncError> {
        let probe = self.timeouts.probe;
        let source_error = |e: StoreError| SyncError::SourceReadError {
            table: table.name().to_string(),
            range: None,
            message: e.to_string(),
        };
        let destination_error = |e: StoreError| {
            let (destination, table, message) = (
                destination.name().to_string(),
                table.name().to_string(),
                e.to_string(),
            );
            if e.is_unavailable() {
                SyncError::DestinationUnavailable {
                    destination,
                    table,
                    message,
                }
            } else {
                SyncError::DestinationReadError {
                    destination,
                    table,
                    message,
                }
            }
        };

        let source_mark = watermark::latest(self.source.as_ref(), table, probe)
            .await
            .map_err(source_error)?;
        let dest_mark = watermark::latest(destination, table, probe)
            .await
            .map_err(destination_error)?;
        report.source_watermark = source_mark;
        report.destination_watermark = dest_mark;

        if self.regressed(table, destination.name(), dest_mark) {
            return Ok(None);
        }

        let range = match (table.class(), source_mark, dest_mark) {
            (_, None, _) => None,
            (TableClass::AppendOnlyBinary, Some(Watermark::Id(source_max)), dest) => {
                let floor = match dest {
                    Some(Watermark::Id(id)) => id,
                    _ => 0,
                };
                (source_max > floor).then(|| TransferRange::id_floor(floor))
            }
            (_, Some(Watermark::Time(source_ts)), Some(Watermark::Time(dest_ts))) => {
                (dest_ts < source_ts).then(|| TransferRange::time_through(dest_ts, source_ts))
            }
            (_, Some(Watermark::Time(source_ts)), None) => {
                let start = watermark::earliest_timestamp(self.source.as_ref(), table, probe)
                    .await
                    .map_err(source_error)?
                    .unwrap_or(source_ts);
                Some(TransferRange::time_through(start, source_ts))
            }
            _ => None,
        };
        Ok(range)
    }

    /// Record `current` and report whether it is below a watermark seen earlier.
    fn regressed(&self, table: &TableDescriptor, destination: &str, current: Option<Watermark>) -> bool {
        let Ok(mut observed) = self.observed.lock() else {
            return false;
        };
        let key = (table.name().to_string(), destination.to_string());
        match (observed.get(&key).copied(), current) {
            (Some(previous), Some(now)) if now < previous => {
                tracing::warn!(
                    "Watermark of {} at '{}' went back from {} to {}; treating as current",
                    table.name(),
                    destination,
                    previous,
                    now
                );
                true
            }
            (Some(_), None) => {
                tracing::warn!(
                    "{} at '{}' is now empty after holding rows; treating as current",
                    table.name(),
                    destination
                );
                true
            }
            (_, Some(now)) => {
                observed.insert(key, now);
                false
            }
            (None, None) => false,
        }
    }

    /// Sync every table to every destination.
    ///
    /// Pairs are independent: a failure is recorded in its report and the
    /// next pair is attempted.
    pub async fn sync_all(
        &self,
        tables: &[TableDescriptor],
        destinations: &[Arc<dyn Store>],
    ) -> SyncSummary {
        let started = Instant::now();
        tracing::info!(
            "Starting sync of {} tables to {} destinations{}",
            tables.len(),
            destinations.len(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        let reports: Vec<SyncReport> = if self.options.parallel_destinations {
            join_all(
                destinations
                    .iter()
                    .map(|destination| self.sync_destination(tables, destination.as_ref())),
            )
            .await
            .into_iter()
            .flatten()
            .collect()
        } else {
            let mut reports = Vec::new();
            for destination in destinations {
                reports.extend(self.sync_destination(tables, destination.as_ref()).await);
            }
            reports
        };

        let summary = SyncSummary::from_reports(reports, started);
        if summary.is_success() {
            tracing::info!(
                "Sync complete: {} pairs, {} rows in {}ms",
                summary.tables_synced,
                summary.rows_synced,
                summary.duration_ms
            );
        } else {
            tracing::warn!(
                "Sync finished with {} errors: {} pairs ok, {} rows in {}ms",
                summary.errors.len(),
                summary.tables_synced,
                summary.rows_synced,
                summary.duration_ms
            );
        }
        summary
    }

    async fn sync_destination(
        &self,
        tables: &[TableDescriptor],
        destination: &dyn Store,
    ) -> Vec<SyncReport> {
        let mut reports = Vec::with_capacity(tables.len());
        for table in tables {
            let report = self.sync_table(table, destination, None).await;
            if let Some(e) = &report.error {
                tracing::warn!(
                    "{} to '{}' failed ({}): {}",
                    table.name(),
                    destination.name(),
                    e.kind(),
                    e
                );
            }
            reports.push(report);
        }
        reports
    }
}
