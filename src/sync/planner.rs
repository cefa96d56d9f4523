// ABOUTME: ChunkPlanner - splits a transfer range into chunks by table class
// ABOUTME: Daily tables follow scan boundaries, monthly tables 30-day windows, abin one chunk

use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::SyncError;
use crate::scan_index::ScanIndexSource;
use crate::table::{TableClass, TableDescriptor, TransferRange};
use crate::time::{days_touched, Timestamp};

/// Width of a telemetry-monthly window, in days.
pub const MONTHLY_WINDOW_DAYS: i64 = 30;

/// One item produced by a plan.
#[derive(Debug)]
pub enum PlanStep {
    Chunk(TransferRange),
    /// A daily table's day with no usable scan index; not fatal.
    SkippedDay { day: NaiveDate, error: SyncError },
}

/// Position in a plan.
///
/// Cloning a cursor before advancing it gives a restart point.
#[derive(Debug, Clone)]
pub struct ChunkCursor {
    table: TableDescriptor,
    range: TransferRange,
    state: CursorState,
}

#[derive(Debug, Clone)]
enum CursorState {
    Single { emitted: bool },
    Windows { next: Timestamp, done: bool },
    Scans {
        days: VecDeque<NaiveDate>,
        pending: VecDeque<TransferRange>,
        covered_until: Timestamp,
        finished: bool,
    },
}

impl ChunkCursor {
    pub fn table(&self) -> &TableDescriptor {
        &self.table
    }

    pub fn range(&self) -> TransferRange {
        self.range
    }
}

/// Everything a plan produced, drained at once.
#[derive(Debug, Default)]
pub struct Plan {
    pub chunks: Vec<TransferRange>,
    pub skipped_days: Vec<(NaiveDate, SyncError)>,
}

pub struct ChunkPlanner {
    scan_index: Option<Arc<dyn ScanIndexSource>>,
}

impl ChunkPlanner {
    /// A planner for daily tables needs a scan index; without one every day
    /// of a daily table is reported as skipped.
    pub fn new(scan_index: Option<Arc<dyn ScanIndexSource>>) -> Self {
        Self { scan_index }
    }

    /// Start planning `range` for `table`.
    ///
    /// Only an inclusive range's last chunk carries the inclusive end.
    /// Daily coverage is scan-bounded: time before a day's first scan or
    /// after its terminal boundary is never planned.
    ///
    /// # Errors
    ///
    /// `InvalidRange` if the range shape does not suit the table class or
    /// a time range is inverted.
    pub fn plan(
        &self,
        table: &TableDescriptor,
        range: TransferRange,
    ) -> Result<ChunkCursor, SyncError> {
        range.check_class(table)?;
        let state = match (table.class(), range) {
            (TableClass::AppendOnlyBinary, _) => CursorState::Single { emitted: false },
            (TableClass::TelemetryMonthly, TransferRange::Time { start, .. }) => {
                CursorState::Windows {
                    next: start,
                    done: false,
                }
            }
            (TableClass::TelemetryDaily, TransferRange::Time { start, .. }) => CursorState::Scans {
                days: days_touched(start, scan_limit(&range)).into(),
                pending: VecDeque::new(),
                covered_until: start,
                finished: false,
            },
            (_, TransferRange::IdFloor { .. }) => {
                // Rejected by check_class above.
                CursorState::Single { emitted: true }
            }
        };
        Ok(ChunkCursor {
            table: table.clone(),
            range,
            state,
        })
    }

    /// Advance `cursor`; `None` once the plan is exhausted.
    pub async fn next_step(&self, cursor: &mut ChunkCursor) -> Option<PlanStep> {
        let range = cursor.range;
        match &mut cursor.state {
            CursorState::Single { emitted } => {
                if *emitted {
                    return None;
                }
                *emitted = true;
                Some(PlanStep::Chunk(range))
            }
            CursorState::Windows { next, done } => {
                let TransferRange::Time {
                    end, end_inclusive, ..
                } = range
                else {
                    return None;
                };
                if *done || (*next >= end && !end_inclusive) {
                    return None;
                }
                let window_end = next.plus_days(MONTHLY_WINDOW_DAYS);
                let chunk = if window_end >= end {
                    *done = true;
                    TransferRange::Time {
                        start: *next,
                        end,
                        end_inclusive,
                    }
                } else {
                    TransferRange::time(*next, window_end)
                };
                *next = window_end;
                Some(PlanStep::Chunk(chunk))
            }
            CursorState::Scans {
                days,
                pending,
                covered_until,
                finished,
            } => {
                let limit = scan_limit(&range);
                loop {
                    if let Some(chunk) = pending.pop_front() {
                        return Some(PlanStep::Chunk(close_at_limit(chunk, &range, limit)));
                    }
                    if *finished {
                        return None;
                    }
                    let day = days.pop_front()?;
                    match self.day_chunks(day, *covered_until, limit).await {
                        Ok(DayChunks { chunks, done }) => {
                            if let Some(TransferRange::Time { end, .. }) = chunks.last() {
                                *covered_until = *end;
                            }
                            pending.extend(chunks);
                            *finished = done;
                        }
                        Err(error) => {
                            tracing::warn!(
                                "Skipping {} for {}: {}",
                                day,
                                cursor.table.name(),
                                error
                            );
                            return Some(PlanStep::SkippedDay { day, error });
                        }
                    }
                }
            }
        }
    }

    /// Run a plan to the end.
    pub async fn collect(&self, mut cursor: ChunkCursor) -> Plan {
        let mut plan = Plan::default();
        while let Some(step) = self.next_step(&mut cursor).await {
            match step {
                PlanStep::Chunk(chunk) => plan.chunks.push(chunk),
                PlanStep::SkippedDay { day, error } => plan.skipped_days.push((day, error)),
            }
        }
        plan
    }

    /// Scan-aligned chunks of one day within `[from, end)`.
    async fn day_chunks(
        &self,
        day: NaiveDate,
        from: Timestamp,
        end: Timestamp,
    ) -> Result<DayChunks, SyncError> {
        let source = self
            .scan_index
            .as_ref()
            .ok_or_else(|| SyncError::ScanIndexUnavailable {
                day,
                reason: "no scan index source configured".to_string(),
            })?;
        let index = source
            .scan_index(day)
            .await?
            .ok_or_else(|| SyncError::ScanIndexUnavailable {
                day,
                reason: "no scan index for this day".to_string(),
            })?;

        let mut chunks = Vec::new();
        for scan in index.scans()? {
            if scan.end <= from {
                continue;
            }
            let start = scan.start.max(from);
            if start >= end {
                return Ok(DayChunks { chunks, done: true });
            }
            let stop = scan.end.min(end);
            if stop > start {
                chunks.push(TransferRange::time(start, stop));
            }
        }
        Ok(DayChunks {
            chunks,
            done: false,
        })
    }
}

/// Exclusive upper bound of a time range in whole seconds.
fn scan_limit(range: &TransferRange) -> Timestamp {
    match range {
        TransferRange::Time {
            end,
            end_inclusive: true,
            ..
        } => end.plus_seconds(1),
        TransferRange::Time { end, .. } => *end,
        TransferRange::IdFloor { .. } => Timestamp(i64::MAX),
    }
}

/// Give a scan chunk ending at the limit the range's own inclusive end.
fn close_at_limit(chunk: TransferRange, range: &TransferRange, limit: Timestamp) -> TransferRange {
    match (chunk, range) {
        (
            TransferRange::Time { start, end, .. },
            TransferRange::Time {
                end: range_end,
                end_inclusive: true,
                ..
            },
        ) if end == limit => TransferRange::time_through(start, *range_end),
        _ => chunk,
    }
}

struct DayChunks {
    chunks: Vec<TransferRange>,
    done: bool,
}
