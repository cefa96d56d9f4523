// ABOUTME: Typed error kinds for schema resolution, planning, transfer and triple writes
// ABOUTME: Every failure carries its table/destination/range context for the caller to report

use chrono::NaiveDate;
use thiserror::Error;

use crate::table::TransferRange;

/// Errors produced by the replication core.
///
/// Schema and source-read errors abort one (table, destination) pair; write
/// errors abort one chunk; scan index errors skip one day. None of them abort
/// sibling pairs, so callers usually find these inside a report rather than
/// as an early return.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("table '{table}' not found in schema definitions")]
    SchemaNotFound { table: String },

    #[error("schema definition for '{table}' is malformed at line {line}: {reason}")]
    SchemaMalformed {
        table: String,
        line: usize,
        reason: String,
    },

    /// Non-fatal: the day is skipped and reported.
    #[error("scan index for {day} unavailable: {reason}")]
    ScanIndexUnavailable { day: NaiveDate, reason: String },

    #[error("failed to read {table} from source{}: {message}", fmt_range(.range))]
    SourceReadError {
        table: String,
        range: Option<TransferRange>,
        message: String,
    },

    /// Timeout or connect failure. Retrying the whole run later is safe.
    #[error("destination '{destination}' unavailable for {table}: {message}")]
    DestinationUnavailable {
        destination: String,
        table: String,
        message: String,
    },

    /// The destination answered but its watermark query failed (missing
    /// table, type mismatch). Re-running will fail the same way.
    #[error("failed to read watermark of {table} at '{destination}': {message}")]
    DestinationReadError {
        destination: String,
        table: String,
        message: String,
    },

    #[error("failed to write {table} to '{destination}'{}: {message}", fmt_range(.range))]
    DestinationWriteError {
        destination: String,
        table: String,
        range: Option<TransferRange>,
        message: String,
    },

    #[error("invalid range for {table}: {reason}")]
    InvalidRange { table: String, reason: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cancelled before {0}")]
    Cancelled(String),
}

impl SyncError {
    /// Whether the condition is transient (the scheduler may simply re-run).
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::DestinationUnavailable { .. })
    }

    /// Short machine-readable kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::SchemaNotFound { .. } => "SchemaNotFound",
            SyncError::SchemaMalformed { .. } => "SchemaMalformed",
            SyncError::ScanIndexUnavailable { .. } => "ScanIndexUnavailable",
            SyncError::SourceReadError { .. } => "SourceReadError",
            SyncError::DestinationUnavailable { .. } => "DestinationUnavailable",
            SyncError::DestinationReadError { .. } => "DestinationReadError",
            SyncError::DestinationWriteError { .. } => "DestinationWriteError",
            SyncError::InvalidRange { .. } => "InvalidRange",
            SyncError::Validation(_) => "ValidationError",
            SyncError::Cancelled(_) => "Cancelled",
        }
    }
}

fn fmt_range(range: &Option<TransferRange>) -> String {
    match range {
        Some(range) => format!(" in {}", range),
        None => String::new(),
    }
}

/// Errors reported by a [`Store`](crate::store::Store) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection could not be acquired or was lost.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The statement reached the server and failed there.
    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Serialize an optional error as `<kind>: <message>`.
pub(crate) fn serialize_error<S>(error: &Option<SyncError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&format!("{}: {}", e.kind(), e)),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn serialize_sync_error<S>(error: &SyncError, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{}: {}", error.kind(), error))
}
