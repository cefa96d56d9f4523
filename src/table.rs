// ABOUTME: Table descriptors with their chunking class, and the ranges a transfer covers
// ABOUTME: Class is resolved once from the table name; call sites dispatch on the enum

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::Timestamp;

/// How a table is identified, queried, and split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableClass {
    /// Stateframe tables (`f...`): per-day chunks aligned to scan boundaries.
    TelemetryDaily,
    /// Scan header tables (`h...`): fixed 30-day windows.
    TelemetryMonthly,
    /// Calibration blobs (`abin`): keyed by monotonically increasing `Id`.
    AppendOnlyBinary,
}

impl TableClass {
    /// Derive the class from the first character of a table name.
    pub fn from_table_name(name: &str) -> Self {
        match name.chars().next() {
            Some('f') => TableClass::TelemetryDaily,
            Some('h') => TableClass::TelemetryMonthly,
            _ => TableClass::AppendOnlyBinary,
        }
    }

    pub fn is_telemetry(self) -> bool {
        !matches!(self, TableClass::AppendOnlyBinary)
    }
}

impl fmt::Display for TableClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableClass::TelemetryDaily => "telemetry-daily",
            TableClass::TelemetryMonthly => "telemetry-monthly",
            TableClass::AppendOnlyBinary => "append-only-binary",
        };
        f.write_str(name)
    }
}

/// A table name paired with its class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableDescriptor {
    name: String,
    class: TableClass,
}

impl TableDescriptor {
    /// Build a descriptor, validating the name as a plain SQL identifier.
    pub fn new(name: &str) -> anyhow::Result<Self> {
        crate::utils::validate_identifier(name)?;
        Ok(Self {
            name: name.to_string(),
            class: TableClass::from_table_name(name),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> TableClass {
        self.class
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The rows a transfer covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferRange {
    /// `[start, end)` over the `Timestamp` column, or `[start, end]` when
    /// `end_inclusive` is set.
    Time {
        start: Timestamp,
        end: Timestamp,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        end_inclusive: bool,
    },
    /// Every row with `Id` strictly greater than the floor.
    IdFloor { floor: i64 },
}

impl TransferRange {
    pub fn time(start: Timestamp, end: Timestamp) -> Self {
        TransferRange::Time {
            start,
            end,
            end_inclusive: false,
        }
    }

    /// `[start, end]`: the row at `end` itself belongs to the range.
    pub fn time_through(start: Timestamp, end: Timestamp) -> Self {
        TransferRange::Time {
            start,
            end,
            end_inclusive: true,
        }
    }

    pub fn id_floor(floor: i64) -> Self {
        TransferRange::IdFloor { floor }
    }

    /// True for time ranges that cannot contain a row.
    pub fn is_empty(&self) -> bool {
        match self {
            TransferRange::Time {
                start,
                end,
                end_inclusive,
            } => end < start || (end == start && !end_inclusive),
            TransferRange::IdFloor { .. } => false,
        }
    }

    /// Check the range shape against the table class.
    pub fn check_class(&self, table: &TableDescriptor) -> Result<(), crate::error::SyncError> {
        let reason = match (self, table.class()) {
            (TransferRange::IdFloor { .. }, class) if class.is_telemetry() => {
                Some(format!("{} tables take a time range, not an id floor", class))
            }
            (TransferRange::Time { .. }, TableClass::AppendOnlyBinary) => {
                Some("append-only-binary tables take an id floor, not a time range".to_string())
            }
            (TransferRange::Time { start, end, .. }, _) if start > end => {
                Some(format!("start {} is after end {}", start, end))
            }
            _ => None,
        };
        match reason {
            Some(reason) => Err(crate::error::SyncError::InvalidRange {
                table: table.name().to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for TransferRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferRange::Time {
                start,
                end,
                end_inclusive: false,
            } => write!(f, "[{}, {})", start, end),
            TransferRange::Time {
                start,
                end,
                end_inclusive: true,
            } => write!(f, "[{}, {}]", start, end),
            TransferRange::IdFloor { floor } => write!(f, "(Id > {})", floor),
        }
    }
}
