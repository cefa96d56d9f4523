// ABOUTME: Watermark probes - latest/earliest Timestamp and highest Id of a table in one store
// ABOUTME: Read fresh for every sync decision under the short probe timeout

use crate::error::StoreError;
use crate::store::{Store, ID_COLUMN, TIMESTAMP_COLUMN};
use crate::table::{TableClass, TableDescriptor};
use crate::time::Timestamp;
use crate::utils::with_timeout;
use serde::Serialize;
use std::time::Duration;

/// Most recent row already present in a store, for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Watermark {
    Time(Timestamp),
    Id(i64),
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Watermark::Time(ts) => write!(f, "Timestamp {}", ts),
            Watermark::Id(id) => write!(f, "Id {}", id),
        }
    }
}

async fn extreme(
    store: &dyn Store,
    table: &str,
    column: &str,
    descending: bool,
    timeout: Duration,
) -> Result<Option<i64>, StoreError> {
    let sql = store
        .dialect()
        .extreme_value_query(table, column, descending);
    let result = with_timeout(timeout, store.execute_query(&sql)).await?;
    Ok(result.first_i64(column))
}

/// Latest `Timestamp` (telemetry) or highest `Id` (binary) in `store`.
///
/// `None` when the table is empty.
pub async fn latest(
    store: &dyn Store,
    table: &TableDescriptor,
    timeout: Duration,
) -> Result<Option<Watermark>, StoreError> {
    let watermark = match table.class() {
        TableClass::AppendOnlyBinary => extreme(store, table.name(), ID_COLUMN, true, timeout)
            .await?
            .map(Watermark::Id),
        _ => extreme(store, table.name(), TIMESTAMP_COLUMN, true, timeout)
            .await?
            .map(|ts| Watermark::Time(Timestamp(ts))),
    };
    tracing::debug!(
        "Watermark of {} at '{}': {}",
        table.name(),
        store.name(),
        watermark.map(|w| w.to_string()).unwrap_or_else(|| "empty".to_string())
    );
    Ok(watermark)
}

/// Earliest `Timestamp` of a telemetry table, the start for an empty destination.
pub async fn earliest_timestamp(
    store: &dyn Store,
    table: &TableDescriptor,
    timeout: Duration,
) -> Result<Option<Timestamp>, StoreError> {
    Ok(extreme(store, table.name(), TIMESTAMP_COLUMN, false, timeout)
        .await?
        .map(Timestamp))
}
