// ABOUTME: TransferEngine - moves one chunk from the source to one destination
// ABOUTME: Reads the chunk, trims null padding, inserts in duplicate-tolerant batches of <=100

use serde::Serialize;
use std::sync::Arc;

use crate::config::{Timeouts, MAX_BATCH_SIZE};
use crate::error::{SyncError, StoreError};
use crate::schema::ColumnList;
use crate::store::{InsertMode, Row, Store};
use crate::table::{TableClass, TableDescriptor, TransferRange};
use crate::utils::with_timeout;

/// Result of one chunk transfer.
#[derive(Debug, Serialize)]
pub struct TransferOutcome {
    pub range: TransferRange,
    pub rows_read: u64,
    /// Rows the destination reports as inserted; duplicates count zero.
    pub rows_written: u64,
    pub batches_committed: usize,
    #[serde(serialize_with = "crate::error::serialize_error")]
    pub error: Option<SyncError>,
}

impl TransferOutcome {
    fn new(range: TransferRange) -> Self {
        Self {
            range,
            rows_read: 0,
            rows_written: 0,
            batches_committed: 0,
            error: None,
        }
    }

    fn failed(mut self, error: SyncError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Executes chunk transfers against one source.
pub struct TransferEngine {
    source: Arc<dyn Store>,
    timeouts: Timeouts,
    batch_size: usize,
}

impl TransferEngine {
    /// `batch_size` is clamped to `1..=100`.
    pub fn new(source: Arc<dyn Store>, timeouts: Timeouts, batch_size: usize) -> Self {
        Self {
            source,
            timeouts,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    pub fn source(&self) -> &Arc<dyn Store> {
        &self.source
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Copy the rows of `table` in `range` to `destination`.
    ///
    /// A source failure fails the chunk before any write. A batch failure
    /// stops the chunk; batches committed before it stay committed.
    pub async fn transfer(
        &self,
        table: &TableDescriptor,
        range: &TransferRange,
        columns: &ColumnList,
        destination: &dyn Store,
    ) -> TransferOutcome {
        let outcome = TransferOutcome::new(*range);
        let write_error = |message: String| SyncError::DestinationWriteError {
            destination: destination.name().to_string(),
            table: table.name().to_string(),
            range: Some(*range),
            message,
        };

        let dest_columns = columns.destination_names(destination.identifier_limit());
        let Some(insert) = destination.dialect().insert_statement(
            table.name(),
            &dest_columns,
            InsertMode::IgnoreDuplicates,
        ) else {
            return outcome.failed(write_error(format!(
                "{:?} has no duplicate-tolerant insert",
                destination.dialect()
            )));
        };

        let rows = match self.read(table, range, columns).await {
            Ok(rows) => rows,
            Err(e) => return outcome.failed(e),
        };
        let mut outcome = outcome;
        outcome.rows_read = rows.len() as u64;
        tracing::debug!(
            "Read {} rows of {} in {}",
            rows.len(),
            table.name(),
            range
        );

        for batch in rows.chunks(self.batch_size) {
            match with_timeout(self.timeouts.bulk, destination.execute_batch(&insert, batch)).await
            {
                Ok(affected) => {
                    outcome.rows_written += affected;
                    outcome.batches_committed += 1;
                }
                Err(e) => {
                    let error = if e.is_unavailable() {
                        SyncError::DestinationUnavailable {
                            destination: destination.name().to_string(),
                            table: table.name().to_string(),
                            message: e.to_string(),
                        }
                    } else {
                        write_error(format!(
                            "batch {} failed after {} committed rows: {}",
                            outcome.batches_committed + 1,
                            outcome.rows_written,
                            e
                        ))
                    };
                    return outcome.failed(error);
                }
            }
        }

        tracing::info!(
            "Transferred {} of {} rows of {} in {} to '{}' ({} batches)",
            outcome.rows_written,
            outcome.rows_read,
            table.name(),
            range,
            destination.name(),
            outcome.batches_committed
        );
        outcome
    }

    /// Read a chunk from the source, null padding trimmed.
    async fn read(
        &self,
        table: &TableDescriptor,
        range: &TransferRange,
        columns: &ColumnList,
    ) -> Result<Vec<Row>, SyncError> {
        let read_error = |message: String| SyncError::SourceReadError {
            table: table.name().to_string(),
            range: Some(*range),
            message,
        };

        let large_payload = table.class() == TableClass::AppendOnlyBinary;
        let select = self.source.dialect().select_statement(
            table.name(),
            columns.names(),
            range,
            large_payload,
        );
        let mut result = with_timeout(self.timeouts.bulk, self.source.execute_query(&select))
            .await
            .map_err(|e: StoreError| read_error(e.to_string()))?;

        if !result.is_empty() && result.columns().len() != columns.len() {
            return Err(read_error(format!(
                "expected {} columns, source returned {}",
                columns.len(),
                result.columns().len()
            )));
        }
        result.trim_null_padding();
        Ok(result.into_rows())
    }
}
