// ABOUTME: TripleWriter - validates one calibration record and writes it to three stores
// ABOUTME: Each destination is attempted independently; failures are collected, never rolled back

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SyncError;
use crate::store::{InsertMode, Store, Value};
use crate::time::Timestamp;
use crate::utils::with_timeout;

/// Table the calibration records are written to.
pub const ABIN_TABLE: &str = "abin";

const ABIN_COLUMNS: [&str; 4] = ["Timestamp", "Version", "Description", "Bin"];

/// Inclusive range of accepted record versions.
pub const VERSION_RANGE: std::ops::RangeInclusive<f64> = 1.0..=20.0;

/// Description tags the calibration header knows about.
#[derive(Debug, Clone, Default)]
pub struct KnownTags(BTreeSet<String>);

impl KnownTags {
    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }
}

impl<S: Into<String>> FromIterator<S> for KnownTags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        KnownTags(iter.into_iter().map(Into::into).collect())
    }
}

/// A record as submitted, before validation.
#[derive(Debug, Clone)]
pub struct TripleWriteRequest {
    /// LabVIEW time, seconds
    pub timestamp: f64,
    pub version: f64,
    pub description: String,
    pub payload: Vec<u8>,
}

/// A record that passed validation.
#[derive(Debug, Clone)]
pub struct TripleWriteRecord {
    timestamp: f64,
    version: f64,
    description: String,
    payload: Vec<u8>,
}

impl TripleWriteRecord {
    /// Check timestamp, version and description.
    ///
    /// # Errors
    ///
    /// `SyncError::Validation` naming the first check that failed.
    pub fn validate(request: TripleWriteRequest, tags: &KnownTags) -> Result<Self, SyncError> {
        if Timestamp::from_lv_seconds(request.timestamp).is_none() {
            return Err(SyncError::Validation(format!(
                "could not interpret {} as a LabVIEW time",
                request.timestamp
            )));
        }
        if !VERSION_RANGE.contains(&request.version) {
            return Err(SyncError::Validation(format!(
                "version {} is not in the expected range {}-{}",
                request.version,
                VERSION_RANGE.start(),
                VERSION_RANGE.end()
            )));
        }
        if !tags.contains(&request.description) {
            return Err(SyncError::Validation(format!(
                "description '{}' is not one of the known descriptions",
                request.description
            )));
        }
        Ok(Self {
            timestamp: request.timestamp,
            version: request.version,
            description: request.description,
            payload: request.payload,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    fn row(&self) -> Vec<Value> {
        vec![
            Value::Float(self.timestamp),
            Value::Float(self.version),
            Value::Text(self.description.clone()),
            Value::Bytes(self.payload.clone()),
        ]
    }
}

/// Result of the write at one destination.
#[derive(Debug, Clone, Serialize)]
pub struct DestinationResult {
    pub destination: String,
    /// Failure reason, `None` on success
    pub error: Option<String>,
}

/// Combined outcome of a triple write.
///
/// Displays as `Success`, or as one
/// `Could not send abin record to <destination>: <reason>; ` per failure.
#[derive(Debug, Clone, Serialize)]
pub struct TripleWriteStatus {
    pub results: Vec<DestinationResult>,
}

impl TripleWriteStatus {
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DestinationResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

impl fmt::Display for TripleWriteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            return f.write_str("Success");
        }
        for failure in self.failures() {
            write!(
                f,
                "Could not send abin record to {}: {}; ",
                failure.destination,
                failure.error.as_deref().unwrap_or_default()
            )?;
        }
        Ok(())
    }
}

/// Writes single records to the authoritative store and two replicas.
pub struct TripleWriter {
    destinations: [Arc<dyn Store>; 3],
    tags: KnownTags,
    timeout: Duration,
}

impl TripleWriter {
    pub fn new(
        authoritative: Arc<dyn Store>,
        replicas: [Arc<dyn Store>; 2],
        tags: KnownTags,
        timeout: Duration,
    ) -> Self {
        let [first, second] = replicas;
        Self {
            destinations: [authoritative, first, second],
            tags,
            timeout,
        }
    }

    /// Validate `request`, then write it to each destination in turn.
    ///
    /// # Errors
    ///
    /// `SyncError::Validation` when the record is rejected; nothing has been
    /// written in that case. Write failures are reported in the status.
    pub async fn submit(&self, request: TripleWriteRequest) -> Result<TripleWriteStatus, SyncError> {
        let record = TripleWriteRecord::validate(request, &self.tags)?;
        let row = record.row();
        let columns: Vec<String> = ABIN_COLUMNS.iter().map(|c| c.to_string()).collect();

        let mut results = Vec::with_capacity(self.destinations.len());
        for destination in &self.destinations {
            let error = match destination
                .dialect()
                .insert_statement(ABIN_TABLE, &columns, InsertMode::Plain)
            {
                Some(insert) => with_timeout(
                    self.timeout,
                    destination.execute_batch(&insert, std::slice::from_ref(&row)),
                )
                .await
                .err()
                .map(|e| e.to_string()),
                None => Some("no insert form for this engine".to_string()),
            };
            match &error {
                None => tracing::info!(
                    "Sent {} abin record to '{}'",
                    record.description(),
                    destination.name()
                ),
                Some(reason) => tracing::error!(
                    "Could not send abin record to '{}': {}",
                    destination.name(),
                    reason
                ),
            }
            results.push(DestinationResult {
                destination: destination.name().to_string(),
                error,
            });
        }
        Ok(TripleWriteStatus { results })
    }
}
