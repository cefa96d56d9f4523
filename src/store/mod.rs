// ABOUTME: Store abstraction over source and destination databases
// ABOUTME: The core only issues SQL text through this trait; adapters own the connections

pub mod dialect;
pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod value;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{EndpointConfig, EndpointKind};
use crate::error::StoreError;

pub use dialect::{Dialect, InsertMode, ID_COLUMN, TIMESTAMP_COLUMN};
pub use mssql::MsSqlStore;
pub use mysql::MySqlStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use value::{ResultSet, Row, Value};

/// Legacy identifier truncation limit of the archive destinations.
pub const LEGACY_IDENTIFIER_LIMIT: usize = 30;

/// One addressable database, usable as replication source or destination.
///
/// Implementations acquire a connection for the duration of each call and
/// release it when the call returns, so no handle outlives an operation.
#[async_trait]
pub trait Store: Send + Sync {
    /// Name used in reports and logs.
    fn name(&self) -> &str;

    fn dialect(&self) -> Dialect;

    /// Longest column name the destination schema keeps before truncating.
    fn identifier_limit(&self) -> usize {
        LEGACY_IDENTIFIER_LIMIT
    }

    /// Run a query and return its rows column-major.
    async fn execute_query(&self, sql: &str) -> Result<ResultSet, StoreError>;

    /// Execute `statement` once per row inside one transaction, then commit.
    ///
    /// Returns the number of rows the engine reports as affected; a
    /// duplicate-tolerant insert that hits an existing key counts zero.
    async fn execute_batch(&self, statement: &str, rows: &[Row]) -> Result<u64, StoreError>;
}

/// Open a store described by configuration.
pub async fn connect(endpoint: &EndpointConfig) -> Result<Arc<dyn Store>> {
    let limit = endpoint.identifier_limit;
    let store: Arc<dyn Store> = match endpoint.kind {
        EndpointKind::Mysql => Arc::new(
            MySqlStore::connect(&endpoint.name, &endpoint.url)
                .with_context(|| format!("Failed to open MySQL endpoint '{}'", endpoint.name))?
                .with_identifier_limit(limit),
        ),
        EndpointKind::Mssql => Arc::new(
            MsSqlStore::connect(&endpoint.name, &endpoint.url, endpoint.allow_self_signed_certs)
                .with_context(|| {
                    format!("Failed to open SQL Server endpoint '{}'", endpoint.name)
                })?
                .with_identifier_limit(limit),
        ),
        EndpointKind::Postgres => Arc::new(
            PostgresStore::connect(&endpoint.name, &endpoint.url, endpoint.allow_self_signed_certs)
                .await
                .with_context(|| {
                    format!("Failed to open PostgreSQL endpoint '{}'", endpoint.name)
                })?
                .with_identifier_limit(limit),
        ),
        EndpointKind::Sqlite => Arc::new(
            SqliteStore::open(&endpoint.name, &endpoint.url)
                .with_context(|| format!("Failed to open SQLite endpoint '{}'", endpoint.name))?
                .with_identifier_limit(limit),
        ),
    };
    tracing::debug!(
        "Opened {:?} endpoint '{}' at {}",
        endpoint.kind,
        endpoint.name,
        crate::utils::sanitize_url(&endpoint.url)
    );
    Ok(store)
}

/// Open a store, or stand in an [`UnreachableStore`] when it cannot be opened.
///
/// Lets a destination that is down at startup fail its own pairs with
/// `DestinationUnavailable` instead of aborting the run.
pub async fn connect_or_unreachable(endpoint: &EndpointConfig) -> Arc<dyn Store> {
    match connect(endpoint).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Endpoint '{}' unavailable: {:#}", endpoint.name, e);
            Arc::new(UnreachableStore::new(
                &endpoint.name,
                endpoint.kind.dialect(),
                format!("{:#}", e),
            ))
        }
    }
}

/// A store whose every call fails as unavailable.
pub struct UnreachableStore {
    name: String,
    dialect: Dialect,
    reason: String,
}

impl UnreachableStore {
    pub fn new(name: &str, dialect: Dialect, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            dialect,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Store for UnreachableStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute_query(&self, _sql: &str) -> Result<ResultSet, StoreError> {
        Err(StoreError::Unavailable(self.reason.clone()))
    }

    async fn execute_batch(&self, _statement: &str, _rows: &[Row]) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable(self.reason.clone()))
    }
}
