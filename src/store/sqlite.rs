// ABOUTME: SQLite store adapter backed by rusqlite
// ABOUTME: Calls run on the blocking pool behind a mutex; used for local archives and tests

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use super::{Dialect, ResultSet, Row, Store, Value, LEGACY_IDENTIFIER_LIMIT};
use crate::error::StoreError;

/// A SQLite database file (or in-memory database).
pub struct SqliteStore {
    name: String,
    conn: Arc<Mutex<Connection>>,
    identifier_limit: usize,
}

impl SqliteStore {
    /// Open a database file, creating it if needed.
    ///
    /// Accepts a plain path or a `sqlite://` URL.
    pub fn open(name: &str, path: &str) -> Result<Self> {
        let path = path.strip_prefix("sqlite://").unwrap_or(path);
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database '{}'", path))?;
        Ok(Self::from_connection(name, conn))
    }

    pub fn open_in_memory(name: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Ok(Self::from_connection(name, conn))
    }

    fn from_connection(name: &str, conn: Connection) -> Self {
        Self {
            name: name.to_string(),
            conn: Arc::new(Mutex::new(conn)),
            identifier_limit: LEGACY_IDENTIFIER_LIMIT,
        }
    }

    pub fn with_identifier_limit(mut self, limit: usize) -> Self {
        self.identifier_limit = limit;
        self
    }

    /// Run DDL or seed statements directly (setup and tests).
    pub fn execute_script(&self, sql: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection mutex poisoned"))?;
        conn.execute_batch(sql)
            .with_context(|| format!("Failed to execute script on '{}'", self.name))?;
        Ok(())
    }

    async fn run_blocking<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))?;
            work(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {}", e)))?
    }
}

fn query_error(e: rusqlite::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Int(v),
        SqlValue::Real(v) => Value::Float(v),
        SqlValue::Text(v) => Value::Text(v),
        SqlValue::Blob(v) => Value::Bytes(v),
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Bytes(v) => SqlValue::Blob(v.clone()),
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn identifier_limit(&self) -> usize {
        self.identifier_limit
    }

    async fn execute_query(&self, sql: &str) -> Result<ResultSet, StoreError> {
        let sql = sql.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(query_error)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let width = columns.len();
            let rows = stmt
                .query_map([], |row| {
                    (0..width)
                        .map(|idx| row.get::<_, SqlValue>(idx).map(from_sql))
                        .collect::<rusqlite::Result<Row>>()
                })
                .map_err(query_error)?
                .collect::<rusqlite::Result<Vec<Row>>>()
                .map_err(query_error)?;
            Ok(ResultSet::from_rows(columns, rows))
        })
        .await
    }

    async fn execute_batch(&self, statement: &str, rows: &[Row]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let statement = statement.to_string();
        let params: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|row| row.iter().map(to_sql).collect())
            .collect();
        self.run_blocking(move |conn| {
            let tx = conn.transaction().map_err(query_error)?;
            let mut affected = 0u64;
            {
                let mut stmt = tx.prepare(&statement).map_err(query_error)?;
                for row in &params {
                    affected += stmt
                        .execute(rusqlite::params_from_iter(row.iter()))
                        .map_err(query_error)? as u64;
                }
            }
            tx.commit().map_err(query_error)?;
            Ok(affected)
        })
        .await
    }
}
