// ABOUTME: SchemaCatalog - resolves the ordered transfer columns of a table from a schema dump
// ABOUTME: Restores truncated column names through an explicit exception map, caches per run

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::SyncError;

/// Column names the schema dump carries truncated, mapped to their real names.
///
/// Any other name at or past the truncation limit is passed through as is.
pub const TRUNCATION_EXCEPTIONS: &[(&str, &str)] = &[
    (
        "Ante_Cont_AzimuthPositionCorre",
        "Ante_Cont_AzimuthPositionCorrected",
    ),
    (
        "Ante_Cont_ElevationPositionCor",
        "Ante_Cont_ElevationPositionCorrected",
    ),
];

/// Line marking the end of a table's column definitions.
const PRIMARY_KEY_MARKER: &str = "PRIMARY";

/// Map a column name from the schema dump to the name the source declares.
pub fn canonical_column_name(name: &str) -> &str {
    TRUNCATION_EXCEPTIONS
        .iter()
        .find(|(truncated, _)| *truncated == name)
        .map(|(_, full)| *full)
        .unwrap_or(name)
}

/// Ordered, unique column names of one table.
///
/// Order is the declaration order, which both the select and the insert
/// rely on positionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnList {
    names: Vec<String>,
}

impl ColumnList {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Names as declared by the source.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names as a destination with identifier limit `limit` stores them.
    pub fn destination_names(&self, limit: usize) -> Vec<String> {
        self.names
            .iter()
            .map(|name| match name.char_indices().nth(limit) {
                Some((cut, _)) => name[..cut].to_string(),
                None => name.clone(),
            })
            .collect()
    }
}

/// Column definitions for every replicated table, parsed on demand.
///
/// A catalog lives for one sync invocation; resolved lists are cached and
/// shared read-only between concurrent jobs.
pub struct SchemaCatalog {
    text: String,
    cache: RwLock<HashMap<String, Arc<ColumnList>>>,
}

impl SchemaCatalog {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Read the schema dump from `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;
        Ok(Self::from_text(text))
    }

    /// Ordered column list for `table`.
    ///
    /// # Errors
    ///
    /// `SchemaNotFound` if no definition names the table, `SchemaMalformed`
    /// if the definition does not parse.
    pub fn resolve(&self, table: &str) -> Result<Arc<ColumnList>, SyncError> {
        if let Ok(cache) = self.cache.read() {
            if let Some(columns) = cache.get(table) {
                return Ok(Arc::clone(columns));
            }
        }

        let columns = Arc::new(self.parse(table)?);
        tracing::debug!("Resolved {} columns for {}", columns.len(), table);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(table.to_string(), Arc::clone(&columns));
        }
        Ok(columns)
    }

    fn parse(&self, table: &str) -> Result<ColumnList, SyncError> {
        let header = format!("`{}`", table);
        let mut lines = self.text.lines().enumerate();

        if !lines.any(|(_, line)| line.contains(&header)) {
            return Err(SyncError::SchemaNotFound {
                table: table.to_string(),
            });
        }

        let malformed = |line: usize, reason: &str| SyncError::SchemaMalformed {
            table: table.to_string(),
            line,
            reason: reason.to_string(),
        };

        let mut names = Vec::new();
        let mut seen = HashSet::new();
        let mut last_line = 0;
        for (idx, line) in lines {
            let line_no = idx + 1;
            last_line = line_no;
            if line.contains(PRIMARY_KEY_MARKER) {
                if names.is_empty() {
                    return Err(malformed(line_no, "no columns before primary key"));
                }
                return Ok(ColumnList::new(names));
            }
            let name = line
                .split('`')
                .nth(1)
                .filter(|_| line.matches('`').count() >= 2)
                .ok_or_else(|| malformed(line_no, "expected a backtick-quoted column name"))?;
            let name = canonical_column_name(name);
            if !seen.insert(name.to_string()) {
                return Err(malformed(line_no, &format!("duplicate column '{}'", name)));
            }
            names.push(name.to_string());
        }
        Err(malformed(last_line, "missing primary key line"))
    }
}
