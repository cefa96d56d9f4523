// ABOUTME: SQL text generation per engine: quoting, probes, range selects and insert forms
// ABOUTME: The duplicate-tolerant insert is what makes repeated and overlapping transfers safe

use serde::{Deserialize, Serialize};

use crate::table::TransferRange;
use crate::utils::{quote_ident, quote_mssql_ident, quote_mysql_ident};

pub const TIMESTAMP_COLUMN: &str = "Timestamp";
pub const ID_COLUMN: &str = "Id";

/// MS SQL truncates `varbinary(max)` reads at 4 KB unless told otherwise.
const MSSQL_TEXTSIZE_DIRECTIVE: &str = "SET TEXTSIZE 2147483647";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MsSql,
    MySql,
    Postgres,
    Sqlite,
}

/// How an insert reacts to a primary-key collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Collisions are silent no-ops.
    IgnoreDuplicates,
    /// Collisions are errors.
    Plain,
}

impl Dialect {
    pub fn quote(self, identifier: &str) -> String {
        match self {
            Dialect::MsSql => quote_mssql_ident(identifier),
            Dialect::MySql => quote_mysql_ident(identifier),
            Dialect::Postgres | Dialect::Sqlite => quote_ident(identifier),
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::MsSql => format!("@P{}", index),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    pub fn supports_insert_ignore(self) -> bool {
        !matches!(self, Dialect::MsSql)
    }

    /// Highest (`descending`) or lowest value of one column.
    pub fn extreme_value_query(self, table: &str, column: &str, descending: bool) -> String {
        let order = if descending { "DESC" } else { "ASC" };
        let table = self.quote(table);
        let column = self.quote(column);
        match self {
            Dialect::MsSql => format!(
                "SELECT TOP 1 {col} FROM {table} ORDER BY {col} {order}",
                col = column,
                table = table,
                order = order
            ),
            _ => format!(
                "SELECT {col} FROM {table} ORDER BY {col} {order} LIMIT 1",
                col = column,
                table = table,
                order = order
            ),
        }
    }

    pub fn range_predicate(self, range: &TransferRange) -> String {
        match range {
            TransferRange::Time {
                start,
                end,
                end_inclusive,
            } => {
                let column = self.quote(TIMESTAMP_COLUMN);
                let upper = if *end_inclusive { "<=" } else { "<" };
                format!(
                    "{col} >= {} AND {col} {} {}",
                    start.0,
                    upper,
                    end.0,
                    col = column
                )
            }
            TransferRange::IdFloor { floor } => {
                format!("{} > {}", self.quote(ID_COLUMN), floor)
            }
        }
    }

    /// `SELECT <cols> FROM <table> WHERE <range>`.
    ///
    /// With `large_payload` the MS SQL text-size directive is prepended so
    /// binary columns come back whole.
    pub fn select_statement(
        self,
        table: &str,
        columns: &[String],
        range: &TransferRange,
        large_payload: bool,
    ) -> String {
        let column_list = columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let select = format!(
            "SELECT {} FROM {} WHERE {}",
            column_list,
            self.quote(table),
            self.range_predicate(range)
        );
        if large_payload && self == Dialect::MsSql {
            format!("{} {}", MSSQL_TEXTSIZE_DIRECTIVE, select)
        } else {
            select
        }
    }

    /// Single-row insert template.
    ///
    /// Returns `None` when `mode` asks for duplicate tolerance the engine
    /// cannot express.
    pub fn insert_statement(
        self,
        table: &str,
        columns: &[String],
        mode: InsertMode,
    ) -> Option<String> {
        let column_list = columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| self.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        let table = self.quote(table);

        let statement = match (mode, self) {
            (InsertMode::Plain, _) => format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table, column_list, placeholders
            ),
            (InsertMode::IgnoreDuplicates, Dialect::MySql) => format!(
                "INSERT IGNORE INTO {} ({}) VALUES ({})",
                table, column_list, placeholders
            ),
            (InsertMode::IgnoreDuplicates, Dialect::Sqlite) => format!(
                "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
                table, column_list, placeholders
            ),
            (InsertMode::IgnoreDuplicates, Dialect::Postgres) => format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
                table, column_list, placeholders
            ),
            (InsertMode::IgnoreDuplicates, Dialect::MsSql) => return None,
        };
        Some(statement)
    }
}
