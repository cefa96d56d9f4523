// ABOUTME: Utility functions for identifier validation, quoting and per-call timeouts
// ABOUTME: Shared by the store adapters, the schema catalog and the sync engine

use anyhow::{bail, Result};
use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;

/// Validate a table or column identifier before it is spliced into SQL
///
/// Table and column names come from configuration and from the schema text,
/// never from row data, but they are still restricted to letters, digits and
/// underscores so that a bad config line cannot turn into a statement.
///
/// # Examples
///
/// ```
/// # use archive_replicator::utils::validate_identifier;
/// assert!(validate_identifier("hV37_vD1").is_ok());
/// assert!(validate_identifier("Ante_Cont_AzimuthPositionCorrected").is_ok());
/// assert!(validate_identifier("1abin").is_err());
/// assert!(validate_identifier("abin`; DROP").is_err());
/// ```
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        bail!("Identifier cannot be empty or whitespace-only");
    }

    if trimmed.len() > 128 {
        bail!(
            "Identifier '{}' exceeds maximum length of 128 characters (got {})",
            sanitize_identifier(trimmed),
            trimmed.len()
        );
    }

    let first_char = trimmed.chars().next().unwrap_or('_');
    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        bail!(
            "Identifier '{}' must start with a letter or underscore, not '{}'",
            sanitize_identifier(trimmed),
            first_char
        );
    }

    for (i, c) in trimmed.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            bail!(
                "Identifier '{}' contains invalid character '{}' at position {}. \
                 Only letters, digits, and underscores are allowed",
                sanitize_identifier(trimmed),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            );
        }
    }

    Ok(())
}

/// Sanitize an identifier for display
///
/// Removes control characters and limits length so that error messages and
/// log lines stay readable.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote an identifier with double quotes (PostgreSQL, SQLite)
pub fn quote_ident(identifier: &str) -> String {
    quote_with(identifier, '"', '"')
}

/// Quote a MySQL identifier with backticks
///
/// # Examples
///
/// ```
/// use archive_replicator::utils::quote_mysql_ident;
/// assert_eq!(quote_mysql_ident("abin"), "`abin`");
/// assert_eq!(quote_mysql_ident("user`name"), "`user``name`");
/// ```
pub fn quote_mysql_ident(identifier: &str) -> String {
    quote_with(identifier, '`', '`')
}

/// Quote an MS SQL identifier with brackets
///
/// # Examples
///
/// ```
/// use archive_replicator::utils::quote_mssql_ident;
/// assert_eq!(quote_mssql_ident("Timestamp"), "[Timestamp]");
/// assert_eq!(quote_mssql_ident("a]b"), "[a]]b]");
/// ```
pub fn quote_mssql_ident(identifier: &str) -> String {
    quote_with(identifier, '[', ']')
}

fn quote_with(identifier: &str, open: char, close: char) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push(open);
    for ch in identifier.chars() {
        if ch == close {
            quoted.push(close);
        }
        quoted.push(ch);
    }
    quoted.push(close);
    quoted
}

/// Remove the password component of a connection URL for logging
///
/// ADO-style `key=value;` strings (SQL Server) have their `password`/`pwd`
/// value masked. Anything else (SQLite file paths) is returned unchanged.
pub fn sanitize_url(url: &str) -> String {
    if let Ok(mut parsed) = url::Url::parse(url) {
        if parsed.password().is_some() {
            let _ = parsed.set_password(Some("***"));
        }
        parsed.to_string()
    } else if url.contains('=') {
        url.split(';')
            .map(|pair| match pair.split_once('=') {
                Some((key, _))
                    if key.trim().eq_ignore_ascii_case("password")
                        || key.trim().eq_ignore_ascii_case("pwd") =>
                {
                    format!("{}=***", key)
                }
                _ => pair.to_string(),
            })
            .collect::<Vec<_>>()
            .join(";")
    } else {
        url.to_string()
    }
}

/// Run one store call under a deadline
///
/// An elapsed deadline becomes [`StoreError::Timeout`], which the sync layer
/// reports as a retryable `DestinationUnavailable`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> std::result::Result<T, StoreError>
where
    F: Future<Output = std::result::Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
