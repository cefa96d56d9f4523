// ABOUTME: PostgreSQL store adapter backed by tokio-postgres with native TLS
// ABOUTME: Values bind against the destination column type so one row shape fits any table

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use postgres_native_tls::MakeTlsConnector;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::Client;

use super::{Dialect, ResultSet, Row, Store, Value, LEGACY_IDENTIFIER_LIMIT};
use crate::error::StoreError;

/// A PostgreSQL archive database.
pub struct PostgresStore {
    name: String,
    client: Mutex<Client>,
    identifier_limit: usize,
}

impl PostgresStore {
    /// Connect to `url`, negotiating TLS when the server offers it.
    ///
    /// The connection task is spawned onto the runtime and ends when the
    /// store is dropped.
    pub async fn connect(name: &str, url: &str, allow_self_signed_certs: bool) -> Result<Self> {
        let mut builder = native_tls::TlsConnector::builder();
        if allow_self_signed_certs {
            builder.danger_accept_invalid_certs(true);
        }
        let tls = MakeTlsConnector::new(builder.build().context("Failed to build TLS connector")?);

        let (client, connection) = tokio_postgres::connect(url, tls).await.with_context(|| {
            format!(
                "Failed to connect to {}",
                crate::utils::sanitize_url(url)
            )
        })?;

        let store_name = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection for '{}' ended: {}", store_name, e);
            }
        });

        Ok(Self {
            name: name.to_string(),
            client: Mutex::new(client),
            identifier_limit: LEGACY_IDENTIFIER_LIMIT,
        })
    }

    pub fn with_identifier_limit(mut self, limit: usize) -> Self {
        self.identifier_limit = limit;
        self
    }
}

fn classify(e: tokio_postgres::Error) -> StoreError {
    let io_failure = std::error::Error::source(&e)
        .map(|source| source.is::<std::io::Error>())
        .unwrap_or(false);
    if e.is_closed() || io_failure {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Query(e.to_string())
    }
}

/// How one result column is read into a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Bool,
    Numeric,
    Bytes,
    Timestamp,
    TimestampTz,
    Date,
    Text,
}

fn decode_kind(column: &str, ty: &Type) -> Result<Decode, StoreError> {
    let kind = match *ty {
        Type::INT2 => Decode::Int2,
        Type::INT4 => Decode::Int4,
        Type::INT8 => Decode::Int8,
        Type::FLOAT4 => Decode::Float4,
        Type::FLOAT8 => Decode::Float8,
        Type::BOOL => Decode::Bool,
        Type::NUMERIC => Decode::Numeric,
        Type::BYTEA => Decode::Bytes,
        Type::TIMESTAMP => Decode::Timestamp,
        Type::TIMESTAMPTZ => Decode::TimestampTz,
        Type::DATE => Decode::Date,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::CHAR => Decode::Text,
        _ => {
            return Err(StoreError::Query(format!(
                "column '{}' has unsupported type {}",
                column,
                ty.name()
            )))
        }
    };
    Ok(kind)
}

/// Whole numbers stay integers; anything with a fractional scale becomes a float.
fn numeric_value(d: Decimal) -> Result<Value, StoreError> {
    if d.scale() == 0 {
        if let Ok(v) = i64::try_from(d) {
            return Ok(Value::Int(v));
        }
    }
    d.to_f64()
        .map(Value::Float)
        .ok_or_else(|| StoreError::Query(format!("numeric {} out of range", d)))
}

fn cell(row: &tokio_postgres::Row, idx: usize, kind: Decode) -> Result<Value, StoreError> {
    fn get<'a, T: FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        idx: usize,
    ) -> Result<Option<T>, StoreError> {
        row.try_get::<_, Option<T>>(idx)
            .map_err(|e| StoreError::Query(format!("column {}: {}", idx, e)))
    }

    let value = match kind {
        Decode::Int2 => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        Decode::Int4 => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        Decode::Int8 => get::<i64>(row, idx)?.map(Value::Int),
        Decode::Float4 => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        Decode::Float8 => get::<f64>(row, idx)?.map(Value::Float),
        Decode::Bool => get::<bool>(row, idx)?.map(|v| Value::Int(v.into())),
        Decode::Numeric => get::<Decimal>(row, idx)?.map(numeric_value).transpose()?,
        Decode::Bytes => get::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        Decode::Timestamp => {
            get::<chrono::NaiveDateTime>(row, idx)?.map(|v| Value::Text(v.to_string()))
        }
        Decode::TimestampTz => {
            get::<chrono::DateTime<chrono::Utc>>(row, idx)?.map(|v| Value::Text(v.to_rfc3339()))
        }
        Decode::Date => get::<chrono::NaiveDate>(row, idx)?.map(|v| Value::Text(v.to_string())),
        Decode::Text => get::<String>(row, idx)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*v != 0).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::from(*v).to_sql(ty, out)
                } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR {
                    v.to_string().to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Float(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    (v.trunc() as i64).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (v.trunc() as i32).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR {
                    v.to_string().to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Text(v) => v.as_str().to_sql(ty, out),
            Value::Bytes(v) => v.as_slice().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

#[async_trait]
impl Store for PostgresStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn identifier_limit(&self) -> usize {
        self.identifier_limit
    }

    async fn execute_query(&self, sql: &str) -> Result<ResultSet, StoreError> {
        let client = self.client.lock().await;
        let statement = client.prepare(sql).await.map_err(classify)?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let kinds = statement
            .columns()
            .iter()
            .map(|c| decode_kind(c.name(), c.type_()))
            .collect::<Result<Vec<_>, _>>()?;
        let rows = client.query(&statement, &[]).await.map_err(classify)?;

        let mut tuples = Vec::with_capacity(rows.len());
        for row in &rows {
            let tuple = kinds
                .iter()
                .enumerate()
                .map(|(idx, kind)| cell(row, idx, *kind))
                .collect::<Result<Row, _>>()?;
            tuples.push(tuple);
        }

        Ok(ResultSet::from_rows(columns, tuples))
    }

    async fn execute_batch(&self, statement: &str, rows: &[Row]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(classify)?;
        let prepared = tx.prepare(statement).await.map_err(classify)?;

        let mut affected = 0u64;
        for row in rows {
            let params: Vec<&(dyn ToSql + Sync)> =
                row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            affected += tx.execute(&prepared, &params).await.map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(affected)
    }
}
