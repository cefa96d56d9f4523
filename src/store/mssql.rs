// ABOUTME: SQL Server store adapter backed by tiberius over a tokio TCP stream
// ABOUTME: Opens one connection per call; the authoritative archive is usually this engine

use anyhow::{Context, Result};
use async_trait::async_trait;
use tiberius::{Client, ColumnData, Config, FromSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{Dialect, ResultSet, Row, Store, Value, LEGACY_IDENTIFIER_LIMIT};
use crate::error::StoreError;

type Connection = Client<Compat<TcpStream>>;

/// A SQL Server archive database.
///
/// Inserts go through `InsertMode::Plain`; the dialect has no
/// duplicate-tolerant form, so it is not used as a sync destination.
pub struct MsSqlStore {
    name: String,
    config: Config,
    identifier_limit: usize,
}

impl MsSqlStore {
    /// Parse an ADO connection string
    /// (`server=tcp:host,1433;database=eOVSA06;user=...;password=...`).
    ///
    /// No connection is opened until the first call.
    pub fn connect(name: &str, ado: &str, allow_self_signed_certs: bool) -> Result<Self> {
        let mut config = Config::from_ado_string(ado)
            .with_context(|| format!("Invalid SQL Server connection string for '{}'", name))?;
        if allow_self_signed_certs {
            config.trust_cert();
        }
        Ok(Self {
            name: name.to_string(),
            config,
            identifier_limit: LEGACY_IDENTIFIER_LIMIT,
        })
    }

    pub fn with_identifier_limit(mut self, limit: usize) -> Self {
        self.identifier_limit = limit;
        self
    }

    async fn client(&self) -> Result<Connection, StoreError> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Client::connect(self.config.clone(), tcp.compat_write())
            .await
            .map_err(classify)
    }
}

fn classify(e: tiberius::error::Error) -> StoreError {
    use tiberius::error::Error as Tds;
    match e {
        Tds::Io { .. } | Tds::Tls(_) | Tds::Routing { .. } => StoreError::Unavailable(e.to_string()),
        other => StoreError::Query(other.to_string()),
    }
}

fn decode<'a, T: FromSql<'a>>(
    column: &str,
    data: &'a ColumnData<'static>,
) -> Result<Option<T>, StoreError> {
    T::from_sql(data).map_err(|e| StoreError::Query(format!("column '{}': {}", column, e)))
}

fn from_mssql(column: &str, data: ColumnData<'static>) -> Result<Value, StoreError> {
    let value = match &data {
        ColumnData::U8(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I16(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I32(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I64(v) => v.map(Value::Int),
        ColumnData::F32(v) => v.map(|v| Value::Float(v.into())),
        ColumnData::F64(v) => v.map(Value::Float),
        ColumnData::Bit(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::String(v) => v.as_ref().map(|v| Value::Text(v.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|v| Value::Bytes(v.to_vec())),
        ColumnData::Numeric(v) => v.map(|n| {
            if n.scale() == 0 {
                if let Ok(whole) = i64::try_from(n.value()) {
                    return Value::Int(whole);
                }
            }
            Value::Float(f64::from(n))
        }),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            decode::<chrono::NaiveDateTime>(column, &data)?.map(|v| Value::Text(v.to_string()))
        }
        ColumnData::Date(_) => {
            decode::<chrono::NaiveDate>(column, &data)?.map(|v| Value::Text(v.to_string()))
        }
        ColumnData::DateTimeOffset(_) => decode::<chrono::DateTime<chrono::Utc>>(column, &data)?
            .map(|v| Value::Text(v.to_rfc3339())),
        _ => {
            return Err(StoreError::Query(format!(
                "column '{}' has unsupported type {:?}",
                column, data
            )))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

impl tiberius::ToSql for Value {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            // nvarchar NULL converts implicitly to every non-binary column type.
            Value::Null => ColumnData::String(None),
            Value::Int(v) => ColumnData::I64(Some(*v)),
            Value::Float(v) => ColumnData::F64(Some(*v)),
            Value::Text(v) => ColumnData::String(Some(v.as_str().into())),
            Value::Bytes(v) => ColumnData::Binary(Some(v.as_slice().into())),
        }
    }
}

async fn run_batch(
    client: &mut Connection,
    statement: &str,
    rows: &[Row],
) -> Result<u64, StoreError> {
    let mut affected = 0u64;
    for row in rows {
        let params: Vec<&dyn tiberius::ToSql> =
            row.iter().map(|v| v as &dyn tiberius::ToSql).collect();
        let result = client.execute(statement, &params).await.map_err(classify)?;
        affected += result.total();
    }
    Ok(affected)
}

#[async_trait]
impl Store for MsSqlStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::MsSql
    }

    fn identifier_limit(&self) -> usize {
        self.identifier_limit
    }

    async fn execute_query(&self, sql: &str) -> Result<ResultSet, StoreError> {
        let mut client = self.client().await?;
        // A leading SET directive yields no result set, so the rows are the last one.
        let mut results = client
            .simple_query(sql)
            .await
            .map_err(classify)?
            .into_results()
            .await
            .map_err(classify)?;
        let Some(rows) = results.pop() else {
            return Ok(ResultSet::default());
        };
        let Some(first) = rows.first() else {
            return Ok(ResultSet::default());
        };
        let columns: Vec<String> = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            let tuple = row
                .into_iter()
                .zip(&columns)
                .map(|(data, column)| from_mssql(column, data))
                .collect::<Result<Row, _>>()?;
            tuples.push(tuple);
        }
        Ok(ResultSet::from_rows(columns, tuples))
    }

    async fn execute_batch(&self, statement: &str, rows: &[Row]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut client = self.client().await?;
        client
            .simple_query("BEGIN TRANSACTION")
            .await
            .map_err(classify)?
            .into_results()
            .await
            .map_err(classify)?;

        match run_batch(&mut client, statement, rows).await {
            Ok(affected) => {
                client
                    .simple_query("COMMIT TRANSACTION")
                    .await
                    .map_err(classify)?
                    .into_results()
                    .await
                    .map_err(classify)?;
                Ok(affected)
            }
            Err(e) => {
                if let Ok(stream) = client.simple_query("ROLLBACK TRANSACTION").await {
                    let _ = stream.into_results().await;
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiberius::ToSql;

    #[test]
    fn test_ado_string_parsed_without_connecting() {
        let store = MsSqlStore::connect(
            "archive",
            "server=tcp:sqlserver.example,1433;database=eOVSA06;user=aa;password=secret",
            true,
        )
        .unwrap();
        assert_eq!(store.name(), "archive");
        assert_eq!(store.dialect(), Dialect::MsSql);
        assert_eq!(store.config.get_addr(), "sqlserver.example:1433");
    }

    #[test]
    fn test_scalar_columns_decode() {
        assert_eq!(from_mssql("Id", ColumnData::I32(Some(7))).unwrap(), Value::Int(7));
        assert_eq!(from_mssql("Ok", ColumnData::Bit(Some(true))).unwrap(), Value::Int(1));
        assert_eq!(
            from_mssql("Timestamp", ColumnData::F64(Some(3.5))).unwrap(),
            Value::Float(3.5)
        );
        assert_eq!(
            from_mssql("Bin", ColumnData::Binary(Some(vec![1u8, 2].into()))).unwrap(),
            Value::Bytes(vec![1, 2])
        );
        assert_eq!(from_mssql("Project", ColumnData::String(None)).unwrap(), Value::Null);
    }

    #[test]
    fn test_unsupported_column_type_is_an_error() {
        let err = from_mssql("Uid", ColumnData::Guid(None)).unwrap_err();
        assert!(matches!(err, StoreError::Query(m) if m.contains("Uid")));
    }

    #[test]
    fn test_values_bind_as_tds_types() {
        assert!(matches!(Value::Int(5).to_sql(), ColumnData::I64(Some(5))));
        assert!(matches!(Value::Null.to_sql(), ColumnData::String(None)));
        assert!(matches!(
            Value::Bytes(vec![9]).to_sql(),
            ColumnData::Binary(Some(b)) if b.to_vec() == vec![9u8]
        ));
    }
}
