//! The single database connection shared by every handler.
//!
//! Handlers only see the [`Connection`] trait, so they can be exercised
//! against [`testing::FakeConnection`] without a running server.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, ToSql};
use uuid::Uuid;
use tokio_postgres::{Client, NoTls};

use crate::config::DbConfig;
use crate::error::{GatewayError, Result};

/// One result row: column names paired with values, in the order the
/// database returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

pub type QueryResult = Vec<Row>;

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column. Used by drivers while decoding and by tests.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Renders as `{"id": 1, "name": "alice"}`, keeping column order.
impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (name, value)) in self.columns.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", Value::String(name.clone()), value)?;
        }
        f.write_str("}")
    }
}

/// A live handle to the backing database.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run one statement with positional text parameters (`$1`, `$2`, ...).
    async fn query(&self, sql: &str, params: &[&str]) -> Result<QueryResult>;

    async fn is_closed(&self) -> bool;

    /// Release the connection. Later queries fail with
    /// [`GatewayError::Connection`].
    async fn close(&self);
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// `tokio-postgres` backed connection.
///
/// The client pipelines concurrent queries over its one socket, so callers
/// share it through `Arc` without an extra lock around each query.
pub struct PgConnection {
    client: RwLock<Option<Client>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl PgConnection {
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let (client, connection) = config
            .pg_config()
            .connect(NoTls)
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection terminated");
            }
        });

        Ok(Self {
            client: RwLock::new(Some(client)),
            driver: Mutex::new(Some(driver)),
        })
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[&str]) -> Result<QueryResult> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| GatewayError::Connection("connection is closed".into()))?;

        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let rows = client.query(sql, &params).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn is_closed(&self) -> bool {
        self.client
            .read()
            .await
            .as_ref()
            .map_or(true, Client::is_closed)
    }

    async fn close(&self) {
        // Dropping the client lets the driver send Terminate and finish.
        drop(self.client.write().await.take());

        if let Some(driver) = self.driver.lock().await.take() {
            if let Err(e) = driver.await {
                tracing::warn!(error = %e, "Postgres driver task did not finish cleanly");
            }
        }
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.abort();
        }
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .fold(Row::new(), |decoded, (idx, column)| {
            decoded.with(column.name(), decode_value(row, idx))
        })
}

fn decode_value(row: &tokio_postgres::Row, idx: usize) -> Value {
    let ty = row.columns()[idx].type_();

    let decoded: std::result::Result<Option<Value>, _> = match ty.name() {
        "bool" => row.try_get::<_, Option<bool>>(idx).map(|v| v.map(Value::from)),
        "int2" => row.try_get::<_, Option<i16>>(idx).map(|v| v.map(Value::from)),
        "int4" => row.try_get::<_, Option<i32>>(idx).map(|v| v.map(Value::from)),
        "int8" => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(Value::from)),
        "oid" => row.try_get::<_, Option<u32>>(idx).map(|v| v.map(Value::from)),
        "float4" => row.try_get::<_, Option<f32>>(idx).map(|v| v.map(Value::from)),
        "float8" => row.try_get::<_, Option<f64>>(idx).map(|v| v.map(Value::from)),
        "json" | "jsonb" => row.try_get::<_, Option<Value>>(idx),
        // Rendered as text to keep the full precision.
        "numeric" => decode_as_text::<Decimal>(row, idx),
        "date" => decode_as_text::<NaiveDate>(row, idx),
        "time" => decode_as_text::<NaiveTime>(row, idx),
        "timestamp" => decode_as_text::<NaiveDateTime>(row, idx),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| v.map(|ts| Value::from(ts.to_rfc3339()))),
        "uuid" => decode_as_text::<Uuid>(row, idx),
        _ => row.try_get::<_, Option<String>>(idx).map(|v| v.map(Value::from)),
    };

    match decoded {
        Ok(Some(value)) => value,
        Ok(None) => Value::Null,
        Err(_) => Value::String(format!("<{}>", ty.name())),
    }
}

fn decode_as_text<T>(
    row: &tokio_postgres::Row,
    idx: usize,
) -> std::result::Result<Option<Value>, tokio_postgres::Error>
where
    T: for<'a> FromSql<'a> + ToString,
{
    row.try_get::<_, Option<T>>(idx)
        .map(|v| v.map(|v| Value::String(v.to_string())))
}

// ============================================================================
// Test double
// ============================================================================
