//! The Executor: runs one `GuardedSql` under a bounded time budget and
//! returns rows. Acquires a pooled connection, sets `statement_timeout`,
//! runs the statement, and releases the connection on every exit path.

use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo, ValueRef};

use crate::error::ServiceError;
use crate::guard::GuardedSql;

pub type ResultRow = Map<String, Value>;

pub struct Executor {
    pool: PgPool,
}

impl Executor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Checks the database is reachable, bounded by `timeout_ms`. Does not
    /// consult the LLM; a failure here short-circuits the whole pipeline.
    pub async fn probe(&self, timeout_ms: u64) -> Result<(), ServiceError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ServiceError::DatabaseUnavailable(e.to_string()))?;
        set_statement_timeout(&mut conn, timeout_ms)
            .await
            .map_err(|e| ServiceError::DatabaseUnavailable(e.to_string()))?;
        sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map_err(|e| ServiceError::DatabaseUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Runs `sql` and returns its rows. The connection is acquired for the
    /// duration of this call only and is always returned to the pool on
    /// return (including on error, since `conn` simply drops).
    pub async fn execute(
        &self,
        sql: &GuardedSql,
        timeout_ms: u64,
    ) -> Result<Vec<ResultRow>, ServiceError> {
        let mut conn = self.pool.acquire().await.map_err(|e| ServiceError::ExecutionError {
            message: e.to_string(),
            sql: sql.as_str().to_string(),
        })?;

        set_statement_timeout(&mut conn, timeout_ms)
            .await
            .map_err(|e| ServiceError::ExecutionError {
                message: e.to_string(),
                sql: sql.as_str().to_string(),
            })?;

        let rows = sqlx::query(sql.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| ServiceError::ExecutionError {
                message: e.to_string(),
                sql: sql.as_str().to_string(),
            })?;

        Ok(rows.iter().map(row_to_json).collect())
    }
}

async fn set_statement_timeout(
    conn: &mut sqlx::pool::PoolConnection<sqlx::Postgres>,
    timeout_ms: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!("SET statement_timeout = {timeout_ms}"))
        .execute(&mut **conn)
        .await?;
    Ok(())
}

/// Converts one row into a JSON object keyed by column label, decoding by
/// the column's Postgres type. Any column that fails to decode through its
/// expected Rust type becomes `null` rather than failing the whole request.
fn row_to_json(row: &PgRow) -> ResultRow {
    let mut map = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, i, column.type_info().name());
        map.insert(column.name().to_string(), value);
    }
    map
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }

    match type_name {
        "INT2" | "INT4" => row
            .try_get::<i32, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "INT8" => row
            .try_get::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<f32, _>(index)
            .map(|v| Value::from(v as f64))
            .unwrap_or(Value::Null),
        "FLOAT8" => row
            .try_get::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "NUMERIC" => row
            .try_get::<rust_decimal::Decimal, _>(index)
            .ok()
            .and_then(|d| d.to_f64())
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOL" => row
            .try_get::<bool, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|v| Value::from(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|v| Value::from(v.to_string()))
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|v| Value::from(v.to_string()))
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Value, _>(index)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}
