//! Generic table operations over PostgreSQL.
//!
//! Each call opens its own connection, runs one statement inside a
//! transaction and closes the connection before returning.

use std::time::Instant;

use metrics::{counter, histogram};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use service_core::error::AppError;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Column, ConnectOptions, Connection, PgConnection, Row as _, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::sql::{self, ColumnValues, Statement, TableSchema};
use crate::config::DatabaseConfig;

/// A result row as a field-name to value mapping.
pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The server could not be reached or refused the connection.
    #[error("{0}")]
    Connection(String),

    /// A statement failed to execute.
    #[error("{0}")]
    Database(String),

    /// The request was rejected before any SQL was sent.
    #[error("{0}")]
    Validation(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) | StoreError::Database(msg) => {
                AppError::DatabaseError(anyhow::anyhow!(msg))
            }
            StoreError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
        }
    }
}

/// Data access helper bound to one database.
#[derive(Clone)]
pub struct PgStore {
    config: DatabaseConfig,
}

impl PgStore {
    /// Create a store for `config`. No connection is opened.
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    /// Create the configured database if the server does not have it yet.
    ///
    /// Runs against the administrative database in autocommit mode, since
    /// `CREATE DATABASE` cannot run inside a transaction block. Two processes
    /// racing here may both see the database missing; the loser gets a
    /// `Database` error.
    #[instrument(skip(self), fields(database = %self.config.name))]
    pub async fn ensure_database(&self) -> Result<(), StoreError> {
        let name = self.config.name.as_str();
        sql::validate_identifier(name)?;

        let mut conn = open(&self.config.admin_connect_options()).await?;
        let result = create_database_if_missing(&mut conn, name).await;
        close(conn).await;
        result
    }

    /// Check connectivity to the service database.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let statement = Statement {
            sql: "SELECT 1".to_string(),
            params: Vec::new(),
        };
        self.execute("health_check", "-", statement).await?;
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` for `schema`. An existing table is left as is.
    #[instrument(skip(self, schema), fields(table = schema.name))]
    pub async fn create_table(&self, schema: &TableSchema) -> Result<(), StoreError> {
        let statement = sql::create_table(schema)?;
        self.execute("create_table", schema.name, statement).await?;
        Ok(())
    }

    /// Insert one row and return it as stored, defaults included.
    #[instrument(skip(self, schema, data), fields(table = schema.name))]
    pub async fn insert(
        &self,
        schema: &TableSchema,
        data: &ColumnValues,
    ) -> Result<Option<Row>, StoreError> {
        let statement = sql::insert(schema, data)?;
        let rows = self.execute("insert", schema.name, statement).await?;
        Ok(rows.into_iter().next())
    }

    /// Rows matching every condition, projected to `fields` (all columns when
    /// empty). No match yields an empty vector.
    #[instrument(skip(self, schema, conditions, fields), fields(table = schema.name))]
    pub async fn select(
        &self,
        schema: &TableSchema,
        conditions: Option<&ColumnValues>,
        fields: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        let statement = sql::select(schema, conditions, fields)?;
        self.execute("select", schema.name, statement).await
    }

    /// Update rows matching every condition; returns the first updated row.
    #[instrument(skip(self, schema, data, conditions), fields(table = schema.name))]
    pub async fn update(
        &self,
        schema: &TableSchema,
        data: &ColumnValues,
        conditions: &ColumnValues,
    ) -> Result<Option<Row>, StoreError> {
        let statement = sql::update(schema, data, conditions)?;
        let rows = self.execute("update", schema.name, statement).await?;
        Ok(rows.into_iter().next())
    }

    /// Delete rows matching every condition. Succeeds even if nothing matched.
    #[instrument(skip(self, schema, conditions), fields(table = schema.name))]
    pub async fn delete(
        &self,
        schema: &TableSchema,
        conditions: &ColumnValues,
    ) -> Result<bool, StoreError> {
        let statement = sql::delete(schema, conditions)?;
        self.execute("delete", schema.name, statement).await?;
        Ok(true)
    }

    async fn execute(
        &self,
        operation: &'static str,
        table: &str,
        statement: Statement,
    ) -> Result<Vec<Row>, StoreError> {
        let start = Instant::now();

        let result = match open(&self.config.connect_options()).await {
            Ok(mut conn) => {
                let result = run_in_transaction(&mut conn, statement).await;
                close(conn).await;
                result
            }
            Err(e) => Err(e),
        };

        let status = if result.is_ok() { "ok" } else { "error" };
        let labels = [
            ("operation", operation.to_string()),
            ("table", table.to_string()),
            ("status", status.to_string()),
        ];
        counter!("db_queries_total", &labels).increment(1);
        histogram!("db_query_duration_seconds", &labels).record(start.elapsed().as_secs_f64());

        result
    }
}

async fn open(options: &PgConnectOptions) -> Result<PgConnection, StoreError> {
    options.connect().await.map_err(|e| {
        warn!(error = %e, "Failed to connect to PostgreSQL");
        StoreError::Connection(format!("Connection error: {}", e))
    })
}

async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Failed to close PostgreSQL connection cleanly");
    }
}

async fn create_database_if_missing(
    conn: &mut PgConnection,
    name: &str,
) -> Result<(), StoreError> {
    let creation_error = |e: sqlx::Error| StoreError::Database(format!("Database creation error: {}", e));

    let exists = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(creation_error)?
        .is_some();

    if exists {
        return Ok(());
    }

    // Simple-query protocol, outside any transaction.
    let create = format!("CREATE DATABASE \"{}\"", name);
    sqlx::raw_sql(&create)
        .execute(&mut *conn)
        .await
        .map_err(creation_error)?;

    info!(database = %name, "Database created");
    Ok(())
}

async fn run_in_transaction(
    conn: &mut PgConnection,
    statement: Statement,
) -> Result<Vec<Row>, StoreError> {
    let query_error = |e: sqlx::Error| StoreError::Database(format!("Query execution error: {}", e));

    let mut tx = conn.begin().await.map_err(query_error)?;

    let mut query = sqlx::query(&statement.sql);
    for param in statement.params {
        query = param.bind_to(query);
    }

    match query.fetch_all(&mut *tx).await {
        Ok(rows) => {
            let decoded = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>();
            match decoded {
                Ok(decoded) => {
                    tx.commit().await.map_err(query_error)?;
                    Ok(decoded)
                }
                Err(e) => {
                    rollback(tx).await;
                    Err(e)
                }
            }
        }
        Err(e) => {
            warn!(error = %e, sql = %statement.sql, "Statement failed, rolling back");
            rollback(tx).await;
            Err(query_error(e))
        }
    }
}

async fn rollback(tx: sqlx::Transaction<'_, sqlx::Postgres>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}

fn decode_row(row: &PgRow) -> Result<Row, StoreError> {
    let mut out = Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let type_name = column.type_info().name();
        let value = decode_column(row, column.ordinal(), type_name)
            .map_err(|e| {
                StoreError::Database(format!(
                    "Query execution error: cannot decode column '{}': {}",
                    column.name(),
                    e
                ))
            })?
            .ok_or_else(|| {
                StoreError::Database(format!(
                    "Query execution error: unsupported column type {} for column '{}'",
                    type_name,
                    column.name()
                ))
            })?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// Decode one column. `Ok(None)` means the SQL type has no mapping.
fn decode_column(
    row: &PgRow,
    index: usize,
    type_name: &str,
) -> Result<Option<Value>, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Some(Value::Null));
    }

    let value = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(Value::from),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::from),
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::from),
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(index)?
            .map(|n| Value::String(n.to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|ts| Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(|ts| Value::String(ts.to_rfc3339())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)?
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)?
            .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string())),
        "UUID" => row
            .try_get::<Option<Uuid>, _>(index)?
            .map(|id| Value::String(id.to_string())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?,
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<Option<String>, _>(index)?.map(Value::String),
        _ => return Ok(None),
    };
    Ok(Some(value.unwrap_or(Value::Null)))
}
