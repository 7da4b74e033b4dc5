//! PostgreSQL-backed store using a pooled sqlx connection.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolCopyExt, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as _, TypeInfo};
use std::time::Duration;
use tracing::{debug, info};

use hydro_common::{HydroError, HydroResult};

use crate::store::{Row, SqlValue, Statement, Store};

/// Connection settings for [`Database::connect`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 25,
            acquire_timeout_secs: 30,
        }
    }
}

/// Database connection pool and store operations.
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new pooled connection from the configuration.
    pub async fn connect(config: &DatabaseConfig) -> HydroResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| HydroError::DatabaseError(format!("Connection failed: {}", e)))?;

        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> HydroResult<()> {
        // Split SQL statements and execute them individually
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| HydroError::DatabaseError(format!("Migration failed: {}", e)))?;
            }
        }

        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for Database {
    async fn execute(&self, statement: &Statement) -> HydroResult<u64> {
        let result = bind_all(sqlx::query(&statement.sql), &statement.params)
            .execute(&self.pool)
            .await
            .map_err(|e| HydroError::DatabaseError(format!("Execute failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn fetch(&self, statement: &Statement) -> HydroResult<Vec<Row>> {
        let rows = bind_all(sqlx::query(&statement.sql), &statement.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HydroError::DatabaseError(format!("Query failed: {}", e)))?;

        rows.iter().map(convert_row).collect()
    }

    async fn fetch_id(&self, statement: &Statement) -> HydroResult<i32> {
        let row = bind_all(sqlx::query(&statement.sql), &statement.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| HydroError::DatabaseError(format!("Query failed: {}", e)))?
            .ok_or_else(|| HydroError::NoRows(statement.to_string()))?;

        row.try_get::<i32, _>(0).map_err(|_| HydroError::ColumnType {
            column: "id".to_string(),
        })
    }

    async fn execute_locked(&self, lock_key: i64, statements: &[Statement]) -> HydroResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HydroError::DatabaseError(format!("Begin failed: {}", e)))?;

        // Released automatically when the transaction ends
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(lock_key)
            .execute(&mut *tx)
            .await
            .map_err(|e| HydroError::DatabaseError(format!("Advisory lock failed: {}", e)))?;

        for statement in statements {
            bind_all(sqlx::query(&statement.sql), &statement.params)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    HydroError::DatabaseError(format!("Locked statement failed: {}", e))
                })?;
        }

        tx.commit()
            .await
            .map_err(|e| HydroError::DatabaseError(format!("Commit failed: {}", e)))?;

        Ok(())
    }

    async fn copy_in(&self, destination: &str, batch: Bytes) -> HydroResult<u64> {
        let copy_error = |e: sqlx::Error| HydroError::CopyError {
            destination: destination.to_string(),
            message: e.to_string(),
        };

        let statement = format!(
            "COPY {} FROM STDIN WITH (FORMAT text, DELIMITER '|', NULL '')",
            destination
        );

        let mut copy = self.pool.copy_in_raw(&statement).await.map_err(copy_error)?;
        copy.send(batch).await.map_err(copy_error)?;
        let rows = copy.finish().await.map_err(copy_error)?;

        debug!(destination = %destination, rows = rows, "Copied batch");

        Ok(rows)
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::BigInt(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Timestamp(v) => query.bind(*v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }
    query
}

fn convert_row(row: &PgRow) -> HydroResult<Row> {
    let mut converted = Row::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let decode_error = |_| HydroError::ColumnType {
            column: name.to_string(),
        };

        let value = match column.type_info().name() {
            "INT2" => row
                .try_get::<Option<i16>, _>(idx)
                .map_err(decode_error)?
                .map_or(SqlValue::Null, |v| SqlValue::Int(v as i32)),
            "INT4" => row
                .try_get::<Option<i32>, _>(idx)
                .map_err(decode_error)?
                .map_or(SqlValue::Null, SqlValue::Int),
            "INT8" => row
                .try_get::<Option<i64>, _>(idx)
                .map_err(decode_error)?
                .map_or(SqlValue::Null, SqlValue::BigInt),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(idx)
                .map_err(decode_error)?
                .map_or(SqlValue::Null, |v| SqlValue::Float(v as f64)),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(idx)
                .map_err(decode_error)?
                .map_or(SqlValue::Null, SqlValue::Float),
            "TIMESTAMPTZ" => {
                SqlValue::Timestamp(row.try_get::<Option<DateTime<Utc>>, _>(idx).map_err(decode_error)?)
            }
            "TIMESTAMP" => SqlValue::Timestamp(
                row.try_get::<Option<NaiveDateTime>, _>(idx)
                    .map_err(decode_error)?
                    .map(|ndt| ndt.and_utc()),
            ),
            _ => row
                .try_get::<Option<String>, _>(idx)
                .map_err(decode_error)?
                .map_or(SqlValue::Null, SqlValue::Text),
        };

        converted.push(name, value);
    }

    Ok(converted)
}

/// Database schema SQL.
///
/// Identifier tables carry a natural-key uniqueness constraint so that
/// get-or-insert statements never create duplicates. Lead-time partitions
/// of `wres.forecastvalue` live in the `partitions` schema and are created
/// on demand.
const SCHEMA_SQL: &str = r#"
CREATE SCHEMA IF NOT EXISTS wres;
CREATE SCHEMA IF NOT EXISTS partitions;

CREATE TABLE IF NOT EXISTS wres.measurementunit (
    measurementunit_id SERIAL PRIMARY KEY,
    unit_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS wres.variable (
    variable_id SERIAL PRIMARY KEY,
    variable_name TEXT NOT NULL UNIQUE,
    measurementunit_id INTEGER REFERENCES wres.measurementunit (measurementunit_id)
);

CREATE TABLE IF NOT EXISTS wres.feature (
    feature_id SERIAL PRIMARY KEY,
    lid TEXT NOT NULL,
    feature_name TEXT NOT NULL DEFAULT '',
    UNIQUE (lid, feature_name)
);

CREATE TABLE IF NOT EXISTS wres.variableposition (
    variableposition_id SERIAL PRIMARY KEY,
    x_position INTEGER NOT NULL REFERENCES wres.feature (feature_id),
    variable_id INTEGER NOT NULL REFERENCES wres.variable (variable_id),
    UNIQUE (x_position, variable_id)
);

CREATE TABLE IF NOT EXISTS wres.ensemble (
    ensemble_id SERIAL PRIMARY KEY,
    ensemble_name TEXT NOT NULL,
    ensemblemember_id TEXT NOT NULL DEFAULT '',
    qualifier_id TEXT NOT NULL DEFAULT '',
    UNIQUE (ensemble_name, ensemblemember_id, qualifier_id)
);

CREATE TABLE IF NOT EXISTS wres.source (
    source_id SERIAL PRIMARY KEY,
    path TEXT NOT NULL,
    output_time TIMESTAMPTZ,
    UNIQUE NULLS NOT DISTINCT (path, output_time)
);

CREATE TABLE IF NOT EXISTS wres.forecast (
    forecast_id SERIAL PRIMARY KEY,
    source_path TEXT NOT NULL,
    forecast_date TIMESTAMPTZ NOT NULL,
    UNIQUE (source_path, forecast_date)
);

CREATE TABLE IF NOT EXISTS wres.forecastensemble (
    forecastensemble_id SERIAL PRIMARY KEY,
    forecast_id INTEGER NOT NULL REFERENCES wres.forecast (forecast_id),
    ensemble_id INTEGER NOT NULL REFERENCES wres.ensemble (ensemble_id),
    measurementunit_id INTEGER NOT NULL REFERENCES wres.measurementunit (measurementunit_id),
    variableposition_id INTEGER NOT NULL REFERENCES wres.variableposition (variableposition_id),
    UNIQUE (forecast_id, ensemble_id, measurementunit_id, variableposition_id)
);

CREATE TABLE IF NOT EXISTS wres.forecastvalue (
    forecastensemble_id INTEGER NOT NULL,
    lead INTEGER NOT NULL,
    forecasted_value DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS wres.observation (
    variableposition_id INTEGER NOT NULL,
    observation_time TIMESTAMPTZ NOT NULL,
    observed_value DOUBLE PRECISION,
    measurementunit_id INTEGER NOT NULL,
    source_id INTEGER
);

CREATE INDEX IF NOT EXISTS observation_position_time_idx
    ON wres.observation (variableposition_id, observation_time);
"#;
