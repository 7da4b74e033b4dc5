//! Relational store abstraction used by the caches and the bulk loader.
//!
//! Statements are plain SQL with positional (`$1`, `$2`, ...) parameters
//! carried as [`SqlValue`]s, so the same statement can be executed against
//! PostgreSQL or an in-memory test double.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

use hydro_common::{HydroError, HydroResult};

/// A single bound parameter or returned column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i32),
    BigInt(i64),
    Float(f64),
    Text(String),
    Timestamp(Option<DateTime<Utc>>),
    Null,
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::BigInt(v) => write!(f, "{}", v),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "'{}'", v),
            SqlValue::Timestamp(Some(v)) => write!(f, "'{}'", v.to_rfc3339()),
            SqlValue::Timestamp(None) | SqlValue::Null => write!(f, "NULL"),
        }
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(Some(v))
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        SqlValue::Timestamp(v)
    }
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append the next positional parameter.
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql.split_whitespace().collect::<Vec<_>>().join(" "))?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
            write!(f, " [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// A returned row with named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append, mostly for tests and fixtures.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        self.columns.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Value of the first column, whatever its name.
    pub fn first(&self) -> Option<&SqlValue> {
        self.columns.first().map(|(_, value)| value)
    }

    pub fn int(&self, name: &str) -> HydroResult<i32> {
        match self.get(name) {
            Some(SqlValue::Int(v)) => Ok(*v),
            Some(SqlValue::BigInt(v)) => i32::try_from(*v).map_err(|_| column_type(name)),
            _ => Err(column_type(name)),
        }
    }

    pub fn text(&self, name: &str) -> HydroResult<String> {
        match self.get(name) {
            Some(SqlValue::Text(v)) => Ok(v.clone()),
            _ => Err(column_type(name)),
        }
    }

    /// Text column that may be NULL.
    pub fn opt_text(&self, name: &str) -> HydroResult<Option<String>> {
        match self.get(name) {
            Some(SqlValue::Text(v)) => Ok(Some(v.clone())),
            Some(SqlValue::Null) | Some(SqlValue::Timestamp(None)) => Ok(None),
            _ => Err(column_type(name)),
        }
    }

    pub fn timestamp(&self, name: &str) -> HydroResult<Option<DateTime<Utc>>> {
        match self.get(name) {
            Some(SqlValue::Timestamp(v)) => Ok(*v),
            Some(SqlValue::Null) => Ok(None),
            _ => Err(column_type(name)),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

fn column_type(name: &str) -> HydroError {
    HydroError::ColumnType {
        column: name.to_string(),
    }
}

/// Operations the ingestion core needs from the relational store.
///
/// Connection pooling is the implementation's concern: every call acquires
/// a pooled connection and returns it before completing.
#[async_trait]
pub trait Store: Send + Sync {
    /// Execute a statement, returning the number of affected rows.
    async fn execute(&self, statement: &Statement) -> HydroResult<u64>;

    /// Execute a query and return all rows.
    async fn fetch(&self, statement: &Statement) -> HydroResult<Vec<Row>>;

    /// Execute a get-or-insert statement and return the surrogate id it yields.
    async fn fetch_id(&self, statement: &Statement) -> HydroResult<i32> {
        let rows = self.fetch(statement).await?;
        let row = rows
            .first()
            .ok_or_else(|| HydroError::NoRows(statement.to_string()))?;
        match row.first() {
            Some(SqlValue::Int(id)) => Ok(*id),
            Some(SqlValue::BigInt(id)) => {
                i32::try_from(*id).map_err(|_| HydroError::ColumnType {
                    column: "id".to_string(),
                })
            }
            _ => Err(HydroError::ColumnType {
                column: "id".to_string(),
            }),
        }
    }

    /// Execute statements in one transaction while holding a store-wide
    /// advisory lock identified by `lock_key`.
    async fn execute_locked(&self, lock_key: i64, statements: &[Statement]) -> HydroResult<()>;

    /// Bulk-append a pre-serialized, `|`-delimited text batch.
    ///
    /// `destination` is a table name with its column list, e.g.
    /// `wres.observation(variableposition_id, observation_time, ...)`.
    /// Returns the number of rows written.
    async fn copy_in(&self, destination: &str, batch: Bytes) -> HydroResult<u64>;
}
