//! Error types for the hydrologic ingestion services.

use thiserror::Error;

/// Result type alias using HydroError.
pub type HydroResult<T> = Result<T, HydroError>;

/// Primary error type for store and infrastructure operations.
#[derive(Debug, Error)]
pub enum HydroError {
    // === Store Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Bulk copy into {destination} failed: {message}")]
    CopyError { destination: String, message: String },

    #[error("Query returned no rows: {0}")]
    NoRows(String),

    #[error("Column '{column}' missing or of unexpected type")]
    ColumnType { column: String },

    // === Data Errors ===
    #[error("Invalid time specification: {0}")]
    InvalidTime(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    // === Infrastructure Errors ===
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Task aborted: {0}")]
    TaskAborted(String),
}

impl HydroError {
    /// Whether the error originated in the relational store.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            HydroError::DatabaseError(_)
                | HydroError::CopyError { .. }
                | HydroError::NoRows(_)
                | HydroError::ColumnType { .. }
        )
    }
}

impl From<std::io::Error> for HydroError {
    fn from(err: std::io::Error) -> Self {
        HydroError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for HydroError {
    fn from(err: serde_json::Error) -> Self {
        HydroError::InternalError(format!("JSON error: {}", err))
    }
}

impl From<crate::time::TimeParseError> for HydroError {
    fn from(err: crate::time::TimeParseError) -> Self {
        HydroError::InvalidTime(err.to_string())
    }
}
