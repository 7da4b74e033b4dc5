//! Error types for the ingestion crate.

use hydro_common::HydroError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Where in the ingest of one file a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Resolve,
    Partition,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Parse => "parse",
            Stage::Resolve => "resolve",
            Stage::Partition => "partition",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Malformed XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("Malformed header for series {series}: {message}")]
    MalformedHeader { series: String, message: String },

    #[error("Pipeline received {event} while {state}")]
    InvalidState { event: &'static str, state: String },

    #[error("Failed to resolve {what} for series {series}: {source}")]
    Resolve {
        series: String,
        what: &'static str,
        #[source]
        source: HydroError,
    },

    #[error("Failed to create partition for lead bucket {bucket} (series {series}): {source}")]
    Partition {
        bucket: i32,
        series: String,
        #[source]
        source: HydroError,
    },

    #[error("Bulk write failed: {0}")]
    Write(#[source] HydroError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{source} (in series {series})")]
    InSeries {
        series: String,
        #[source]
        source: Box<IngestionError>,
    },
}

impl IngestionError {
    /// The stage a failure is reported against.
    pub fn stage(&self) -> Stage {
        match self {
            IngestionError::FileRead(_)
            | IngestionError::Decompression(_)
            | IngestionError::Xml { .. }
            | IngestionError::MalformedHeader { .. }
            | IngestionError::InvalidState { .. }
            | IngestionError::InvalidConfig(_) => Stage::Parse,
            IngestionError::Resolve { .. } => Stage::Resolve,
            IngestionError::Partition { .. } => Stage::Partition,
            IngestionError::Write(_) => Stage::Write,
            IngestionError::InSeries { source, .. } => source.stage(),
        }
    }

    /// Series the failure belongs to, when one was open.
    pub fn series(&self) -> Option<&str> {
        match self {
            IngestionError::MalformedHeader { series, .. }
            | IngestionError::Resolve { series, .. }
            | IngestionError::Partition { series, .. }
            | IngestionError::InSeries { series, .. } => Some(series),
            _ => None,
        }
    }

    /// Attach the series that was open when this error surfaced, unless the
    /// error already names one.
    pub fn in_series(self, series: Option<String>) -> Self {
        match series {
            Some(series) if self.series().is_none() => IngestionError::InSeries {
                series,
                source: Box::new(self),
            },
            _ => self,
        }
    }

    /// Partition failures end the whole run, not just the current file.
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestionError::Partition { .. } => true,
            IngestionError::InSeries { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
