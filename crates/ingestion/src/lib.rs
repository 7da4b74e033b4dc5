//! Hydrologic time-series ingestion library.
//!
//! Provides the core logic for loading forecast and observation time series
//! into the relational store.
//!
//! # Architecture
//!
//! - Surrogate-key caches resolve natural identifiers (locations, variables,
//!   units, ensembles, sources, forecasts) to store ids, persisting on miss
//! - A partition registry creates lead-time partitions of the forecast value
//!   table on first use
//! - Pipelines buffer parsed events into COPY batches and hand them to the
//!   shared write scheduler
//! - The PI-XML reader and the [`Ingester`] drive pipelines from files

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
mod ingester;
pub mod partitions;
pub mod pipeline;
pub mod pixml;

// Re-exports
pub use cache::{CacheStats, CachedDetail, Caches, Preload, SurrogateKeyCache};
pub use config::{DataKind, EnsembleFilter, IngestFilters, IngestSettings, ValueRange};
pub use context::IngestContext;
pub use error::{IngestionError, Result, Stage};
pub use ingester::{FileOutcome, Ingester, IngestionResult};
pub use partitions::{PartitionRegistry, PARTITION_WIDTH};
pub use pipeline::{
    EventOutcome, IngestPipeline, PipelineStats, RawEvent, RejectReason, SeriesDecision,
    SeriesHeader, SkipReason,
};
pub use pixml::{PixmlReader, ReadSummary};
