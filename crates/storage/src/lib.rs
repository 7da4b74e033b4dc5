//! Relational storage for hydrologic time-series ingestion.
//!
//! Provides the [`Store`] seam used by the identifier caches and the bulk
//! loader, its PostgreSQL implementation, and the asynchronous batch write
//! scheduler.

pub mod database;
pub mod scheduler;
pub mod store;

pub use database::{Database, DatabaseConfig};
pub use scheduler::{BatchWriteScheduler, WriteHandle, WriteSummary};
pub use store::{Row, SqlValue, Statement, Store};
