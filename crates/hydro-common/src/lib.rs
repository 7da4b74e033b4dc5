//! Common types and utilities shared across the hydrologic ingestion crates.

pub mod error;
pub mod time;

pub use error::{HydroError, HydroResult};
pub use time::{parse_pi_datetime, DateRange, TimeParseError, TimeStepUnit};
