//! Shared test utilities for the hydro-ingest workspace.
//!
//! This crate provides common testing infrastructure including:
//! - An in-memory store with call accounting and failure injection
//! - PI-XML document fixtures
//! - Assertion macros for copied rows
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{MemoryStore, SeriesFixture, pixml_document};
//! ```

pub mod fixtures;
pub mod memory_store;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use memory_store::*;

/// Split a copied row into its `|`-delimited fields.
pub fn fields(row: &str) -> Vec<&str> {
    row.split('|').collect()
}

/// Assert the row counts of a list of copies, in order.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_batch_sizes;
///
/// assert_batch_sizes!(store.copies_into("wres.observation"), [3, 3, 1]);
/// ```
#[macro_export]
macro_rules! assert_batch_sizes {
    ($copies:expr, [$($size:expr),* $(,)?]) => {{
        let actual: Vec<usize> = $copies.iter().map(|c| c.rows.len()).collect();
        let expected: Vec<usize> = vec![$($size),*];
        assert_eq!(actual, expected, "unexpected batch sizes");
    }};
}
