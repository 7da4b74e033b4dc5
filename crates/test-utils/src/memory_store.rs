//! In-memory [`Store`] for exercising caches and pipelines without PostgreSQL.
//!
//! Get-or-insert statements are answered with deterministic surrogate ids:
//! the same SQL with the same parameters always yields the same id, the way
//! a natural-key uniqueness constraint behaves in the real schema. Every call
//! is recorded so tests can assert on persistence round trips, partition DDL
//! and copied rows.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use hydro_common::{HydroError, HydroResult};
use storage::{Row, Statement, Store};

/// One completed `copy_in` call.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyRecord {
    pub destination: String,
    pub rows: Vec<String>,
}

/// One completed `execute_locked` call.
#[derive(Debug, Clone, PartialEq)]
pub struct LockedCall {
    pub lock_key: i64,
    pub statements: Vec<Statement>,
}

#[derive(Default)]
struct State {
    /// sql -> (statement identity -> id)
    ids: HashMap<String, HashMap<String, i32>>,
    id_calls: Vec<Statement>,
    executed: Vec<Statement>,
    locked: Vec<LockedCall>,
    copies: Vec<CopyRecord>,
    fetch_rows: Vec<(String, Vec<Row>)>,
    fail_id_containing: Vec<String>,
    fail_copy_containing: Vec<String>,
    fail_locked: bool,
}

/// Thread-safe in-memory store with call accounting and failure injection.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every store call, widening race windows in concurrency tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Answer `fetch` calls whose SQL contains `sql_fragment` with `rows`.
    pub fn with_rows(self, sql_fragment: &str, rows: Vec<Row>) -> Self {
        self.state().fetch_rows.push((sql_fragment.to_string(), rows));
        self
    }

    /// Fail get-or-insert calls whose SQL or bound parameters contain
    /// `fragment`, e.g. `"wres.ensemble"` or `"'BADLID'"`.
    pub fn fail_ids_containing(&self, fragment: &str) {
        self.state().fail_id_containing.push(fragment.to_string());
    }

    /// Stop failing get-or-insert calls.
    pub fn clear_id_failures(&self) {
        self.state().fail_id_containing.clear();
    }

    /// Fail copies whose destination or batch text contains `marker`.
    pub fn fail_copy_containing(&self, marker: &str) {
        self.state().fail_copy_containing.push(marker.to_string());
    }

    /// Fail every advisory-locked transaction.
    pub fn fail_locked(&self) {
        self.state().fail_locked = true;
    }

    /// Total get-or-insert round trips.
    pub fn id_calls(&self) -> usize {
        self.state().id_calls.len()
    }

    /// Get-or-insert round trips whose SQL contains `sql_fragment`.
    pub fn id_calls_containing(&self, sql_fragment: &str) -> usize {
        self.state()
            .id_calls
            .iter()
            .filter(|s| s.sql.contains(sql_fragment))
            .count()
    }

    /// Distinct rows the store holds for get-or-insert SQL containing `sql_fragment`.
    pub fn distinct_ids_containing(&self, sql_fragment: &str) -> usize {
        self.state()
            .ids
            .iter()
            .filter(|(sql, _)| sql.contains(sql_fragment))
            .map(|(_, ids)| ids.len())
            .sum()
    }

    pub fn executed(&self) -> Vec<Statement> {
        self.state().executed.clone()
    }

    pub fn locked_calls(&self) -> Vec<LockedCall> {
        self.state().locked.clone()
    }

    /// Every completed copy, in completion order.
    pub fn copies(&self) -> Vec<CopyRecord> {
        self.state().copies.clone()
    }

    /// Completed copies whose destination contains `fragment`.
    pub fn copies_into(&self, fragment: &str) -> Vec<CopyRecord> {
        self.state()
            .copies
            .iter()
            .filter(|c| c.destination.contains(fragment))
            .cloned()
            .collect()
    }

    /// Total rows across all completed copies.
    pub fn copied_rows(&self) -> usize {
        self.state().copies.iter().map(|c| c.rows.len()).sum()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn execute(&self, statement: &Statement) -> HydroResult<u64> {
        self.pause().await;
        self.state().executed.push(statement.clone());
        Ok(1)
    }

    async fn fetch(&self, statement: &Statement) -> HydroResult<Vec<Row>> {
        self.pause().await;
        let state = self.state();
        let rows = state
            .fetch_rows
            .iter()
            .find(|(fragment, _)| statement.sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        Ok(rows)
    }

    async fn fetch_id(&self, statement: &Statement) -> HydroResult<i32> {
        self.pause().await;
        let mut state = self.state();
        state.id_calls.push(statement.clone());

        let identity = statement.to_string();
        if state
            .fail_id_containing
            .iter()
            .any(|fragment| identity.contains(fragment.as_str()))
        {
            return Err(HydroError::DatabaseError(format!(
                "injected failure for {}",
                statement
            )));
        }

        let ids = state.ids.entry(statement.sql.clone()).or_default();
        let next = ids.len() as i32 + 1;
        Ok(*ids.entry(identity).or_insert(next))
    }

    async fn execute_locked(&self, lock_key: i64, statements: &[Statement]) -> HydroResult<()> {
        self.pause().await;
        let mut state = self.state();
        if state.fail_locked {
            return Err(HydroError::DatabaseError(format!(
                "injected failure under advisory lock {}",
                lock_key
            )));
        }
        state.locked.push(LockedCall {
            lock_key,
            statements: statements.to_vec(),
        });
        Ok(())
    }

    async fn copy_in(&self, destination: &str, batch: Bytes) -> HydroResult<u64> {
        self.pause().await;
        let text = String::from_utf8_lossy(&batch).into_owned();
        let mut state = self.state();

        if let Some(marker) = state
            .fail_copy_containing
            .iter()
            .find(|m| destination.contains(m.as_str()) || text.contains(m.as_str()))
        {
            return Err(HydroError::CopyError {
                destination: destination.to_string(),
                message: format!("injected failure ({})", marker),
            });
        }

        let rows: Vec<String> = text.lines().map(str::to_string).collect();
        let count = rows.len() as u64;
        state.copies.push(CopyRecord {
            destination: destination.to_string(),
            rows,
        });
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_stable_per_natural_key() {
        let store = MemoryStore::new();
        let insert = "INSERT INTO wres.measurementunit (unit_name) VALUES ($1) RETURNING measurementunit_id";

        let cms = store.fetch_id(&Statement::new(insert).bind("CMS")).await.unwrap();
        let cfs = store.fetch_id(&Statement::new(insert).bind("CFS")).await.unwrap();
        let again = store.fetch_id(&Statement::new(insert).bind("CMS")).await.unwrap();

        assert_eq!(cms, again);
        assert_ne!(cms, cfs);
        assert_eq!(store.id_calls(), 3);
        assert_eq!(store.distinct_ids_containing("measurementunit"), 2);
    }

    #[tokio::test]
    async fn test_copy_records_rows_and_injected_failures() {
        let store = MemoryStore::new();
        store.fail_copy_containing("BAD");

        let ok = store
            .copy_in("wres.observation", Bytes::from_static(b"1|a\n2|b\n"))
            .await
            .unwrap();
        assert_eq!(ok, 2);

        let err = store
            .copy_in("wres.observation", Bytes::from_static(b"BAD|row\n"))
            .await
            .unwrap_err();
        assert!(err.is_store_error());
        assert_eq!(store.copied_rows(), 2);
    }

    #[test]
    fn test_executed_statements_are_recorded() {
        let store = MemoryStore::new();
        let statement = Statement::new("CREATE SCHEMA IF NOT EXISTS partitions");

        let affected = tokio_test::block_on(store.execute(&statement)).unwrap();

        assert_eq!(affected, 1);
        assert_eq!(store.executed(), vec![statement]);
    }

    #[tokio::test]
    async fn test_seeded_fetch_rows() {
        let store = MemoryStore::new().with_rows(
            "FROM wres.variable",
            vec![Row::new().with("variable_id", 3).with("variable_name", "QINE")],
        );

        let rows = store
            .fetch(&Statement::new("SELECT variable_id, variable_name FROM wres.variable"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(store
            .fetch(&Statement::new("SELECT 1 FROM wres.feature"))
            .await
            .unwrap()
            .is_empty());
    }
}
