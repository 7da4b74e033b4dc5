//! Asynchronous bulk-write scheduling.
//!
//! Each submitted batch runs as its own task; a shared semaphore bounds how
//! many of them hold a store connection at once.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use hydro_common::{HydroError, HydroResult};

use crate::store::Store;

/// Bounded worker pool for COPY batches.
pub struct BatchWriteScheduler {
    store: Arc<dyn Store>,
    permits: Arc<Semaphore>,
    next_task: AtomicU64,
}

/// Handle to one submitted batch.
pub struct WriteHandle {
    task_id: u64,
    destination: String,
    rows: usize,
    task: JoinHandle<HydroResult<u64>>,
}

impl WriteHandle {
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Rows serialized into the batch at submission time.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Wait for this batch alone.
    pub async fn wait(self) -> HydroResult<u64> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(HydroError::TaskAborted(format!(
                "write task {} into {}: {}",
                self.task_id, self.destination, e
            ))),
        }
    }
}

/// Totals over a set of completed writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub batches: usize,
    pub rows: u64,
    pub failed: usize,
}

impl BatchWriteScheduler {
    pub fn new(store: Arc<dyn Store>, max_concurrent_writes: usize) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(max_concurrent_writes.max(1))),
            next_task: AtomicU64::new(0),
        }
    }

    /// Schedule `batch` for bulk append into `destination`.
    ///
    /// Returns immediately; the copy starts once a permit is free.
    pub fn submit(&self, destination: impl Into<String>, batch: Bytes, rows: usize) -> WriteHandle {
        let destination = destination.into();
        let task_id = self.next_task.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);
        let target = destination.clone();

        debug!(task_id = task_id, destination = %destination, rows = rows, "Submitting batch");

        let task = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| HydroError::TaskAborted(format!("write pool closed: {}", e)))?;
            store.copy_in(&target, batch).await
        });

        WriteHandle {
            task_id,
            destination,
            rows,
            task,
        }
    }

    /// Number of batches submitted over the scheduler's lifetime.
    pub fn submitted(&self) -> u64 {
        self.next_task.load(Ordering::Relaxed)
    }

    /// Free write permits right now.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for every handle in submission order.
    ///
    /// All failures are logged; the first one (by submission order) is
    /// returned once every task has finished.
    pub async fn await_all(handles: Vec<WriteHandle>) -> HydroResult<WriteSummary> {
        let mut summary = WriteSummary::default();
        let mut first_failure: Option<HydroError> = None;

        for handle in handles {
            let task_id = handle.task_id;
            let destination = handle.destination.clone();

            match handle.wait().await {
                Ok(rows) => {
                    summary.batches += 1;
                    summary.rows += rows;
                }
                Err(e) => {
                    error!(
                        task_id = task_id,
                        destination = %destination,
                        error = %e,
                        "Batch write failed"
                    );
                    summary.failed += 1;
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}
