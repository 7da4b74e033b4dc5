//! Process-wide shared state for concurrent ingests.

use std::sync::Arc;

use storage::{BatchWriteScheduler, Store};

use crate::cache::Caches;
use crate::config::IngestSettings;
use crate::error::{IngestionError, Result};
use crate::partitions::PartitionRegistry;

/// Everything pipelines share: identifier caches, the partition registry
/// and the write scheduler. Build one per process and pass it by `Arc`.
pub struct IngestContext {
    store: Arc<dyn Store>,
    settings: IngestSettings,
    pub caches: Caches,
    pub partitions: PartitionRegistry,
    pub scheduler: BatchWriteScheduler,
}

impl IngestContext {
    pub fn new(store: Arc<dyn Store>, settings: IngestSettings) -> Result<Arc<Self>> {
        settings.validate()?;

        Ok(Arc::new(Self {
            caches: Caches::new(Arc::clone(&store)),
            partitions: PartitionRegistry::new(Arc::clone(&store), settings.partition_width),
            scheduler: BatchWriteScheduler::new(Arc::clone(&store), settings.max_concurrent_writes),
            store,
            settings,
        }))
    }

    /// Warm the identifier caches from existing rows.
    pub async fn preload(&self) -> Result<usize> {
        self.caches
            .preload_all()
            .await
            .map_err(|e| IngestionError::Resolve {
                series: "<preload>".to_string(),
                what: "cache preload",
                source: e,
            })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }
}
