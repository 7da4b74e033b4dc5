//! Bounded surrogate-key caches for identifier tables.
//!
//! A [`SurrogateKeyCache`] maps a natural key (a location id, a unit name,
//! an ensemble trace, ...) to the integer id the store assigned it. A miss
//! persists the detail through an idempotent get-or-insert statement, so a
//! key that was evicted and requested again never creates a second row.
//!
//! ## Locking
//!
//! The id-ordered LRU and the key index live behind one mutex and are only
//! ever changed together. Store round trips happen with the lock released;
//! two tasks missing on the same key both persist it and the store hands
//! both the same id.

mod ensemble;
mod feature;
mod forecast;
mod measurement;
mod source;
mod variable;

pub use ensemble::{EnsembleCache, EnsembleDetail, EnsembleKey};
pub use feature::{FeatureCache, FeatureDetail, FeatureKey};
pub use forecast::{
    ForecastCache, ForecastDetail, ForecastEnsembleCache, ForecastEnsembleDetail,
    ForecastEnsembleKey, ForecastKey,
};
pub use measurement::{MeasurementUnitCache, MeasurementUnitDetail};
pub use source::{SourceCache, SourceDetail, SourceKey};
pub use variable::{VariableCache, VariableDetail};

use lru::LruCache;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use hydro_common::HydroResult;
use storage::{Row, Statement, Store};

/// A cacheable identifier-table entry.
pub trait CachedDetail: Clone + Send + Sync + 'static {
    /// Natural key; immutable once the detail is cached.
    type Key: Clone + Eq + Hash + Debug + Send + Sync;

    /// Short name used in logs.
    const KIND: &'static str;

    /// Default number of entries kept.
    const CAPACITY: usize;

    fn key(&self) -> Self::Key;

    /// Get-or-insert statement returning the surrogate id.
    fn save_statement(&self) -> Statement;
}

/// Details that can be bulk-loaded from the store at startup.
pub trait Preload: CachedDetail {
    /// Select at most `limit` `(id, detail columns...)` rows.
    fn preload_statement(limit: usize) -> Statement;

    fn from_row(row: &Row) -> HydroResult<(i32, Self)>;
}

struct Entries<D: CachedDetail> {
    details: LruCache<i32, D>,
    ids: HashMap<D::Key, i32>,
}

impl<D: CachedDetail> Entries<D> {
    /// Insert or refresh `id`, evicting the least-recently-touched entry when
    /// over capacity. Returns the number of evicted entries.
    fn insert(&mut self, id: i32, detail: D) -> u64 {
        let key = detail.key();
        let mut evicted = 0;

        if let Some((old_id, old)) = self.details.push(id, detail) {
            if old_id != id {
                let old_key = old.key();
                if self.ids.get(&old_key) == Some(&old_id) {
                    self.ids.remove(&old_key);
                }
                evicted += 1;
            }
        }

        self.ids.insert(key, id);
        evicted
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Generic bounded natural-key to surrogate-id cache.
pub struct SurrogateKeyCache<D: CachedDetail> {
    store: Arc<dyn Store>,
    entries: Mutex<Entries<D>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<D: CachedDetail> SurrogateKeyCache<D> {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_capacity(store, D::CAPACITY)
    }

    /// Cache holding at most `capacity` entries (minimum 1).
    pub fn with_capacity(store: Arc<dyn Store>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            store,
            entries: Mutex::new(Entries {
                details: LruCache::new(bound),
                ids: HashMap::with_capacity(capacity),
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Id for `detail`, persisting it on a miss.
    pub async fn resolve(&self, detail: D) -> HydroResult<i32> {
        Ok(self.resolve_detail(detail).await?.0)
    }

    /// Id plus the cached detail, persisting on a miss.
    pub async fn resolve_detail(&self, detail: D) -> HydroResult<(i32, D)> {
        let key = detail.key();

        {
            let mut entries = self.entries.lock().await;
            if let Some(id) = entries.ids.get(&key).copied() {
                if let Some(cached) = entries.details.get(&id) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok((id, cached.clone()));
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let id = self.store.fetch_id(&detail.save_statement()).await?;

        let mut entries = self.entries.lock().await;
        if let Some(cached) = entries.details.get(&id) {
            // Another task persisted the same key while the lock was released.
            return Ok((id, cached.clone()));
        }

        let evicted = entries.insert(id, detail.clone());
        drop(entries);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        debug!(cache = D::KIND, key = ?key, id = id, "Cached new surrogate key");

        Ok((id, detail))
    }

    /// Cached id for `key`. Never touches the store.
    pub async fn lookup_id(&self, key: &D::Key) -> Option<i32> {
        let mut entries = self.entries.lock().await;
        let id = entries.ids.get(key).copied()?;
        entries.details.promote(&id);
        Some(id)
    }

    /// Natural key cached for `id`. Never touches the store.
    pub async fn lookup_key(&self, id: i32) -> Option<D::Key> {
        self.entries.lock().await.details.get(&id).map(CachedDetail::key)
    }

    /// Cached detail for `id`.
    pub async fn detail(&self, id: i32) -> Option<D> {
        self.entries.lock().await.details.get(&id).cloned()
    }

    /// Apply `f` to the cached detail for `id`, if still cached.
    ///
    /// `f` must not change the natural key.
    pub(crate) async fn update_detail<F>(&self, id: i32, f: F) -> bool
    where
        F: FnOnce(&mut D),
    {
        let mut entries = self.entries.lock().await;
        match entries.details.get_mut(&id) {
            Some(detail) => {
                f(detail);
                true
            }
            None => false,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.details.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await,
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<D: Preload> SurrogateKeyCache<D> {
    /// Populate from existing store rows, up to capacity.
    pub async fn preload(&self) -> HydroResult<usize> {
        let rows = self
            .store
            .fetch(&D::preload_statement(self.capacity))
            .await?;

        let mut loaded = Vec::with_capacity(rows.len().min(self.capacity));
        for row in rows.iter().take(self.capacity) {
            loaded.push(D::from_row(row)?);
        }

        let count = loaded.len();
        let mut entries = self.entries.lock().await;
        let mut evicted = 0;
        for (id, detail) in loaded {
            evicted += entries.insert(id, detail);
        }
        drop(entries);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        info!(cache = D::KIND, loaded = count, "Preloaded cache");

        Ok(count)
    }
}

/// Every identifier cache of one ingest process.
pub struct Caches {
    pub features: FeatureCache,
    pub variables: VariableCache,
    pub units: MeasurementUnitCache,
    pub ensembles: EnsembleCache,
    pub sources: SourceCache,
    pub forecasts: ForecastCache,
    pub forecast_ensembles: ForecastEnsembleCache,
}

impl Caches {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            features: FeatureCache::new(Arc::clone(&store)),
            variables: VariableCache::new(Arc::clone(&store)),
            units: MeasurementUnitCache::new(Arc::clone(&store)),
            ensembles: EnsembleCache::new(Arc::clone(&store)),
            sources: SourceCache::new(Arc::clone(&store)),
            forecasts: ForecastCache::new(Arc::clone(&store)),
            forecast_ensembles: ForecastEnsembleCache::new(store),
        }
    }

    /// Run every eager preload, returning the number of entries loaded.
    pub async fn preload_all(&self) -> HydroResult<usize> {
        let loaded = self.units.preload().await?
            + self.variables.preload().await?
            + self.features.preload().await?
            + self.ensembles.preload().await?
            + self.sources.preload().await?;
        Ok(loaded)
    }

    /// Total cached entries across all caches.
    pub async fn total_entries(&self) -> usize {
        self.features.len().await
            + self.variables.len().await
            + self.units.len().await
            + self.ensembles.len().await
            + self.sources.len().await
            + self.forecasts.len().await
            + self.forecast_ensembles.len().await
    }

    /// `(kind, stats)` for each cache.
    pub async fn stats(&self) -> Vec<(&'static str, CacheStats)> {
        vec![
            (FeatureDetail::KIND, self.features.stats().await),
            (VariableDetail::KIND, self.variables.stats().await),
            (MeasurementUnitDetail::KIND, self.units.stats().await),
            (EnsembleDetail::KIND, self.ensembles.stats().await),
            (SourceDetail::KIND, self.sources.stats().await),
            (ForecastDetail::KIND, self.forecasts.stats().await),
            (ForecastEnsembleDetail::KIND, self.forecast_ensembles.stats().await),
        ]
    }
}
