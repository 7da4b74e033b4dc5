//! Lead-time partitions of `wres.forecastvalue`.
//!
//! Each bucket of `PARTITION_WIDTH` lead hours gets its own child table in
//! the `partitions` schema, created the first time a value lands in it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use hydro_common::HydroResult;
use storage::{Statement, Store};

/// Lead hours per forecast-value partition.
pub const PARTITION_WIDTH: i32 = 80;

/// Advisory lock key held while creating partitions ("wresPART").
pub const PARTITION_LOCK_KEY: i64 = 0x7772_6573_5041_5254;

/// Bucket holding `lead` for partitions `width` hours wide.
pub fn bucket_for_lead(lead: i32, width: i32) -> i32 {
    lead.div_euclid(width)
}

/// Fully qualified child table for `bucket`.
pub fn partition_table(bucket: i32) -> String {
    format!("partitions.{}", partition_name(bucket))
}

fn partition_name(bucket: i32) -> String {
    if bucket < 0 {
        format!("forecastvalue_lead_negative_{}", bucket.unsigned_abs())
    } else {
        format!("forecastvalue_lead_{}", bucket)
    }
}

/// Lead range `[low, high)` covered by `bucket`. The upper bound of the
/// last bucket lies past `i32::MAX`.
pub fn bucket_bounds(bucket: i32, width: i32) -> (i64, i64) {
    let low = i64::from(bucket) * i64::from(width);
    (low, low + i64::from(width))
}

/// Statements creating the partition for `bucket`.
pub fn partition_ddl(bucket: i32, width: i32) -> Vec<Statement> {
    let name = partition_name(bucket);
    let table = partition_table(bucket);
    let (low, high) = bucket_bounds(bucket, width);

    vec![
        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                CHECK (lead >= {low} AND lead < {high})
            ) INHERITS (wres.forecastvalue)"
        )),
        Statement::new(format!(
            "CREATE INDEX IF NOT EXISTS {name}_lead_idx ON {table} (lead)"
        )),
        Statement::new(format!(
            "CREATE INDEX IF NOT EXISTS {name}_forecastensemble_idx ON {table} (forecastensemble_id)"
        )),
    ]
}

/// Column list used when copying into a partition.
pub fn forecast_value_destination(table: &str) -> String {
    format!("{}(forecastensemble_id, lead, forecasted_value)", table)
}

/// Process-wide memo of created partitions.
pub struct PartitionRegistry {
    store: Arc<dyn Store>,
    width: i32,
    created: RwLock<HashMap<i32, String>>,
    creation: Mutex<()>,
}

impl PartitionRegistry {
    pub fn new(store: Arc<dyn Store>, width: i32) -> Self {
        Self {
            store,
            width,
            created: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn bucket_for_lead(&self, lead: i32) -> i32 {
        bucket_for_lead(lead, self.width)
    }

    /// Make sure the partition for `bucket` exists, returning its table name.
    ///
    /// Cheap once a bucket is known: only the read lock is taken. Creation is
    /// serialized in-process by a mutex and across processes by an advisory
    /// lock held for the DDL transaction.
    pub async fn ensure(&self, bucket: i32) -> HydroResult<String> {
        {
            let created = self.created.read().await;
            if let Some(table) = created.get(&bucket) {
                return Ok(table.clone());
            }
        }

        let _creating = self.creation.lock().await;

        // Double-check in case another task created it while we waited
        if let Some(table) = self.created.read().await.get(&bucket) {
            return Ok(table.clone());
        }

        let table = partition_table(bucket);
        self.store
            .execute_locked(PARTITION_LOCK_KEY, &partition_ddl(bucket, self.width))
            .await?;

        self.created.write().await.insert(bucket, table.clone());

        let (low, high) = bucket_bounds(bucket, self.width);
        info!(
            bucket = bucket,
            table = %table,
            low = low,
            high = high,
            "Created forecast value partition"
        );

        Ok(table)
    }

    /// Buckets created by this process, ascending.
    pub async fn known_buckets(&self) -> Vec<i32> {
        let mut buckets: Vec<i32> = self.created.read().await.keys().copied().collect();
        buckets.sort_unstable();
        buckets
    }
}
