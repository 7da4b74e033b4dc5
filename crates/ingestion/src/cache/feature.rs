use std::collections::HashMap;

use hydro_common::HydroResult;
use storage::{Row, Statement};

use super::{CachedDetail, Preload, SurrogateKeyCache};

/// Natural key of a location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureKey {
    pub lid: String,
    pub name: String,
}

impl FeatureKey {
    pub fn new(lid: &str, name: &str) -> Self {
        Self {
            lid: lid.to_string(),
            name: name.to_string(),
        }
    }
}

/// A row of `wres.feature` plus the variable positions resolved for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDetail {
    pub key: FeatureKey,
    /// variable_id -> variableposition_id
    pub positions: HashMap<i32, i32>,
}

impl FeatureDetail {
    pub fn new(key: FeatureKey) -> Self {
        Self {
            key,
            positions: HashMap::new(),
        }
    }
}

impl CachedDetail for FeatureDetail {
    type Key = FeatureKey;

    const KIND: &'static str = "feature";
    const CAPACITY: usize = 1000;

    fn key(&self) -> FeatureKey {
        self.key.clone()
    }

    fn save_statement(&self) -> Statement {
        Statement::new(
            "INSERT INTO wres.feature (lid, feature_name)
             VALUES ($1, $2)
             ON CONFLICT (lid, feature_name) DO UPDATE SET lid = EXCLUDED.lid
             RETURNING feature_id",
        )
        .bind(self.key.lid.as_str())
        .bind(self.key.name.as_str())
    }
}

impl Preload for FeatureDetail {
    fn preload_statement(limit: usize) -> Statement {
        Statement::new("SELECT feature_id, lid, feature_name FROM wres.feature LIMIT $1")
            .bind(limit as i64)
    }

    fn from_row(row: &Row) -> HydroResult<(i32, Self)> {
        let key = FeatureKey {
            lid: row.text("lid")?,
            name: row.opt_text("feature_name")?.unwrap_or_default(),
        };
        Ok((row.int("feature_id")?, Self::new(key)))
    }
}

fn position_statement(feature_id: i32, variable_id: i32) -> Statement {
    Statement::new(
        "INSERT INTO wres.variableposition (x_position, variable_id)
         VALUES ($1, $2)
         ON CONFLICT (x_position, variable_id) DO UPDATE SET variable_id = EXCLUDED.variable_id
         RETURNING variableposition_id",
    )
    .bind(feature_id)
    .bind(variable_id)
}

pub type FeatureCache = SurrogateKeyCache<FeatureDetail>;

impl SurrogateKeyCache<FeatureDetail> {
    pub async fn feature_id(&self, key: FeatureKey) -> HydroResult<i32> {
        self.resolve(FeatureDetail::new(key)).await
    }

    /// Id of the (feature, variable) position, memoized on the feature detail.
    pub async fn position_id(&self, key: FeatureKey, variable_id: i32) -> HydroResult<i32> {
        let (feature_id, detail) = self.resolve_detail(FeatureDetail::new(key)).await?;

        if let Some(position) = detail.positions.get(&variable_id) {
            return Ok(*position);
        }

        let position = self
            .store()
            .fetch_id(&position_statement(feature_id, variable_id))
            .await?;

        self.update_detail(feature_id, |d| {
            d.positions.insert(variable_id, position);
        })
        .await;

        Ok(position)
    }
}
