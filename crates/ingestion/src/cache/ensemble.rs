use hydro_common::HydroResult;
use storage::{Row, Statement};

use super::{CachedDetail, Preload, SurrogateKeyCache};

/// Natural key of one ensemble trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnsembleKey {
    pub name: String,
    pub member: String,
    pub qualifier: String,
}

impl EnsembleKey {
    pub fn new(name: &str, member: &str, qualifier: &str) -> Self {
        Self {
            name: name.to_string(),
            member: member.to_string(),
            qualifier: qualifier.to_string(),
        }
    }
}

/// A row of `wres.ensemble`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsembleDetail {
    pub key: EnsembleKey,
}

impl CachedDetail for EnsembleDetail {
    type Key = EnsembleKey;

    const KIND: &'static str = "ensemble";
    const CAPACITY: usize = 500;

    fn key(&self) -> EnsembleKey {
        self.key.clone()
    }

    fn save_statement(&self) -> Statement {
        Statement::new(
            "INSERT INTO wres.ensemble (ensemble_name, ensemblemember_id, qualifier_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (ensemble_name, ensemblemember_id, qualifier_id)
             DO UPDATE SET ensemble_name = EXCLUDED.ensemble_name
             RETURNING ensemble_id",
        )
        .bind(self.key.name.as_str())
        .bind(self.key.member.as_str())
        .bind(self.key.qualifier.as_str())
    }
}

impl Preload for EnsembleDetail {
    fn preload_statement(limit: usize) -> Statement {
        Statement::new(
            "SELECT ensemble_id, ensemble_name, ensemblemember_id, qualifier_id
             FROM wres.ensemble
             LIMIT $1",
        )
        .bind(limit as i64)
    }

    fn from_row(row: &Row) -> HydroResult<(i32, Self)> {
        Ok((
            row.int("ensemble_id")?,
            Self {
                key: EnsembleKey {
                    name: row.text("ensemble_name")?,
                    member: row.opt_text("ensemblemember_id")?.unwrap_or_default(),
                    qualifier: row.opt_text("qualifier_id")?.unwrap_or_default(),
                },
            },
        ))
    }
}

pub type EnsembleCache = SurrogateKeyCache<EnsembleDetail>;

impl SurrogateKeyCache<EnsembleDetail> {
    pub async fn ensemble_id(&self, key: EnsembleKey) -> HydroResult<i32> {
        self.resolve(EnsembleDetail { key }).await
    }
}
