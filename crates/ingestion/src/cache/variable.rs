use hydro_common::HydroResult;
use storage::{Row, Statement};

use super::{CachedDetail, Preload, SurrogateKeyCache};

/// A row of `wres.variable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDetail {
    pub name: String,
    /// Unit the variable was first ingested in.
    pub measurementunit_id: i32,
}

impl CachedDetail for VariableDetail {
    type Key = String;

    const KIND: &'static str = "variable";
    const CAPACITY: usize = 100;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn save_statement(&self) -> Statement {
        Statement::new(
            "INSERT INTO wres.variable (variable_name, measurementunit_id)
             VALUES ($1, $2)
             ON CONFLICT (variable_name) DO UPDATE SET variable_name = EXCLUDED.variable_name
             RETURNING variable_id",
        )
        .bind(self.name.as_str())
        .bind(self.measurementunit_id)
    }
}

impl Preload for VariableDetail {
    fn preload_statement(limit: usize) -> Statement {
        Statement::new(
            "SELECT variable_id, variable_name, measurementunit_id FROM wres.variable LIMIT $1",
        )
        .bind(limit as i64)
    }

    fn from_row(row: &Row) -> HydroResult<(i32, Self)> {
        Ok((
            row.int("variable_id")?,
            Self {
                name: row.text("variable_name")?,
                measurementunit_id: row.int("measurementunit_id")?,
            },
        ))
    }
}

pub type VariableCache = SurrogateKeyCache<VariableDetail>;

impl SurrogateKeyCache<VariableDetail> {
    pub async fn variable_id(&self, name: &str, measurementunit_id: i32) -> HydroResult<i32> {
        self.resolve(VariableDetail {
            name: name.to_string(),
            measurementunit_id,
        })
        .await
    }
}
