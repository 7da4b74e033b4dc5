use hydro_common::HydroResult;
use storage::{Row, Statement};

use super::{CachedDetail, Preload, SurrogateKeyCache};

/// A row of `wres.measurementunit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementUnitDetail {
    pub unit: String,
}

impl CachedDetail for MeasurementUnitDetail {
    type Key = String;

    const KIND: &'static str = "measurement_unit";
    const CAPACITY: usize = 100;

    fn key(&self) -> String {
        self.unit.clone()
    }

    fn save_statement(&self) -> Statement {
        Statement::new(
            "INSERT INTO wres.measurementunit (unit_name)
             VALUES ($1)
             ON CONFLICT (unit_name) DO UPDATE SET unit_name = EXCLUDED.unit_name
             RETURNING measurementunit_id",
        )
        .bind(self.unit.as_str())
    }
}

impl Preload for MeasurementUnitDetail {
    fn preload_statement(limit: usize) -> Statement {
        Statement::new("SELECT measurementunit_id, unit_name FROM wres.measurementunit LIMIT $1")
            .bind(limit as i64)
    }

    fn from_row(row: &Row) -> HydroResult<(i32, Self)> {
        Ok((
            row.int("measurementunit_id")?,
            Self {
                unit: row.text("unit_name")?,
            },
        ))
    }
}

pub type MeasurementUnitCache = SurrogateKeyCache<MeasurementUnitDetail>;

impl SurrogateKeyCache<MeasurementUnitDetail> {
    pub async fn unit_id(&self, unit: &str) -> HydroResult<i32> {
        self.resolve(MeasurementUnitDetail {
            unit: unit.to_string(),
        })
        .await
    }
}
