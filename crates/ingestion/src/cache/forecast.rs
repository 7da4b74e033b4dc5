//! Caches for the forecast half of the foreign-key chain. Neither is
//! preloaded: their keys are specific to the files being ingested.

use chrono::{DateTime, Utc};
use hydro_common::HydroResult;
use storage::Statement;

use super::{CachedDetail, SurrogateKeyCache};

/// Natural key of one issued forecast.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForecastKey {
    pub source_path: String,
    pub forecast_date: DateTime<Utc>,
}

/// A row of `wres.forecast`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastDetail {
    pub key: ForecastKey,
}

impl CachedDetail for ForecastDetail {
    type Key = ForecastKey;

    const KIND: &'static str = "forecast";
    const CAPACITY: usize = 500;

    fn key(&self) -> ForecastKey {
        self.key.clone()
    }

    fn save_statement(&self) -> Statement {
        Statement::new(
            "INSERT INTO wres.forecast (source_path, forecast_date)
             VALUES ($1, $2)
             ON CONFLICT (source_path, forecast_date) DO UPDATE SET source_path = EXCLUDED.source_path
             RETURNING forecast_id",
        )
        .bind(self.key.source_path.as_str())
        .bind(self.key.forecast_date)
    }
}

pub type ForecastCache = SurrogateKeyCache<ForecastDetail>;

impl SurrogateKeyCache<ForecastDetail> {
    pub async fn forecast_id(&self, key: ForecastKey) -> HydroResult<i32> {
        self.resolve(ForecastDetail { key }).await
    }
}

/// Composite key of one forecast trace at one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForecastEnsembleKey {
    pub forecast_id: i32,
    pub ensemble_id: i32,
    pub measurementunit_id: i32,
    pub variableposition_id: i32,
}

/// A row of `wres.forecastensemble`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastEnsembleDetail {
    pub key: ForecastEnsembleKey,
}

impl CachedDetail for ForecastEnsembleDetail {
    type Key = ForecastEnsembleKey;

    const KIND: &'static str = "forecast_ensemble";
    const CAPACITY: usize = 1000;

    fn key(&self) -> ForecastEnsembleKey {
        self.key
    }

    fn save_statement(&self) -> Statement {
        Statement::new(
            "INSERT INTO wres.forecastensemble
                 (forecast_id, ensemble_id, measurementunit_id, variableposition_id)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (forecast_id, ensemble_id, measurementunit_id, variableposition_id)
             DO UPDATE SET forecast_id = EXCLUDED.forecast_id
             RETURNING forecastensemble_id",
        )
        .bind(self.key.forecast_id)
        .bind(self.key.ensemble_id)
        .bind(self.key.measurementunit_id)
        .bind(self.key.variableposition_id)
    }
}

pub type ForecastEnsembleCache = SurrogateKeyCache<ForecastEnsembleDetail>;

impl SurrogateKeyCache<ForecastEnsembleDetail> {
    pub async fn forecast_ensemble_id(&self, key: ForecastEnsembleKey) -> HydroResult<i32> {
        self.resolve(ForecastEnsembleDetail { key }).await
    }
}
