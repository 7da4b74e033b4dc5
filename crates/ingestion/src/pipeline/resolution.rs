//! Lazy foreign-key resolution for one series.
//!
//! Every stage resolves at most once per series and only when an accepted
//! event first needs it, so a series whose events are all missing never
//! touches the caches.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;

use hydro_common::HydroResult;

use crate::cache::{EnsembleKey, FeatureKey, ForecastEnsembleKey, ForecastKey, SourceKey};
use crate::context::IngestContext;
use crate::error::{IngestionError, Result};

use super::SeriesHeader;

/// Immutable facts about the series being ingested.
#[derive(Debug, Clone)]
pub struct SeriesContext {
    pub source_path: String,
    pub header: SeriesHeader,
}

impl SeriesContext {
    /// Short label for logs and errors.
    pub fn label(&self) -> String {
        let header = &self.header;
        if header.ensemble_name.is_empty() {
            format!("{}/{}", header.location_id, header.variable_name)
        } else {
            format!(
                "{}/{}/{}:{}",
                header.location_id, header.variable_name, header.ensemble_name, header.ensemble_member
            )
        }
    }

    /// Output time of the source: the creation timestamp, else the start date.
    pub fn output_time(&self) -> Option<DateTime<Utc>> {
        self.header.creation_time.or(self.header.start_date)
    }
}

/// Memoized resolution stages over a [`SeriesContext`].
pub struct KeyResolver {
    ctx: Arc<IngestContext>,
    series: Arc<SeriesContext>,
    ensemble: OnceCell<i32>,
    forecast: OnceCell<i32>,
    unit: OnceCell<i32>,
    variable: OnceCell<i32>,
    position: OnceCell<i32>,
    forecast_ensemble: OnceCell<i32>,
    source: OnceCell<i32>,
}

impl KeyResolver {
    pub fn new(ctx: Arc<IngestContext>, series: Arc<SeriesContext>) -> Self {
        Self {
            ctx,
            series,
            ensemble: OnceCell::new(),
            forecast: OnceCell::new(),
            unit: OnceCell::new(),
            variable: OnceCell::new(),
            position: OnceCell::new(),
            forecast_ensemble: OnceCell::new(),
            source: OnceCell::new(),
        }
    }

    pub fn series(&self) -> &SeriesContext {
        &self.series
    }

    fn failed(&self, what: &'static str) -> impl FnOnce(hydro_common::HydroError) -> IngestionError {
        let series = self.series.label();
        move |source| IngestionError::Resolve {
            series,
            what,
            source,
        }
    }

    async fn stage<F, Fut>(&self, cell: &OnceCell<i32>, what: &'static str, init: F) -> Result<i32>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = HydroResult<i32>>,
    {
        if let Some(id) = cell.get() {
            return Ok(*id);
        }
        cell.get_or_try_init(init).await.copied().map_err(self.failed(what))
    }

    pub async fn ensemble_id(&self) -> Result<i32> {
        let header = &self.series.header;
        self.stage(&self.ensemble, "ensemble", || {
            self.ctx.caches.ensembles.ensemble_id(EnsembleKey::new(
                &header.ensemble_name,
                &header.ensemble_member,
                &header.qualifier,
            ))
        })
        .await
    }

    pub async fn forecast_id(&self) -> Result<i32> {
        let forecast_date = self.series.header.forecast_date.ok_or_else(|| {
            IngestionError::MalformedHeader {
                series: self.series.label(),
                message: "forecast series has no forecast date".to_string(),
            }
        })?;

        self.stage(&self.forecast, "forecast", || {
            self.ctx.caches.forecasts.forecast_id(ForecastKey {
                source_path: self.series.source_path.clone(),
                forecast_date,
            })
        })
        .await
    }

    pub async fn measurement_unit_id(&self) -> Result<i32> {
        self.stage(&self.unit, "measurement unit", || {
            self.ctx.caches.units.unit_id(&self.series.header.unit)
        })
        .await
    }

    pub async fn variable_id(&self) -> Result<i32> {
        let unit_id = self.measurement_unit_id().await?;
        self.stage(&self.variable, "variable", || {
            self.ctx
                .caches
                .variables
                .variable_id(&self.series.header.variable_name, unit_id)
        })
        .await
    }

    pub async fn variable_position_id(&self) -> Result<i32> {
        let variable_id = self.variable_id().await?;
        let header = &self.series.header;
        self.stage(&self.position, "variable position", || {
            self.ctx.caches.features.position_id(
                FeatureKey::new(&header.location_id, &header.station_name),
                variable_id,
            )
        })
        .await
    }

    /// Composite key of the forecast trace, resolved ensemble first.
    pub async fn forecast_ensemble_id(&self) -> Result<i32> {
        if let Some(id) = self.forecast_ensemble.get() {
            return Ok(*id);
        }

        let key = ForecastEnsembleKey {
            ensemble_id: self.ensemble_id().await?,
            forecast_id: self.forecast_id().await?,
            measurementunit_id: self.measurement_unit_id().await?,
            variableposition_id: self.variable_position_id().await?,
        };

        self.stage(&self.forecast_ensemble, "forecast ensemble", || {
            self.ctx.caches.forecast_ensembles.forecast_ensemble_id(key)
        })
        .await
    }

    pub async fn source_id(&self) -> Result<i32> {
        self.stage(&self.source, "source", || {
            self.ctx.caches.sources.source_id(SourceKey {
                path: self.series.source_path.clone(),
                output_time: self.series.output_time(),
            })
        })
        .await
    }
}
