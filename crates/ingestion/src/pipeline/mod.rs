//! Lead-time-partitioned bulk ingestion of parsed time series.
//!
//! A pipeline is fed by an event source, one series at a time:
//!
//! ```text
//! begin_series -> header_complete -> event* -> end_series
//! ```
//!
//! Forecast values are buffered per lead-time bucket and copied into the
//! bucket's partition of `wres.forecastvalue`; observations go to a single
//! buffer for `wres.observation`. Full buffers are handed to the shared
//! scheduler right away; the rest are flushed when the series ends.

mod batch;
mod resolution;

pub use batch::RowBatch;
pub use resolution::{KeyResolver, SeriesContext};

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use hydro_common::parse_pi_datetime;
use storage::{BatchWriteScheduler, WriteHandle, WriteSummary};

use crate::config::{DataKind, IngestFilters};
use crate::context::IngestContext;
use crate::error::{IngestionError, Result};
use crate::partitions::forecast_value_destination;

/// Column list for observation copies.
/// Values this close to the series' missing-value sentinel count as missing.
pub const MISSING_VALUE_TOLERANCE: f64 = 1e-7;

pub const OBSERVATION_DESTINATION: &str =
    "wres.observation(variableposition_id, observation_time, observed_value, measurementunit_id, source_id)";

/// Header fields of one series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesHeader {
    pub location_id: String,
    pub station_name: String,
    pub variable_name: String,
    pub unit: String,
    pub ensemble_name: String,
    pub ensemble_member: String,
    pub qualifier: String,
    pub missing_value: Option<f64>,
    /// Lead hours between consecutive events.
    pub time_step_hours: Option<i32>,
    pub forecast_date: Option<DateTime<Utc>>,
    pub creation_time: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Offset of event timestamps from UTC.
    pub utc_offset_secs: i32,
}

/// One event exactly as read from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub date: String,
    pub time: Option<String>,
    pub value: String,
}

impl RawEvent {
    pub fn new(date: &str, time: Option<&str>, value: &str) -> Self {
        Self {
            date: date.to_string(),
            time: time.map(str::to_string),
            value: value.to_string(),
        }
    }
}

/// Why a series was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Feature,
    Variable,
    Ensemble,
    Dates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesDecision {
    Accepted,
    Rejected(RejectReason),
}

/// Why an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    UnparseableValue,
    OutOfRange,
    UnparseableTime,
    OutOfDates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Appended to a buffer.
    Buffered,
    Skipped(SkipReason),
    /// The series was rejected or aborted.
    Ignored,
}

/// Counters over the lifetime of a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub series_seen: usize,
    pub series_accepted: usize,
    pub series_rejected: usize,
    pub series_aborted: usize,
    pub events_buffered: usize,
    pub events_skipped: usize,
    pub rows_discarded: usize,
    pub batches_submitted: usize,
    pub rows_submitted: usize,
}

struct ActiveSeries {
    resolver: KeyResolver,
    lead: i32,
}

enum SeriesState {
    Idle,
    Header,
    Accepted(Box<ActiveSeries>),
    Rejected,
    Aborted,
}

impl SeriesState {
    fn name(&self) -> &'static str {
        match self {
            SeriesState::Idle => "no series is open",
            SeriesState::Header => "awaiting the series header",
            SeriesState::Accepted(_) => "a series is open",
            SeriesState::Rejected => "the series was rejected",
            SeriesState::Aborted => "the series was aborted",
        }
    }
}

/// Write buffer of one lead-time bucket.
struct PartitionBucket {
    destination: String,
    batch: RowBatch,
}

/// Ingests the series of one source into the store.
pub struct IngestPipeline {
    ctx: Arc<IngestContext>,
    source_path: String,
    kind: DataKind,
    filters: Arc<IngestFilters>,
    state: SeriesState,
    buckets: BTreeMap<i32, PartitionBucket>,
    observations: RowBatch,
    handles: Vec<WriteHandle>,
    stats: PipelineStats,
}

impl IngestPipeline {
    pub fn new(
        ctx: Arc<IngestContext>,
        source_path: impl Into<String>,
        kind: DataKind,
        filters: Arc<IngestFilters>,
    ) -> Self {
        Self {
            ctx,
            source_path: source_path.into(),
            kind,
            filters,
            state: SeriesState::Idle,
            buckets: BTreeMap::new(),
            observations: RowBatch::new(),
            handles: Vec::new(),
            stats: PipelineStats::default(),
        }
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Label of the open series, if its header was accepted.
    pub fn current_series(&self) -> Option<String> {
        match &self.state {
            SeriesState::Accepted(active) => Some(active.resolver.series().label()),
            _ => None,
        }
    }

    pub fn begin_series(&mut self) -> Result<()> {
        match self.state {
            SeriesState::Idle => {
                self.state = SeriesState::Header;
                self.stats.series_seen += 1;
                Ok(())
            }
            ref other => Err(IngestionError::InvalidState {
                event: "series start",
                state: other.name().to_string(),
            }),
        }
    }

    /// Accept or reject the series described by `header`.
    ///
    /// Rejection has no side effects on the caches or the store.
    #[instrument(skip(self, header), fields(source = %self.source_path, location = %header.location_id))]
    pub fn header_complete(&mut self, header: SeriesHeader) -> Result<SeriesDecision> {
        if !matches!(self.state, SeriesState::Header) {
            return Err(IngestionError::InvalidState {
                event: "series header",
                state: self.state.name().to_string(),
            });
        }

        if let Some(reason) = self.rejection(&header) {
            debug!(reason = ?reason, variable = %header.variable_name, "Series rejected by filters");
            self.state = SeriesState::Rejected;
            self.stats.series_rejected += 1;
            return Ok(SeriesDecision::Rejected(reason));
        }

        let series = Arc::new(SeriesContext {
            source_path: self.source_path.clone(),
            header,
        });

        if self.kind.is_forecast() {
            let malformed = if series.header.forecast_date.is_none() {
                Some("forecast series has no forecast date")
            } else if series.header.time_step_hours.map_or(true, |step| step <= 0) {
                Some("forecast series needs a positive time step")
            } else {
                None
            };

            if let Some(message) = malformed {
                self.state = SeriesState::Aborted;
                self.stats.series_aborted += 1;
                return Err(IngestionError::MalformedHeader {
                    series: series.label(),
                    message: message.to_string(),
                });
            }
        }

        self.state = SeriesState::Accepted(Box::new(ActiveSeries {
            resolver: KeyResolver::new(Arc::clone(&self.ctx), series),
            lead: 0,
        }));
        self.stats.series_accepted += 1;

        Ok(SeriesDecision::Accepted)
    }

    fn rejection(&self, header: &SeriesHeader) -> Option<RejectReason> {
        if !self.filters.accepts_feature(&header.location_id) {
            return Some(RejectReason::Feature);
        }
        if !self.filters.accepts_variable(&header.variable_name) {
            return Some(RejectReason::Variable);
        }
        if self.kind.is_forecast()
            && !self
                .filters
                .accepts_ensemble(&header.ensemble_name, &header.ensemble_member)
        {
            return Some(RejectReason::Ensemble);
        }
        if !self.filters.dates().overlaps(header.start_date, header.end_date) {
            return Some(RejectReason::Dates);
        }
        None
    }

    /// Process one event of the open series.
    pub async fn event(&mut self, raw: RawEvent) -> Result<EventOutcome> {
        let active = match &mut self.state {
            SeriesState::Accepted(active) => active,
            SeriesState::Rejected | SeriesState::Aborted => return Ok(EventOutcome::Ignored),
            other => {
                return Err(IngestionError::InvalidState {
                    event: "event",
                    state: other.name().to_string(),
                })
            }
        };

        let header = &active.resolver.series().header;

        // Every event advances the lead, whether or not it is kept.
        if self.kind.is_forecast() {
            let step = header.time_step_hours.unwrap_or(0);
            match active.lead.checked_add(step) {
                Some(lead) => active.lead = lead,
                None => {
                    let err = IngestionError::MalformedHeader {
                        series: active.resolver.series().label(),
                        message: format!("time step of {} hours overflows the lead", step),
                    };
                    warn!(source = %self.source_path, error = %err, "Aborting series");
                    self.abort_series();
                    return Err(err);
                }
            }
        }
        let lead = active.lead;

        let checked = check_event(&raw, header, &self.filters);
        let (value, valid_time) = match checked {
            Ok(accepted) => accepted,
            Err(reason) => {
                self.stats.events_skipped += 1;
                return Ok(EventOutcome::Skipped(reason));
            }
        };

        let result = match self.kind {
            DataKind::Forecast => self.buffer_forecast(lead, value).await,
            DataKind::Observation => self.buffer_observation(valid_time, value).await,
        };

        match result {
            Ok(()) => {
                self.stats.events_buffered += 1;
                Ok(EventOutcome::Buffered)
            }
            Err(e) => {
                warn!(source = %self.source_path, error = %e, "Aborting series");
                self.abort_series();
                Err(e)
            }
        }
    }

    async fn buffer_forecast(&mut self, lead: i32, value: f64) -> Result<()> {
        let bucket = self.ctx.partitions.bucket_for_lead(lead);

        let table = match self.ctx.partitions.ensure(bucket).await {
            Ok(table) => table,
            Err(source) => {
                return Err(IngestionError::Partition {
                    bucket,
                    series: self.current_series().unwrap_or_default(),
                    source,
                })
            }
        };

        let fk = match &self.state {
            SeriesState::Accepted(active) => active.resolver.forecast_ensemble_id().await?,
            _ => return Ok(()),
        };

        let max_rows = self.ctx.settings().max_batch_rows;
        let entry = self.buckets.entry(bucket).or_insert_with(|| PartitionBucket {
            destination: forecast_value_destination(&table),
            batch: RowBatch::new(),
        });
        entry.batch.push_forecast(fk, lead, value);

        if entry.batch.rows() >= max_rows {
            submit(
                &self.ctx.scheduler,
                &mut self.handles,
                &mut self.stats,
                &entry.destination,
                &mut entry.batch,
            );
        }

        Ok(())
    }

    async fn buffer_observation(&mut self, valid_time: DateTime<Utc>, value: f64) -> Result<()> {
        let (position, unit, source) = match &self.state {
            SeriesState::Accepted(active) => {
                let resolver = &active.resolver;
                (
                    resolver.variable_position_id().await?,
                    resolver.measurement_unit_id().await?,
                    resolver.source_id().await?,
                )
            }
            _ => return Ok(()),
        };

        self.observations
            .push_observation(position, valid_time, value, unit, source);

        if self.observations.rows() >= self.ctx.settings().max_batch_rows {
            submit(
                &self.ctx.scheduler,
                &mut self.handles,
                &mut self.stats,
                OBSERVATION_DESTINATION,
                &mut self.observations,
            );
        }

        Ok(())
    }

    /// Close the open series, flushing its buffered rows.
    pub fn end_series(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, SeriesState::Idle) {
            SeriesState::Accepted(active) => {
                debug!(
                    series = %active.resolver.series().label(),
                    lead = active.lead,
                    "Series complete"
                );
                self.flush_leftovers();
                Ok(())
            }
            SeriesState::Rejected | SeriesState::Aborted => Ok(()),
            other => {
                let state = other.name().to_string();
                self.state = other;
                Err(IngestionError::InvalidState {
                    event: "series end",
                    state,
                })
            }
        }
    }

    /// Drop the open series' unsubmitted rows. Batches already handed to the
    /// scheduler stand.
    pub fn abort_series(&mut self) {
        let discarded = self.observations.rows()
            + self.buckets.values().map(|b| b.batch.rows()).sum::<usize>();

        self.observations.clear();
        for bucket in self.buckets.values_mut() {
            bucket.batch.clear();
        }

        if matches!(self.state, SeriesState::Accepted(_) | SeriesState::Header) {
            self.stats.series_aborted += 1;
        }
        if !matches!(self.state, SeriesState::Idle) {
            self.state = SeriesState::Aborted;
        }
        self.stats.rows_discarded += discarded;
    }

    /// Submit every non-empty buffer.
    pub fn flush_leftovers(&mut self) {
        for bucket in self.buckets.values_mut() {
            submit(
                &self.ctx.scheduler,
                &mut self.handles,
                &mut self.stats,
                &bucket.destination,
                &mut bucket.batch,
            );
        }
        submit(
            &self.ctx.scheduler,
            &mut self.handles,
            &mut self.stats,
            OBSERVATION_DESTINATION,
            &mut self.observations,
        );
    }

    /// Wait for every batch this pipeline submitted.
    ///
    /// Returns the first failure in submission order; all failures are logged.
    pub async fn await_completion(&mut self) -> Result<WriteSummary> {
        let handles = std::mem::take(&mut self.handles);
        let pending = handles.len();

        let summary = BatchWriteScheduler::await_all(handles)
            .await
            .map_err(IngestionError::Write)?;

        info!(
            source = %self.source_path,
            batches = pending,
            rows = summary.rows,
            "Pipeline writes complete"
        );

        Ok(summary)
    }
}

fn submit(
    scheduler: &BatchWriteScheduler,
    handles: &mut Vec<WriteHandle>,
    stats: &mut PipelineStats,
    destination: &str,
    batch: &mut RowBatch,
) {
    if batch.is_empty() {
        return;
    }
    let (bytes, rows) = batch.take();
    handles.push(scheduler.submit(destination, bytes, rows));
    stats.batches_submitted += 1;
    stats.rows_submitted += rows;
}

/// Parse and filter one event, returning its value and valid time.
fn check_event(
    raw: &RawEvent,
    header: &SeriesHeader,
    filters: &IngestFilters,
) -> std::result::Result<(f64, DateTime<Utc>), SkipReason> {
    let value: f64 = raw
        .value
        .trim()
        .parse()
        .map_err(|_| SkipReason::UnparseableValue)?;

    if let Some(missing) = header.missing_value {
        let near = (value - missing).abs() <= MISSING_VALUE_TOLERANCE;
        if near || (missing.is_nan() && value.is_nan()) {
            return Err(SkipReason::Missing);
        }
    }

    if !filters.accepts_value(value) {
        return Err(SkipReason::OutOfRange);
    }

    let local = parse_pi_datetime(&raw.date, raw.time.as_deref())
        .map_err(|_| SkipReason::UnparseableTime)?;
    let valid_time = local - Duration::seconds(header.utc_offset_secs as i64);

    if !filters.dates().contains(&valid_time) {
        return Err(SkipReason::OutOfDates);
    }

    Ok((value, valid_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn header() -> SeriesHeader {
        SeriesHeader {
            location_id: "DRRC2".into(),
            variable_name: "QINE".into(),
            unit: "CMS".into(),
            missing_value: Some(-999.0),
            time_step_hours: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_check_event_skips_missing_and_garbage() {
        let filters = IngestFilters::default();
        let h = header();

        let ok = check_event(&RawEvent::new("2017-08-08", Some("13:00:00"), "1.5"), &h, &filters);
        assert_eq!(ok.unwrap().0, 1.5);

        assert_eq!(
            check_event(&RawEvent::new("2017-08-08", Some("13:00:00"), "-999.0"), &h, &filters),
            Err(SkipReason::Missing)
        );
        assert_eq!(
            check_event(&RawEvent::new("2017-08-08", Some("13:00:00"), "abc"), &h, &filters),
            Err(SkipReason::UnparseableValue)
        );
        assert_eq!(
            check_event(&RawEvent::new("08/08/2017", Some("13:00:00"), "1.0"), &h, &filters),
            Err(SkipReason::UnparseableTime)
        );
    }

    #[test]
    fn test_values_near_sentinel_are_missing() {
        let filters = IngestFilters::default();
        let h = header();
        assert_eq!(
            check_event(&RawEvent::new("2017-08-08", None, "-999.00000001"), &h, &filters),
            Err(SkipReason::Missing)
        );
        assert_eq!(
            check_event(&RawEvent::new("2017-08-08", None, "-998.9999"), &h, &filters)
                .unwrap()
                .0,
            -998.9999
        );
    }

    #[test]
    fn test_nan_sentinel_matches_nan() {
        let filters = IngestFilters::default();
        let h = SeriesHeader {
            missing_value: Some(f64::NAN),
            ..header()
        };
        assert_eq!(
            check_event(&RawEvent::new("2017-08-08", None, "NaN"), &h, &filters),
            Err(SkipReason::Missing)
        );
        assert!(check_event(&RawEvent::new("2017-08-08", None, "2.0"), &h, &filters).is_ok());
    }

    #[test]
    fn test_utc_offset_is_applied() {
        let filters = IngestFilters::default();
        let h = SeriesHeader {
            utc_offset_secs: -6 * 3600,
            ..header()
        };
        let (_, when) =
            check_event(&RawEvent::new("2017-08-08", Some("06:00:00"), "1.0"), &h, &filters)
                .unwrap();
        assert_eq!(when, Utc.with_ymd_and_hms(2017, 8, 8, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_date_and_value_filters() {
        let filters = IngestFilters {
            earliest: Some(Utc.with_ymd_and_hms(2017, 8, 8, 12, 0, 0).unwrap()),
            values: crate::config::ValueRange {
                minimum: Some(0.0),
                maximum: None,
            },
            ..Default::default()
        };
        let h = header();

        assert_eq!(
            check_event(&RawEvent::new("2017-08-08", Some("12:00:00"), "1.0"), &h, &filters),
            Err(SkipReason::OutOfDates)
        );
        assert_eq!(
            check_event(&RawEvent::new("2017-08-08", Some("13:00:00"), "-1.0"), &h, &filters),
            Err(SkipReason::OutOfRange)
        );
    }
}
