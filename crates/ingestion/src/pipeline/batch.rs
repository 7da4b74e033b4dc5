//! COPY text-format row buffers.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;

/// `|`-delimited rows in append order, one per line.
#[derive(Debug, Default)]
pub struct RowBatch {
    buf: BytesMut,
    rows: usize,
}

impl RowBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(forecastensemble_id, lead, forecasted_value)`
    pub fn push_forecast(&mut self, forecast_ensemble_id: i32, lead: i32, value: f64) {
        // Writing into BytesMut cannot fail.
        let _ = writeln!(self.buf, "{}|{}|{}", forecast_ensemble_id, lead, value);
        self.rows += 1;
    }

    /// `(variableposition_id, observation_time, observed_value, measurementunit_id, source_id)`
    pub fn push_observation(
        &mut self,
        position_id: i32,
        time: DateTime<Utc>,
        value: f64,
        unit_id: i32,
        source_id: i32,
    ) {
        let _ = writeln!(
            self.buf,
            "{}|{}|{}|{}|{}",
            position_id,
            time.to_rfc3339_opts(SecondsFormat::Secs, true),
            value,
            unit_id,
            source_id
        );
        self.rows += 1;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Hand over the serialized rows and start a fresh buffer.
    pub fn take(&mut self) -> (Bytes, usize) {
        let rows = std::mem::take(&mut self.rows);
        (self.buf.split().freeze(), rows)
    }

    /// Drop everything not yet taken.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.rows = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_forecast_rows() {
        let mut batch = RowBatch::new();
        batch.push_forecast(7, 1, 12.5);
        batch.push_forecast(7, 2, 13.0);

        assert_eq!(batch.rows(), 2);
        let (bytes, rows) = batch.take();
        assert_eq!(rows, 2);
        assert_eq!(&bytes[..], b"7|1|12.5\n7|2|13\n");
        assert!(batch.is_empty());
    }

    #[test]
    fn test_observation_row_format() {
        let mut batch = RowBatch::new();
        let when = Utc.with_ymd_and_hms(2017, 8, 8, 12, 0, 0).unwrap();
        batch.push_observation(3, when, 0.5, 1, 9);

        let (bytes, _) = batch.take();
        assert_eq!(&bytes[..], b"3|2017-08-08T12:00:00Z|0.5|1|9\n");
    }

    #[test]
    fn test_clear_discards_rows() {
        let mut batch = RowBatch::new();
        batch.push_forecast(1, 1, 1.0);
        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.take().0.is_empty());
    }
}
