//! Time handling utilities for hydrologic time series.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Unit of a series time step as declared by the source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeStepUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeStepUnit {
    /// Parse a unit name, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, TimeParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" | "sec" | "s" => Ok(TimeStepUnit::Second),
            "minute" | "minutes" | "min" => Ok(TimeStepUnit::Minute),
            "hour" | "hours" | "h" => Ok(TimeStepUnit::Hour),
            "day" | "days" => Ok(TimeStepUnit::Day),
            "week" | "weeks" => Ok(TimeStepUnit::Week),
            _ => Err(TimeParseError::UnknownUnit(s.to_string())),
        }
    }

    /// Number of seconds in one unit.
    pub fn seconds(&self) -> i64 {
        match self {
            TimeStepUnit::Second => 1,
            TimeStepUnit::Minute => 60,
            TimeStepUnit::Hour => 3_600,
            TimeStepUnit::Day => 86_400,
            TimeStepUnit::Week => 604_800,
        }
    }

    /// Convert `multiplier` units into whole lead hours (truncating).
    ///
    /// Returns `None` when the step does not fit in an `i32` hour count.
    pub fn to_lead_hours(&self, multiplier: i32) -> Option<i32> {
        let seconds = self.seconds().checked_mul(i64::from(multiplier))?;
        i32::try_from(seconds / 3_600).ok()
    }
}

/// Parse a PI-style split date and time ("2017-08-08", "12:00:00").
///
/// The time part is optional and defaults to midnight. An ISO 8601 / RFC 3339
/// string in the date slot is also accepted.
pub fn parse_pi_datetime(date: &str, time: Option<&str>) -> Result<DateTime<Utc>, TimeParseError> {
    let date = date.trim();

    if time.map(str::trim).unwrap_or("").is_empty() {
        if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
            return Ok(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S") {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| TimeParseError::InvalidFormat(date.to_string()))?;

    let clock = match time.map(str::trim) {
        None | Some("") => NaiveTime::MIN,
        Some(t) => NaiveTime::parse_from_str(t, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
            .map_err(|_| TimeParseError::InvalidFormat(format!("{} {}", date, t)))?,
    };

    Ok(Utc.from_utc_datetime(&day.and_time(clock)))
}

/// An optionally bounded date range.
///
/// Bounds are exclusive: a timestamp equal to either bound falls outside.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(earliest: Option<DateTime<Utc>>, latest: Option<DateTime<Utc>>) -> Self {
        Self { earliest, latest }
    }

    /// True when neither bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.earliest.is_none() && self.latest.is_none()
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        self.earliest.map_or(true, |e| dt > &e) && self.latest.map_or(true, |l| dt < &l)
    }

    /// Whether the closed window `[start, end]` could hold any timestamp in range.
    ///
    /// Missing window ends are treated as open.
    pub fn overlaps(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
        let before_latest = match (start, self.latest) {
            (Some(s), Some(l)) => s < l,
            _ => true,
        };
        let after_earliest = match (end, self.earliest) {
            (Some(e), Some(earliest)) => e > earliest,
            _ => true,
        };
        before_latest && after_earliest
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Unknown time step unit: {0}")]
    UnknownUnit(String),
}
