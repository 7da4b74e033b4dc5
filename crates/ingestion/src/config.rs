//! Ingestion settings and the declared series filters.
//!
//! Both are plain serde structs so the service can embed them in its YAML
//! configuration.

use chrono::{DateTime, Utc};
use hydro_common::DateRange;
use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, Result};
use crate::partitions::PARTITION_WIDTH;

/// Whether a file holds forecasts or observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Forecast,
    Observation,
}

impl DataKind {
    pub fn is_forecast(&self) -> bool {
        matches!(self, DataKind::Forecast)
    }
}

/// Throughput knobs for the bulk loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Rows per COPY batch before a buffer is flushed.
    pub max_batch_rows: usize,

    /// Concurrent COPY tasks holding a store connection.
    pub max_concurrent_writes: usize,

    /// Lead hours covered by one forecast-value partition.
    pub partition_width: i32,

    /// Files ingested at once by `Ingester::ingest_files`.
    pub file_parallelism: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_batch_rows: 200,
            max_concurrent_writes: 25,
            partition_width: PARTITION_WIDTH,
            file_parallelism: 4,
        }
    }
}

impl IngestSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_rows == 0 {
            return Err(IngestionError::InvalidConfig(
                "max_batch_rows must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_writes == 0 {
            return Err(IngestionError::InvalidConfig(
                "max_concurrent_writes must be at least 1".to_string(),
            ));
        }
        if self.partition_width <= 0 {
            return Err(IngestionError::InvalidConfig(format!(
                "partition_width must be positive, got {}",
                self.partition_width
            )));
        }
        if self.file_parallelism == 0 {
            return Err(IngestionError::InvalidConfig(
                "file_parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// An allowed ensemble trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleFilter {
    pub name: String,
    /// Any member when unset.
    #[serde(default)]
    pub member: Option<String>,
}

/// Inclusive bounds on accepted values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        self.minimum.map_or(true, |min| value >= min) && self.maximum.map_or(true, |max| value <= max)
    }
}

/// Declared filters for one ingest. Empty allow-lists admit everything.
///
/// Name comparisons are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestFilters {
    /// Allowed location ids.
    pub features: Vec<String>,
    /// Allowed variable (parameter) names.
    pub variables: Vec<String>,
    pub ensembles: Vec<EnsembleFilter>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub values: ValueRange,
}

impl IngestFilters {
    pub fn dates(&self) -> DateRange {
        DateRange::new(self.earliest, self.latest)
    }

    pub fn accepts_feature(&self, lid: &str) -> bool {
        self.features.is_empty() || self.features.iter().any(|f| f.eq_ignore_ascii_case(lid))
    }

    pub fn accepts_variable(&self, name: &str) -> bool {
        self.variables.is_empty() || self.variables.iter().any(|v| v.eq_ignore_ascii_case(name))
    }

    pub fn accepts_ensemble(&self, name: &str, member: &str) -> bool {
        self.ensembles.is_empty()
            || self.ensembles.iter().any(|e| {
                e.name.eq_ignore_ascii_case(name)
                    && e.member
                        .as_deref()
                        .map_or(true, |m| m.eq_ignore_ascii_case(member))
            })
    }

    pub fn accepts_value(&self, value: f64) -> bool {
        self.values.contains(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_settings() {
        let settings = IngestSettings::default();
        assert_eq!(settings.max_batch_rows, 200);
        assert_eq!(settings.max_concurrent_writes, 25);
        assert_eq!(settings.partition_width, 80);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let settings = IngestSettings {
            max_batch_rows: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = IngestSettings {
            partition_width: -80,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_settings_yaml_uses_defaults() {
        let settings: IngestSettings = serde_yaml::from_str("max_batch_rows: 3").unwrap();
        assert_eq!(settings.max_batch_rows, 3);
        assert_eq!(settings.max_concurrent_writes, 25);
    }

    #[test]
    fn test_empty_filters_accept_everything() {
        let filters = IngestFilters::default();
        assert!(filters.accepts_feature("ANY"));
        assert!(filters.accepts_variable("QINE"));
        assert!(filters.accepts_ensemble("MEFP", "1"));
        assert!(filters.accepts_value(-1e9));
        assert!(filters.dates().is_unbounded());
    }

    #[test]
    fn test_allow_lists_are_case_insensitive() {
        let filters = IngestFilters {
            features: vec!["drrc2".into()],
            variables: vec!["QINE".into()],
            ensembles: vec![EnsembleFilter {
                name: "mefp".into(),
                member: Some("3".into()),
            }],
            ..Default::default()
        };

        assert!(filters.accepts_feature("DRRC2"));
        assert!(!filters.accepts_feature("MBLC2"));
        assert!(filters.accepts_variable("qine"));
        assert!(filters.accepts_ensemble("MEFP", "3"));
        assert!(!filters.accepts_ensemble("MEFP", "4"));
    }

    #[test]
    fn test_value_range_is_inclusive() {
        let range = ValueRange {
            minimum: Some(0.0),
            maximum: Some(10.0),
        };
        assert!(range.contains(0.0));
        assert!(range.contains(10.0));
        assert!(!range.contains(10.5));
    }

    #[test]
    fn test_filters_from_yaml() {
        let yaml = r#"
features: [DRRC2]
earliest: 2017-08-01T00:00:00Z
values:
  minimum: 0.0
"#;
        let filters: IngestFilters = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            filters.earliest,
            Some(Utc.with_ymd_and_hms(2017, 8, 1, 0, 0, 0).unwrap())
        );
        assert!(!filters.accepts_value(-1.0));
        assert!(filters.latest.is_none());
    }
}
