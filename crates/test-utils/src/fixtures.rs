//! PI-XML document fixtures.
//!
//! [`SeriesFixture`] describes one `<series>` element; [`pixml_document`]
//! wraps any number of them in a `<TimeSeries>` root. Values are written
//! verbatim so tests can inject missing-value sentinels or garbage.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Common natural keys used across ingestion tests.
pub mod keys {
    pub const LID: &str = "DRRC2";
    pub const STATION: &str = "DOLORES, CO";
    pub const PARAMETER: &str = "QINE";
    pub const UNITS: &str = "CMS";
    pub const ENSEMBLE: &str = "MEFP";
    pub const QUALIFIER: &str = "";
    pub const MISSING: &str = "-999.0";
}

/// One `<series>` element.
#[derive(Debug, Clone)]
pub struct SeriesFixture {
    pub location_id: String,
    pub station_name: String,
    pub parameter_id: String,
    pub units: String,
    pub ensemble_id: Option<String>,
    pub member_index: Option<i32>,
    pub qualifier_id: Option<String>,
    pub missing_value: String,
    pub time_step: (String, i32),
    /// `(date, time)` attributes of `<forecastDate>`.
    pub forecast_date: Option<(String, String)>,
    pub start_date: (String, String),
    pub end_date: (String, String),
    pub creation: Option<(String, String)>,
    /// `(date, time, value)` per event.
    pub events: Vec<(String, String, String)>,
}

impl SeriesFixture {
    /// Forecast series with hourly events starting one hour after the
    /// forecast date, values `0.0, 1.0, ...`.
    pub fn forecast(location_id: &str, event_count: usize) -> Self {
        let events = (0..event_count)
            .map(|i| {
                let (date, time) = hours_after_base(i as i64 + 1);
                (date, time, format!("{}.0", i))
            })
            .collect();

        Self {
            location_id: location_id.to_string(),
            station_name: keys::STATION.to_string(),
            parameter_id: keys::PARAMETER.to_string(),
            units: keys::UNITS.to_string(),
            ensemble_id: Some(keys::ENSEMBLE.to_string()),
            member_index: Some(1),
            qualifier_id: None,
            missing_value: keys::MISSING.to_string(),
            time_step: ("hour".to_string(), 1),
            forecast_date: Some(("2017-08-08".to_string(), "12:00:00".to_string())),
            start_date: ("2017-08-08".to_string(), "13:00:00".to_string()),
            end_date: hours_after_base(event_count as i64),
            creation: Some(("2017-08-08".to_string(), "11:30:00".to_string())),
            events,
        }
    }

    /// Observation series with hourly events starting at the base time.
    pub fn observation(location_id: &str, event_count: usize) -> Self {
        let events = (0..event_count)
            .map(|i| {
                let (date, time) = hours_after_base(i as i64);
                (date, time, format!("{}.5", i))
            })
            .collect();

        Self {
            location_id: location_id.to_string(),
            station_name: keys::STATION.to_string(),
            parameter_id: keys::PARAMETER.to_string(),
            units: keys::UNITS.to_string(),
            ensemble_id: None,
            member_index: None,
            qualifier_id: None,
            missing_value: keys::MISSING.to_string(),
            time_step: ("hour".to_string(), 1),
            forecast_date: None,
            start_date: hours_after_base(0),
            end_date: hours_after_base(event_count.saturating_sub(1) as i64),
            creation: None,
            events,
        }
    }

    pub fn with_member(mut self, member: i32) -> Self {
        self.member_index = Some(member);
        self
    }

    pub fn with_parameter(mut self, parameter: &str) -> Self {
        self.parameter_id = parameter.to_string();
        self
    }

    pub fn with_time_step(mut self, unit: &str, multiplier: i32) -> Self {
        self.time_step = (unit.to_string(), multiplier);
        self
    }

    /// Replace the value of event `index`.
    pub fn with_value(mut self, index: usize, value: &str) -> Self {
        if let Some(event) = self.events.get_mut(index) {
            event.2 = value.to_string();
        }
        self
    }

    /// Replace the date attribute of event `index`.
    pub fn with_event_date(mut self, index: usize, date: &str) -> Self {
        if let Some(event) = self.events.get_mut(index) {
            event.0 = date.to_string();
        }
        self
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from("  <series>\n    <header>\n");
        xml.push_str("      <type>instantaneous</type>\n");
        push_text(&mut xml, "locationId", &self.location_id);
        push_text(&mut xml, "parameterId", &self.parameter_id);
        if let Some(ensemble) = &self.ensemble_id {
            push_text(&mut xml, "ensembleId", ensemble);
        }
        if let Some(member) = self.member_index {
            push_text(&mut xml, "ensembleMemberIndex", &member.to_string());
        }
        if let Some(qualifier) = &self.qualifier_id {
            push_text(&mut xml, "qualifierId", qualifier);
        }
        xml.push_str(&format!(
            "      <timeStep unit=\"{}\" multiplier=\"{}\"/>\n",
            self.time_step.0, self.time_step.1
        ));
        push_date(&mut xml, "startDate", &self.start_date);
        push_date(&mut xml, "endDate", &self.end_date);
        if let Some(forecast) = &self.forecast_date {
            push_date(&mut xml, "forecastDate", forecast);
        }
        push_text(&mut xml, "missVal", &self.missing_value);
        push_text(&mut xml, "stationName", &escape(&self.station_name));
        push_text(&mut xml, "units", &self.units);
        if let Some((date, time)) = &self.creation {
            push_text(&mut xml, "creationDate", date);
            push_text(&mut xml, "creationTime", time);
        }
        xml.push_str("    </header>\n");

        for (date, time, value) in &self.events {
            xml.push_str(&format!(
                "    <event date=\"{}\" time=\"{}\" value=\"{}\" flag=\"0\"/>\n",
                date, time, value
            ));
        }

        xml.push_str("  </series>\n");
        xml
    }
}

/// Wrap series in a PI-XML `<TimeSeries>` document with a UTC time zone.
pub fn pixml_document(series: &[SeriesFixture]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <TimeSeries xmlns=\"http://www.wldelft.nl/fews/PI\" version=\"1.2\">\n  \
         <timeZone>0.0</timeZone>\n",
    );
    for s in series {
        xml.push_str(&s.to_xml());
    }
    xml.push_str("</TimeSeries>\n");
    xml
}

/// Write `content` to `dir/name`, returning the path.
pub fn write_pixml(dir: &Path, name: &str, content: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, content)?;
    Ok(path)
}

/// Write `content` gzip-compressed to `dir/name`.
pub fn write_pixml_gz(dir: &Path, name: &str, content: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes())?;
    std::fs::write(&path, encoder.finish()?)?;
    Ok(path)
}

/// `(date, time)` strings `hours` after 2017-08-08 12:00:00.
fn hours_after_base(hours: i64) -> (String, String) {
    let base = chrono::NaiveDate::from_ymd_opt(2017, 8, 8)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap_or_default();
    let at = base + chrono::Duration::hours(hours);
    (
        at.format("%Y-%m-%d").to_string(),
        at.format("%H:%M:%S").to_string(),
    )
}

fn push_text(xml: &mut String, tag: &str, text: &str) {
    xml.push_str(&format!("      <{tag}>{text}</{tag}>\n"));
}

fn push_date(xml: &mut String, tag: &str, (date, time): &(String, String)) {
    xml.push_str(&format!(
        "      <{tag} date=\"{date}\" time=\"{time}\"/>\n"
    ));
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_fixture_shape() {
        let series = SeriesFixture::forecast("DRRC2", 3);
        let xml = series.to_xml();

        assert!(xml.contains("<forecastDate date=\"2017-08-08\" time=\"12:00:00\"/>"));
        assert!(xml.contains("<ensembleMemberIndex>1</ensembleMemberIndex>"));
        assert_eq!(xml.matches("<event ").count(), 3);
        assert_eq!(series.end_date, ("2017-08-08".to_string(), "15:00:00".to_string()));
    }

    #[test]
    fn test_observation_fixture_has_no_forecast_date() {
        let xml = SeriesFixture::observation("DRRC2", 2).to_xml();
        assert!(!xml.contains("forecastDate"));
        assert!(xml.contains("value=\"1.5\""));
    }

    #[test]
    fn test_document_wraps_series() {
        let doc = pixml_document(&[
            SeriesFixture::observation("A", 1),
            SeriesFixture::observation("B", 1),
        ]);
        assert!(doc.starts_with("<?xml"));
        assert_eq!(doc.matches("<series>").count(), 2);
        assert!(doc.trim_end().ends_with("</TimeSeries>"));
    }

    #[test]
    fn test_gzip_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pixml_gz(dir.path(), "obs.xml.gz", "<TimeSeries/>").unwrap();
        let bytes = std::fs::read(path).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }
}
