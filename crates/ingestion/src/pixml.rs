//! Streaming reader for FEWS PI-XML time-series documents.
//!
//! The document is walked once with quick-xml and every series, header and
//! event is pushed into an [`IngestPipeline`] as it is read.

use chrono::{DateTime, Duration, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, trace};

use hydro_common::{parse_pi_datetime, TimeStepUnit};

use crate::error::{IngestionError, Result};
use crate::pipeline::{IngestPipeline, RawEvent, SeriesDecision, SeriesHeader};

/// What one pass over a document produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub series: usize,
    pub events: usize,
}

/// Header text element whose content is being read.
#[derive(Debug, Clone, Copy)]
enum TextField {
    TimeZone,
    LocationId,
    StationName,
    ParameterId,
    Units,
    EnsembleId,
    EnsembleMember,
    QualifierId,
    MissVal,
    CreationDate,
    CreationTime,
}

impl TextField {
    fn from_tag(tag: &str) -> Option<Self> {
        let field = match tag {
            "timezone" => TextField::TimeZone,
            "locationid" => TextField::LocationId,
            "stationname" => TextField::StationName,
            "parameterid" => TextField::ParameterId,
            "units" => TextField::Units,
            "ensembleid" => TextField::EnsembleId,
            "ensemblememberindex" | "ensemblememberid" => TextField::EnsembleMember,
            "qualifierid" => TextField::QualifierId,
            "missval" => TextField::MissVal,
            "creationdate" => TextField::CreationDate,
            "creationtime" => TextField::CreationTime,
            _ => return None,
        };
        Some(field)
    }
}

/// Header fields as read, before interpretation.
#[derive(Debug, Default)]
struct HeaderText {
    location_id: String,
    station_name: String,
    parameter_id: String,
    units: String,
    ensemble_id: String,
    ensemble_member: String,
    qualifier_id: String,
    miss_val: Option<String>,
    time_step_hours: Option<i32>,
    forecast_date: Option<DateTime<Utc>>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    creation_date: Option<String>,
    creation_time: Option<String>,
}

impl HeaderText {
    fn set(&mut self, field: TextField, text: String) {
        match field {
            TextField::LocationId => self.location_id = text,
            TextField::StationName => self.station_name = text,
            TextField::ParameterId => self.parameter_id = text,
            TextField::Units => self.units = text,
            TextField::EnsembleId => self.ensemble_id = text,
            TextField::EnsembleMember => self.ensemble_member = text,
            TextField::QualifierId => self.qualifier_id = text,
            TextField::MissVal => self.miss_val = Some(text),
            TextField::CreationDate => self.creation_date = Some(text),
            TextField::CreationTime => self.creation_time = Some(text),
            TextField::TimeZone => {}
        }
    }

    fn into_header(self, utc_offset_secs: i32) -> SeriesHeader {
        let creation_time = self.creation_date.as_deref().and_then(|date| {
            parse_pi_datetime(date, self.creation_time.as_deref())
                .ok()
                .map(|local| to_utc(local, utc_offset_secs))
        });

        SeriesHeader {
            location_id: self.location_id,
            station_name: self.station_name,
            variable_name: self.parameter_id,
            unit: self.units,
            ensemble_name: self.ensemble_id,
            ensemble_member: self.ensemble_member,
            qualifier: self.qualifier_id,
            missing_value: self.miss_val.and_then(|v| v.trim().parse().ok()),
            time_step_hours: self.time_step_hours,
            forecast_date: self.forecast_date,
            creation_time,
            start_date: self.start_date,
            end_date: self.end_date,
            utc_offset_secs,
        }
    }
}

/// Push-style PI-XML reader over an in-memory document.
pub struct PixmlReader<'a> {
    reader: Reader<&'a [u8]>,
    utc_offset_secs: i32,
}

impl<'a> PixmlReader<'a> {
    pub fn new(document: &'a [u8]) -> Self {
        let mut reader = Reader::from_reader(document);
        reader.trim_text(true);

        Self {
            reader,
            utc_offset_secs: 0,
        }
    }

    fn xml_error(&self, message: impl ToString) -> IngestionError {
        IngestionError::Xml {
            position: self.reader.buffer_position() as u64,
            message: message.to_string(),
        }
    }

    /// Read the whole document into `pipeline`.
    ///
    /// Stops at the first error; the caller decides what to do with the
    /// series that was open.
    pub async fn read_into(mut self, pipeline: &mut IngestPipeline) -> Result<ReadSummary> {
        let mut summary = ReadSummary::default();
        let mut in_series = false;
        let mut header: Option<HeaderText> = None;
        let mut pending_text: Option<TextField> = None;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let event = match self.reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(e) => return Err(self.xml_error(e)),
            };

            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let tag = local_name(e);

                    match tag.as_str() {
                        "series" => {
                            pipeline.begin_series()?;
                            in_series = true;
                            summary.series += 1;
                        }
                        "header" if in_series => {
                            header = Some(HeaderText::default());
                        }
                        "event" if in_series => {
                            let raw = event_attributes(e).map_err(|m| self.xml_error(m))?;
                            summary.events += 1;
                            trace!(date = %raw.date, value = %raw.value, "Event");
                            pipeline.event(raw).await?;
                        }
                        _ => {
                            if let Some(fields) = header.as_mut() {
                                read_header_attributes(fields, &tag, e, self.utc_offset_secs)
                                    .map_err(|m| self.xml_error(m))?;
                            }
                            let field = TextField::from_tag(&tag);
                            if is_empty {
                                if let (Some(fields), Some(field)) = (header.as_mut(), field) {
                                    fields.set(field, String::new());
                                }
                            } else {
                                pending_text = field;
                            }
                        }
                    }
                }
                Event::Text(ref t) => {
                    if let Some(field) = pending_text.take() {
                        let text = t
                            .unescape()
                            .map_err(|e| self.xml_error(e))?
                            .trim()
                            .to_string();

                        match (field, header.as_mut()) {
                            (TextField::TimeZone, _) => {
                                self.utc_offset_secs = parse_offset(&text)
                                    .ok_or_else(|| self.xml_error(format!("invalid time zone '{}'", text)))?;
                                debug!(offset_secs = self.utc_offset_secs, "Document time zone");
                            }
                            (field, Some(fields)) => fields.set(field, text),
                            _ => {}
                        }
                    }
                }
                Event::End(ref e) => {
                    pending_text = None;
                    match local_name_end(e.local_name().as_ref()).as_str() {
                        "header" => {
                            if let Some(fields) = header.take() {
                                let decision =
                                    pipeline.header_complete(fields.into_header(self.utc_offset_secs))?;
                                if let SeriesDecision::Rejected(reason) = decision {
                                    debug!(reason = ?reason, "Skipping series");
                                }
                            }
                        }
                        "series" if in_series => {
                            pipeline.end_series()?;
                            in_series = false;
                        }
                        _ => {}
                    }
                }
                Event::Eof => {
                    if in_series {
                        return Err(self.xml_error("document ended inside a series"));
                    }
                    break;
                }
                _ => {}
            }
        }

        Ok(summary)
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    local_name_end(e.local_name().as_ref())
}

fn local_name_end(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_ascii_lowercase()
}

fn to_utc(local: DateTime<Utc>, utc_offset_secs: i32) -> DateTime<Utc> {
    local - Duration::seconds(utc_offset_secs as i64)
}

/// Hours east of UTC ("0.0", "-6", "5.75") as seconds.
fn parse_offset(text: &str) -> Option<i32> {
    let hours: f64 = text.parse().ok()?;
    if !(-18.0..=18.0).contains(&hours) {
        return None;
    }
    Some((hours * 3600.0).round() as i32)
}

/// Attributes of interest on an element, by lowercase local name.
fn attributes(e: &BytesStart<'_>) -> std::result::Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let key = local_name_end(attr.key.local_name().as_ref());
        let value = attr.unescape_value().map_err(|err| err.to_string())?;
        out.push((key, value.into_owned()));
    }
    Ok(out)
}

fn attribute<'v>(attrs: &'v [(String, String)], name: &str) -> Option<&'v str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn event_attributes(e: &BytesStart<'_>) -> std::result::Result<RawEvent, String> {
    let attrs = attributes(e)?;
    Ok(RawEvent {
        date: attribute(&attrs, "date").unwrap_or_default().to_string(),
        time: attribute(&attrs, "time").map(str::to_string),
        value: attribute(&attrs, "value").unwrap_or_default().to_string(),
    })
}

/// Header elements that carry their data in attributes.
fn read_header_attributes(
    fields: &mut HeaderText,
    tag: &str,
    e: &BytesStart<'_>,
    utc_offset_secs: i32,
) -> std::result::Result<(), String> {
    let date_attr = |attrs: &[(String, String)]| {
        attribute(attrs, "date").and_then(|date| {
            parse_pi_datetime(date, attribute(attrs, "time"))
                .ok()
                .map(|local| to_utc(local, utc_offset_secs))
        })
    };

    match tag {
        "timestep" => {
            let attrs = attributes(e)?;
            let unit = attribute(&attrs, "unit").and_then(|u| TimeStepUnit::parse(u).ok());
            // An unreadable multiplier leaves the step unset, which a
            // forecast header reports as malformed.
            let multiplier = match attribute(&attrs, "multiplier") {
                Some(m) => m.trim().parse::<i32>().ok(),
                None => Some(1),
            };
            fields.time_step_hours = unit
                .zip(multiplier)
                .and_then(|(unit, multiplier)| unit.to_lead_hours(multiplier));
        }
        "forecastdate" => fields.forecast_date = date_attr(&attributes(e)?),
        "startdate" => fields.start_date = date_attr(&attributes(e)?),
        "enddate" => fields.end_date = date_attr(&attributes(e)?),
        _ => {}
    }
    Ok(())
}
