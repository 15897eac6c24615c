/// HLNUG WISKI-Web "last values" index client.
///
/// The feed publishes one JSON array with the latest value of every station
/// and parameter:
///   https://www.hlnug.de/static/pegel/wiskiweb3/data/internet/layers/10/index.json
///
/// The whole index is fetched once per cycle and shared by all stations, so
/// request volume stays at one call per cycle no matter how many stations are
/// configured. See `fixtures.rs` for annotated payloads.

use crate::model::{FeedError, Measurement, Station};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_INDEX_URL: &str =
    "https://www.hlnug.de/static/pegel/wiskiweb3/data/internet/layers/10/index.json";

pub const DEFAULT_SOURCE_TAG: &str = "layers:10:index";

pub const DEFAULT_USER_AGENT: &str = concat!("pegel_service/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Feed source
// ---------------------------------------------------------------------------

/// Anything that can produce a fresh station index. The cycle driver only
/// depends on this, so tests can hand it a canned index.
pub trait FeedSource {
    fn fetch_index(&self) -> Result<FeedIndex, FeedError>;
}

/// Blocking HTTP client for the index endpoint.
pub struct FeedClient {
    http: reqwest::blocking::Client,
    index_url: String,
    source_tag: String,
}

impl FeedClient {
    /// Builds a client with an explicit request timeout; an unbounded fetch
    /// would stall the whole cycle.
    pub fn new(
        index_url: &str,
        user_agent: &str,
        source_tag: &str,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            index_url: index_url.to_string(),
            source_tag: source_tag.to_string(),
        })
    }
}

impl FeedSource for FeedClient {
    fn fetch_index(&self) -> Result<FeedIndex, FeedError> {
        let response = self
            .http
            .get(&self.index_url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        tracing::debug!(url = %self.index_url, status = %response.status(), "GET feed index");

        if !response.status().is_success() {
            return Err(FeedError::HttpStatus(response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .map_err(|e| FeedError::InvalidPayload(format!("JSON deserialization failed: {}", e)))?;

        let index = FeedIndex::from_value(body, &self.source_tag)?;
        tracing::debug!(entries = index.len(), "feed index loaded");
        Ok(index)
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// One record of the index, with identifiers normalised to trimmed strings.
/// Timestamp and value stay raw until a station actually asks for them, so a
/// broken record only fails the station that uses it.
#[derive(Debug, Clone)]
pub struct FeedRecord {
    pub station_no: String,
    pub station_id: String,
    pub station_name: String,
    pub parameter: String,
    pub unit: String,
    timestamp: Value,
    value: Value,
}

/// In-memory snapshot of one index fetch.
#[derive(Debug, Clone, Default)]
pub struct FeedIndex {
    records: Vec<FeedRecord>,
    by_station_no: HashMap<(String, String), usize>,
    source_tag: String,
}

/// Parses a raw response body into an index.
pub fn parse_index(json: &str, source_tag: &str) -> Result<FeedIndex, FeedError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| FeedError::InvalidPayload(format!("JSON deserialization failed: {}", e)))?;
    FeedIndex::from_value(value, source_tag)
}

impl FeedIndex {
    /// Builds the lookup tables. Fails only if the payload is not an array;
    /// non-object entries are skipped.
    pub fn from_value(payload: Value, source_tag: &str) -> Result<Self, FeedError> {
        let Value::Array(items) = payload else {
            return Err(FeedError::InvalidPayload(
                "index.json is not an array of records".to_string(),
            ));
        };

        let mut records = Vec::with_capacity(items.len());
        let mut by_station_no = HashMap::new();

        for item in items {
            let Value::Object(mut obj) = item else {
                continue;
            };

            let record = FeedRecord {
                station_no: text_field(obj.get("station_no")),
                station_id: text_field(obj.get("station_id")),
                station_name: text_field(obj.get("station_name")),
                parameter: text_field(obj.get("stationparameter_name")),
                unit: text_field(obj.get("ts_unitsymbol")),
                timestamp: obj.remove("timestamp").unwrap_or(Value::Null),
                value: obj.remove("ts_value").unwrap_or(Value::Null),
            };

            if !record.station_no.is_empty() && !record.parameter.is_empty() {
                // Later duplicates win, matching a plain map insert.
                by_station_no.insert(
                    (record.station_no.clone(), record.parameter.clone()),
                    records.len(),
                );
            }
            records.push(record);
        }

        Ok(Self {
            records,
            by_station_no,
            source_tag: source_tag.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Finds the record for a station: by (station_no, parameter) first, then
    /// by public station id with the same parameter.
    pub fn lookup(&self, station: &Station) -> Result<&FeedRecord, FeedError> {
        let key = (station.station_no.trim().to_string(), station.parameter.trim().to_string());
        if let Some(&i) = self.by_station_no.get(&key) {
            return Ok(&self.records[i]);
        }

        let wanted_id = station.station_id_public.trim();
        if !wanted_id.is_empty() {
            let fallback = self
                .records
                .iter()
                .find(|r| r.parameter == station.parameter && r.station_id == wanted_id);
            if let Some(record) = fallback {
                tracing::debug!(
                    station = %station.name,
                    feed_station_no = %record.station_no,
                    "matched station by public id"
                );
                return Ok(record);
            }
        }

        Err(FeedError::StationNotFound {
            name: station.name.clone(),
            station_no: station.station_no.clone(),
            parameter: station.parameter.clone(),
        })
    }

    /// Resolves the station's record into a typed measurement.
    pub fn latest_for_station(&self, station: &Station) -> Result<Measurement, FeedError> {
        let record = self.lookup(station)?;

        let (Some(timestamp), Some(value)) =
            (parse_timestamp(&record.timestamp), parse_value(&record.value))
        else {
            return Err(FeedError::UnparsableRecord {
                name: station.name.clone(),
                timestamp: record.timestamp.to_string(),
                value: record.value.to_string(),
            });
        };

        Ok(Measurement {
            station_no: station.station_no.clone(),
            station_id_public: station.station_id_public.clone(),
            parameter: station.parameter.clone(),
            timestamp,
            value,
            unit: record.unit.clone(),
            source: self.source_tag.clone(),
        })
    }
}

fn text_field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Field parsing
// ---------------------------------------------------------------------------

/// Reads a feed timestamp.
///
/// Strings are ISO 8601 (`Z` or numeric offset; a missing offset means UTC).
/// Numbers are epoch values disambiguated by magnitude: above 1e12 they are
/// milliseconds, above 1e9 seconds, anything smaller is rejected.
pub fn parse_timestamp(raw: &Value) -> Option<DateTime<FixedOffset>> {
    match raw {
        Value::Number(n) => parse_epoch(n.as_f64()?),
        Value::String(s) => parse_iso(s),
        _ => None,
    }
}

fn parse_epoch(v: f64) -> Option<DateTime<FixedOffset>> {
    let millis = if v > 1e12 {
        v.round() as i64
    } else if v > 1e9 {
        (v * 1000.0).round() as i64
    } else {
        return None;
    };

    let utc = DateTime::<Utc>::from_timestamp(
        millis.div_euclid(1000),
        (millis.rem_euclid(1000) * 1_000_000) as u32,
    )?;
    Some(utc.into())
}

fn parse_iso(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.replace('Z', "+00:00");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(&s, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(naive.and_utc().into());
        }
    }
    None
}

/// Reads a feed value: JSON numbers directly, strings with either decimal
/// separator. Non-finite results are rejected.
pub fn parse_value(raw: &Value) -> Option<f64> {
    let v = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.replace(',', ".").parse::<f64>().ok()?
        }
        _ => return None,
    };
    v.is_finite().then_some(v)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::*;
    use chrono::{TimeZone, Timelike};
    use serde_json::json;

    fn station(no: &str, public_id: &str, name: &str) -> Station {
        Station::new(
            name,
            public_id,
            no,
            "W",
            vec![60.0, 70.0, 80.0, 90.0],
            vec!["Stufe 1".into(), "Stufe 2".into(), "Stufe 3".into(), "Stufe 4".into()],
        )
        .unwrap()
    }

    // --- Index parsing ------------------------------------------------------

    #[test]
    fn test_parse_index_counts_all_object_entries() {
        let index = parse_index(fixture_two_stations_json(), DEFAULT_SOURCE_TAG)
            .expect("fixture should parse");
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_parse_index_rejects_object_payload() {
        let result = parse_index(fixture_object_payload_json(), DEFAULT_SOURCE_TAG);
        assert!(
            matches!(result, Err(FeedError::InvalidPayload(_))),
            "non-array payload must be InvalidPayload, got {:?}",
            result
        );
    }

    #[test]
    fn test_parse_index_rejects_malformed_json() {
        let result = parse_index("[ { not json ", DEFAULT_SOURCE_TAG);
        assert!(matches!(result, Err(FeedError::InvalidPayload(_))));
    }

    #[test]
    fn test_parse_index_skips_non_object_entries() {
        let index = FeedIndex::from_value(json!([1, "x", null, {"station_no": "1"}]), "t")
            .expect("array payload is structurally valid");
        assert_eq!(index.len(), 1);
    }

    // --- Lookup -------------------------------------------------------------

    #[test]
    fn test_latest_for_station_reads_value_unit_and_offset() {
        let index = parse_index(fixture_two_stations_json(), DEFAULT_SOURCE_TAG).unwrap();
        let m = index
            .latest_for_station(&station("24810552", "41801", "Ulfa - Ulfa"))
            .expect("Ulfa should be found");

        assert_eq!(m.value, 95.0);
        assert_eq!(m.unit, "cm");
        assert_eq!(m.source, DEFAULT_SOURCE_TAG);
        assert_eq!(m.timestamp.offset().local_minus_utc(), 3600);
        assert_eq!(
            m.timestamp_utc(),
            Utc.with_ymd_and_hms(2026, 2, 25, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_lookup_filters_on_parameter() {
        // The discharge record shares the station number but must never be
        // returned for a water-level station.
        let index = parse_index(fixture_two_stations_json(), DEFAULT_SOURCE_TAG).unwrap();
        let record = index
            .lookup(&station("24810552", "41801", "Ulfa - Ulfa"))
            .unwrap();
        assert_eq!(record.parameter, "W");
    }

    #[test]
    fn test_lookup_falls_back_to_public_station_id() {
        let index = parse_index(fixture_renumbered_station_json(), DEFAULT_SOURCE_TAG).unwrap();
        let m = index
            .latest_for_station(&station("24810552", "41801", "Ulfa - Ulfa"))
            .expect("public id fallback should match");
        assert_eq!(m.value, 72.0);
        // The measurement stays keyed by the configured station number.
        assert_eq!(m.station_no, "24810552");
    }

    #[test]
    fn test_lookup_miss_is_station_not_found() {
        let index = parse_index(fixture_two_stations_json(), DEFAULT_SOURCE_TAG).unwrap();
        let result = index.latest_for_station(&station("00000000", "", "Nowhere"));
        assert!(
            matches!(result, Err(FeedError::StationNotFound { .. })),
            "got {:?}",
            result
        );
    }

    #[test]
    fn test_unparsable_record_is_reported_per_station() {
        let index = parse_index(fixture_unparsable_record_json(), DEFAULT_SOURCE_TAG).unwrap();
        let result = index.latest_for_station(&station("24810600", "41806", "Unter-Schmitten"));
        assert!(
            matches!(result, Err(FeedError::UnparsableRecord { .. })),
            "got {:?}",
            result
        );
    }

    #[test]
    fn test_epoch_millis_and_decimal_comma_record() {
        let index = parse_index(fixture_epoch_and_comma_json(), DEFAULT_SOURCE_TAG).unwrap();
        let m = index
            .latest_for_station(&station("24820305", "42010", "Nidda - Bad Vilbel"))
            .expect("epoch/comma record should parse");
        assert!((m.value - 187.4).abs() < 1e-9);
        assert_eq!(m.timestamp_utc().timestamp(), 1_772_023_500);
    }

    // --- Timestamp parsing --------------------------------------------------

    #[test]
    fn test_parse_timestamp_iso_with_z_suffix() {
        let dt = parse_timestamp(&json!("2026-02-25T13:30:00Z")).expect("should parse");
        assert_eq!(dt.with_timezone(&Utc).hour(), 13);
    }

    #[test]
    fn test_parse_timestamp_naive_string_is_utc() {
        let dt = parse_timestamp(&json!("2026-02-25T13:30:00")).expect("should parse");
        assert_eq!(dt.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_parse_timestamp_epoch_magnitudes() {
        let secs = parse_timestamp(&json!(1_772_023_500)).expect("seconds should parse");
        let millis = parse_timestamp(&json!(1_772_023_500_000_i64)).expect("millis should parse");
        assert_eq!(secs, millis);

        assert!(parse_timestamp(&json!(999_999_999)).is_none(), "<= 1e9 is invalid");
        assert!(parse_timestamp(&json!(0)).is_none());
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp(&json!("")).is_none());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&Value::Null).is_none());
    }

    // --- Value parsing ------------------------------------------------------

    #[test]
    fn test_parse_value_accepts_numbers_and_strings() {
        assert_eq!(parse_value(&json!(95)), Some(95.0));
        assert_eq!(parse_value(&json!("110.5")), Some(110.5));
        assert_eq!(parse_value(&json!(" 87,25 ")), Some(87.25));
    }

    #[test]
    fn test_parse_value_rejects_empty_and_non_finite() {
        assert_eq!(parse_value(&json!("")), None);
        assert_eq!(parse_value(&json!("NaN")), None);
        assert_eq!(parse_value(&json!("inf")), None);
        assert_eq!(parse_value(&Value::Null), None);
    }
}
