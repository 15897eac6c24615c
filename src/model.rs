/// Core data types for the gauge alert service.
///
/// This module defines the shared domain model imported by all other modules:
/// stations, measurements, and the persisted alert state records. It holds no
/// I/O; the only logic is on the key types and the station invariants.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Parameter codes
// ---------------------------------------------------------------------------

/// WISKI parameter name for water level (Wasserstand), in centimetres.
pub const PARAM_WATER_LEVEL: &str = "W";

/// Upper bound on thresholds per station (warning levels 1..=4).
pub const MAX_THRESHOLDS: usize = 4;

// ---------------------------------------------------------------------------
// Station
// ---------------------------------------------------------------------------

/// A monitored gauge with its ordered warning thresholds.
///
/// Built only through [`Station::new`], which enforces the threshold
/// invariants; the rest of the service can index `thresholds_cm` and
/// `level_names` in parallel without re-checking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Station {
    /// Display name, e.g. "Ulfa - Ulfa".
    pub name: String,
    /// Public station id used by the WISKI web frontend (may be empty).
    pub station_id_public: String,
    /// Internal measurement station number; primary feed key.
    pub station_no: String,
    /// Measured parameter, usually [`PARAM_WATER_LEVEL`].
    pub parameter: String,
    thresholds_cm: Vec<f64>,
    level_names: Vec<String>,
    /// Whether a crossing seen on the very first observation is notified.
    pub alert_on_start: bool,
    /// Link to the public hydrograph for this station, if configured.
    pub overview_url: Option<String>,
}

impl Station {
    /// Creates a station after checking 1..=4 thresholds, all > 0, strictly
    /// ascending, with exactly one level name per threshold.
    pub fn new(
        name: impl Into<String>,
        station_id_public: impl Into<String>,
        station_no: impl Into<String>,
        parameter: impl Into<String>,
        thresholds_cm: Vec<f64>,
        level_names: Vec<String>,
    ) -> Result<Self, String> {
        if thresholds_cm.is_empty() || thresholds_cm.len() > MAX_THRESHOLDS {
            return Err(format!(
                "expected 1 to {} thresholds, got {}",
                MAX_THRESHOLDS,
                thresholds_cm.len()
            ));
        }
        if thresholds_cm.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return Err("all thresholds must be finite and > 0".to_string());
        }
        if thresholds_cm.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!(
                "thresholds must be strictly ascending, got {:?}",
                thresholds_cm
            ));
        }
        if level_names.len() != thresholds_cm.len() {
            return Err(format!(
                "level_names must have exactly {} entries (one per threshold), got {}",
                thresholds_cm.len(),
                level_names.len()
            ));
        }

        Ok(Self {
            name: name.into(),
            station_id_public: station_id_public.into(),
            station_no: station_no.into(),
            parameter: parameter.into(),
            thresholds_cm,
            level_names,
            alert_on_start: true,
            overview_url: None,
        })
    }

    pub fn with_alert_on_start(mut self, alert_on_start: bool) -> Self {
        self.alert_on_start = alert_on_start;
        self
    }

    pub fn with_overview_url(mut self, url: Option<String>) -> Self {
        self.overview_url = url;
        self
    }

    /// Ascending threshold values in cm.
    pub fn thresholds_cm(&self) -> &[f64] {
        &self.thresholds_cm
    }

    /// Level names, parallel to `thresholds_cm()`.
    pub fn level_names(&self) -> &[String] {
        &self.level_names
    }

    /// Key for the per-station persisted state.
    pub fn key(&self) -> StationKey {
        StationKey {
            station_no: self.station_no.clone(),
            parameter: self.parameter.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// The latest value reported for one station by the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub station_no: String,
    pub station_id_public: String,
    pub parameter: String,
    /// Source timestamp, keeping the offset the feed reported.
    pub timestamp: DateTime<FixedOffset>,
    pub value: f64,
    pub unit: String,
    /// Which feed endpoint produced the value, e.g. "layers:10:index".
    pub source: String,
}

impl Measurement {
    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        self.timestamp.with_timezone(&Utc)
    }
}

// ---------------------------------------------------------------------------
// Persisted alert state
// ---------------------------------------------------------------------------

/// Identifies the state owned by one station/parameter pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationKey {
    pub station_no: String,
    pub parameter: String,
}

/// Identifies one threshold of one station/parameter pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThresholdKey {
    pub station: StationKey,
    /// 0-based index into the station's thresholds.
    pub index: usize,
}

impl ThresholdKey {
    pub fn new(station: &Station, index: usize) -> Self {
        Self {
            station: station.key(),
            index,
        }
    }
}

/// Arm/rearm state of one threshold.
///
/// An absent record reads as the default: armed, no below-threshold streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdState {
    pub armed: bool,
    /// Start of the current continuous below-threshold streak while disarmed.
    pub below_since: Option<DateTime<Utc>>,
}

impl Default for ThresholdState {
    fn default() -> Self {
        Self {
            armed: true,
            below_since: None,
        }
    }
}

/// Station-wide state: last observed level and last delivered alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationState {
    pub last_level: Option<u8>,
    pub last_alert_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching or reading the measurement feed.
///
/// The first three abort a whole cycle; the last two only affect the station
/// being looked up.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum FeedError {
    /// The request could not be sent or timed out.
    #[error("Feed request failed: {0}")]
    Transport(String),
    /// Non-2xx HTTP response from the feed.
    #[error("HTTP error: {0}")]
    HttpStatus(u16),
    /// The body was not a JSON array of records.
    #[error("Invalid feed payload: {0}")]
    InvalidPayload(String),
    /// Neither the station number nor the public id matched a record.
    #[error("Station not found in feed: {name} (no={station_no}, param={parameter})")]
    StationNotFound {
        name: String,
        station_no: String,
        parameter: String,
    },
    /// A record matched but its timestamp or value could not be read.
    #[error("Unparsable record for {name}: timestamp={timestamp}, ts_value={value}")]
    UnparsableRecord {
        name: String,
        timestamp: String,
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("Level {}", i)).collect()
    }

    #[test]
    fn test_station_accepts_four_ascending_thresholds() {
        let station = Station::new(
            "Ulfa - Ulfa",
            "41801",
            "24810552",
            PARAM_WATER_LEVEL,
            vec![60.0, 70.0, 80.0, 90.0],
            names(4),
        )
        .expect("valid station");
        assert_eq!(station.thresholds_cm().len(), 4);
        assert!(station.alert_on_start, "alert_on_start defaults to true");
    }

    #[test]
    fn test_station_accepts_single_legacy_threshold() {
        assert!(Station::new("A", "", "1", "W", vec![150.0], names(1)).is_ok());
    }

    #[test]
    fn test_station_rejects_non_ascending_thresholds() {
        let result = Station::new("A", "", "1", "W", vec![60.0, 60.0, 80.0], names(3));
        assert!(result.is_err(), "equal neighbours must be rejected");

        let result = Station::new("A", "", "1", "W", vec![80.0, 70.0, 90.0], names(3));
        assert!(result.is_err(), "descending neighbours must be rejected");
    }

    #[test]
    fn test_station_rejects_empty_and_oversized_threshold_lists() {
        assert!(Station::new("A", "", "1", "W", vec![], vec![]).is_err());
        assert!(
            Station::new("A", "", "1", "W", vec![1.0, 2.0, 3.0, 4.0, 5.0], names(5)).is_err()
        );
    }

    #[test]
    fn test_station_rejects_zero_or_negative_threshold() {
        assert!(Station::new("A", "", "1", "W", vec![0.0, 10.0, 20.0], names(3)).is_err());
        assert!(Station::new("A", "", "1", "W", vec![-5.0, 10.0, 20.0], names(3)).is_err());
    }

    #[test]
    fn test_station_rejects_mismatched_level_names() {
        let result = Station::new("A", "", "1", "W", vec![10.0, 20.0, 30.0], names(2));
        assert!(result.is_err());
    }

    #[test]
    fn test_threshold_state_defaults_to_armed() {
        let state = ThresholdState::default();
        assert!(state.armed);
        assert!(state.below_since.is_none());
    }

    #[test]
    fn test_threshold_keys_distinguish_parameter_and_index() {
        let w = Station::new("A", "", "1", "W", vec![10.0, 20.0, 30.0], names(3)).unwrap();
        let q = Station::new("A", "", "1", "Q", vec![10.0, 20.0, 30.0], names(3)).unwrap();
        assert_ne!(ThresholdKey::new(&w, 0), ThresholdKey::new(&q, 0));
        assert_ne!(ThresholdKey::new(&w, 0), ThresholdKey::new(&w, 1));
        assert_eq!(ThresholdKey::new(&w, 2), ThresholdKey::new(&w, 2));
    }
}
