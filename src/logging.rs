/// Structured logging for the gauge alert service
///
/// Events go through `tracing` with station identifiers as fields. Failures
/// are classified before logging so that routine trouble (a station missing
/// from the feed during maintenance) does not drown out real problems.

use crate::alert::level_label;
use crate::alert::message::{display_unit, format_local};
use crate::daemon::StationError;
use crate::model::{FeedError, Measurement, Station};
use std::fmt;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Installs the global subscriber. `RUST_LOG` wins; otherwise `info`, or
/// `debug` when the config asks for it. Calling twice is harmless.
pub fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - feed in maintenance or briefly unavailable
    Expected,
    /// Unexpected failure - indicates a configuration issue or a format change
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

pub fn classify_feed_failure(err: &FeedError) -> FailureType {
    match err {
        FeedError::HttpStatus(503) => FailureType::Expected,
        FeedError::HttpStatus(_) | FeedError::InvalidPayload(_) => FailureType::Unexpected,
        // Network trouble on our side or theirs; retried next cycle anyway.
        FeedError::Transport(_) => FailureType::Unknown,
        // Stations drop out of the index while offline or after renumbering.
        FeedError::StationNotFound { .. } => FailureType::Unknown,
        FeedError::UnparsableRecord { .. } => FailureType::Unexpected,
    }
}

pub fn classify_station_failure(err: &StationError) -> FailureType {
    match err {
        StationError::Feed(e) => classify_feed_failure(e),
        StationError::Store(_) => FailureType::Unexpected,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a whole-cycle feed failure with classification
pub fn log_feed_failure(err: &FeedError) {
    let failure_type = classify_feed_failure(err);
    match failure_type {
        FailureType::Expected => tracing::info!(failure = %failure_type, "feed fetch failed: {}", err),
        FailureType::Unexpected => tracing::error!(failure = %failure_type, "feed fetch failed: {}", err),
        FailureType::Unknown => tracing::warn!(failure = %failure_type, "feed fetch failed: {}", err),
    }
}

/// Log a per-station failure with classification
pub fn log_station_failure(station: &Station, err: &StationError) {
    let failure_type = classify_station_failure(err);
    let name = station.name.as_str();
    let no = station.station_no.as_str();
    match failure_type {
        FailureType::Expected => {
            tracing::info!(station = name, station_no = no, failure = %failure_type, "{}", err)
        }
        FailureType::Unexpected => {
            tracing::error!(station = name, station_no = no, failure = %failure_type, "{}", err)
        }
        FailureType::Unknown => {
            tracing::warn!(station = name, station_no = no, failure = %failure_type, "{}", err)
        }
    }
}

// ---------------------------------------------------------------------------
// Status Lines
// ---------------------------------------------------------------------------

/// One line per station per cycle: value, measurement time and level.
pub fn station_status_line(station: &Station, measurement: &Measurement, level: u8) -> String {
    format!(
        "Station: {} | Level: {:>6.1} {:<3} | Measured: {:<16} | Stage: {}",
        station.name,
        measurement.value,
        display_unit(measurement),
        format_local(&measurement.timestamp),
        level_label(station, level)
    )
}

pub fn log_station_status(station: &Station, measurement: &Measurement, level: u8) {
    tracing::info!(
        station_no = %station.station_no,
        level,
        "{}",
        station_status_line(station, measurement, level)
    );
}

/// Log a summary of one poll cycle
pub fn log_cycle_summary(total: usize, successful: usize, alerts_sent: usize) {
    let failed = total - successful.min(total);
    let message = format!(
        "Cycle complete: {}/{} stations ok, {} failed, {} alerts sent",
        successful, total, failed, alerts_sent
    );

    if failed == 0 {
        tracing::info!("{}", message);
    } else if successful == 0 {
        tracing::error!("{}", message);
    } else {
        tracing::warn!("{}", message);
    }
}
