/// Cycle driver for the gauge alert service
///
/// One cycle:
/// 1. Fetches the feed index once
/// 2. For every station: resolves its measurement, logs a status line,
///    appends it to the measurement log, and runs the threshold engine
/// 3. Commits each station's alert state on its own, or rolls it back if
///    the station failed, so one broken station cannot leak partial state
/// 4. Aggregates the per-station results into a [`CycleReport`]
///
/// In daemon mode cycles repeat on a fixed interval; no error ends the loop.

use crate::alert::{AlertOutcome, ThresholdEngine, compute_level, level_label};
use crate::config::Settings;
use crate::db;
use crate::endpoint::StatusBoard;
use crate::ingest::hlnug::{FeedClient, FeedIndex, FeedSource};
use crate::logging;
use crate::model::{FeedError, Station};
use crate::notify::{LogNotifier, Notifier, SmtpNotifier};
use crate::store::{
    AlertStateStore, MeasurementStore, MemoryStore, PgAlertStateStore, PgMeasurementStore,
    StoreError,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::error::Error;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Time between cycle starts (default: 15 minutes)
    pub poll_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Why a single station failed this cycle.
#[derive(Debug, thiserror::Error)]
pub enum StationError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a station that was evaluated.
#[derive(Debug, Clone, Serialize)]
pub struct StationReport {
    pub value: f64,
    pub unit: String,
    pub measured_at: DateTime<FixedOffset>,
    pub level: u8,
    pub level_label: String,
    /// Whether this measurement was new to the measurement log.
    pub inserted: bool,
    pub outcomes: Vec<AlertOutcome>,
}

impl StationReport {
    pub fn sent_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, AlertOutcome::Sent { .. }))
            .count()
    }

    /// First delivery failure of the cycle, if any.
    pub fn delivery_error(&self) -> Option<String> {
        self.outcomes.iter().find_map(|o| match o {
            AlertOutcome::Failed { cause, .. } => Some(cause.clone()),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub struct StationOutcome {
    pub name: String,
    pub station_no: String,
    pub parameter: String,
    pub result: Result<StationReport, StationError>,
}

impl StationOutcome {
    /// A station succeeds when it was evaluated and every attempted
    /// notification was delivered.
    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(report) if report.delivery_error().is_none())
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// Set when the feed could not be fetched; no station was evaluated.
    pub feed_error: Option<FeedError>,
    pub stations: Vec<StationOutcome>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.feed_error.is_none() && self.stations.iter().all(StationOutcome::is_success)
    }

    pub fn alerts_sent(&self) -> usize {
        self.stations
            .iter()
            .filter_map(|s| s.result.as_ref().ok())
            .map(StationReport::sent_count)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Daemon State
// ---------------------------------------------------------------------------

/// Main daemon state
pub struct Daemon {
    config: DaemonConfig,
    stations: Vec<Station>,
    engine: ThresholdEngine,
    feed: Box<dyn FeedSource>,
    measurements: Box<dyn MeasurementStore>,
    alert_state: Box<dyn AlertStateStore>,
    notifier: Box<dyn Notifier>,
    status: Option<StatusBoard>,
}

impl Daemon {
    /// Assembles a daemon from explicit collaborators.
    pub fn new(
        config: DaemonConfig,
        stations: Vec<Station>,
        engine: ThresholdEngine,
        feed: Box<dyn FeedSource>,
        measurements: Box<dyn MeasurementStore>,
        alert_state: Box<dyn AlertStateStore>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            stations,
            engine,
            feed,
            measurements,
            alert_state,
            notifier,
            status: None,
        }
    }

    /// Initialize daemon from settings: build the feed client, connect and
    /// prepare the database (or in-memory stores), and pick the notifier.
    pub fn initialize(settings: &Settings, use_memory: bool) -> Result<Self, Box<dyn Error>> {
        if settings.stations.is_empty() {
            return Err("No stations configured".into());
        }

        let feed = FeedClient::new(
            &settings.feed.index_url,
            &settings.feed.user_agent,
            &settings.feed.source_tag,
            settings.runtime.request_timeout,
        )?;

        let (measurements, alert_state): (Box<dyn MeasurementStore>, Box<dyn AlertStateStore>) =
            if use_memory {
                tracing::warn!("using in-memory stores; alert state is lost on exit");
                let store = MemoryStore::new();
                (Box::new(store.clone()), Box::new(store))
            } else {
                let url = db::resolve_database_url(settings.storage.database_url.as_deref())?;
                let measurement_client = db::connect_and_prepare(&url)?;
                let state_client = db::connect_with_validation(&url)?;
                (
                    Box::new(PgMeasurementStore::new(&url, measurement_client)),
                    Box::new(PgAlertStateStore::new(&url, state_client)),
                )
            };

        let notifier: Box<dyn Notifier> = if settings.email.enabled {
            Box::new(SmtpNotifier::new(&settings.email)?)
        } else {
            Box::new(LogNotifier::new())
        };

        Ok(Self::new(
            DaemonConfig {
                poll_interval: settings.runtime.poll_interval,
            },
            settings.stations.clone(),
            ThresholdEngine::from_settings(&settings.alerting),
            Box::new(feed),
            measurements,
            alert_state,
            notifier,
        ))
    }

    /// Publishes every finished cycle to `board`.
    pub fn with_status_board(mut self, board: StatusBoard) -> Self {
        self.status = Some(board);
        self
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn policy_name(&self) -> &'static str {
        self.engine.policy_name()
    }

    /// Run one cycle across all stations with `now` as the decision clock.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let report = match self.feed.fetch_index() {
            Ok(index) => CycleReport {
                started_at: now,
                feed_error: None,
                stations: self.evaluate_all(&index, now),
            },
            Err(e) => {
                logging::log_feed_failure(&e);
                CycleReport {
                    started_at: now,
                    feed_error: Some(e),
                    stations: Vec::new(),
                }
            }
        };

        if report.feed_error.is_none() {
            let successful = report.stations.iter().filter(|s| s.is_success()).count();
            logging::log_cycle_summary(report.stations.len(), successful, report.alerts_sent());
        }
        if let Some(board) = &self.status {
            board.publish(&report);
        }
        report
    }

    fn evaluate_all(&mut self, index: &FeedIndex, now: DateTime<Utc>) -> Vec<StationOutcome> {
        let mut outcomes = Vec::with_capacity(self.stations.len());

        for station in &self.stations {
            let result = process_station(
                station,
                index,
                now,
                &self.engine,
                self.measurements.as_mut(),
                self.alert_state.as_mut(),
                self.notifier.as_ref(),
            );
            if let Err(e) = &result {
                logging::log_station_failure(station, e);
            }

            outcomes.push(StationOutcome {
                name: station.name.clone(),
                station_no: station.station_no.clone(),
                parameter: station.parameter.clone(),
                result,
            });
        }

        outcomes
    }

    /// Main daemon loop (runs indefinitely)
    pub fn run(&mut self) -> ! {
        tracing::info!(
            stations = self.stations.len(),
            interval_secs = self.config.poll_interval.as_secs(),
            policy = self.engine.policy_name(),
            "starting daemon loop"
        );

        loop {
            let started = Instant::now();
            self.run_cycle(Utc::now());

            // Sleep until next poll interval
            if let Some(remaining) = self.config.poll_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }
}

/// Evaluates one station against the fetched index and commits its alert
/// state. Any error rolls the buffered state back.
fn process_station(
    station: &Station,
    index: &FeedIndex,
    now: DateTime<Utc>,
    engine: &ThresholdEngine,
    measurements: &mut dyn MeasurementStore,
    alert_state: &mut dyn AlertStateStore,
    notifier: &dyn Notifier,
) -> Result<StationReport, StationError> {
    let measurement = index.latest_for_station(station)?;
    let level = compute_level(measurement.value, station.thresholds_cm());
    logging::log_station_status(station, &measurement, level);

    let inserted = measurements.insert_if_absent(&measurement, level)?;
    if !inserted {
        tracing::debug!(station = %station.name, "measurement already stored");
    }

    let evaluation = engine
        .evaluate(station, &measurement, now, alert_state, notifier)
        .and_then(|evaluation| alert_state.commit().map(|()| evaluation));
    let evaluation = match evaluation {
        Ok(evaluation) => evaluation,
        Err(e) => {
            alert_state.rollback();
            return Err(e.into());
        }
    };

    Ok(StationReport {
        value: measurement.value,
        unit: measurement.unit.clone(),
        measured_at: measurement.timestamp,
        level: evaluation.level,
        level_label: level_label(station, evaluation.level),
        inserted,
        outcomes: evaluation.outcomes,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
