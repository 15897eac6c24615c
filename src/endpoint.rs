/// HTTP endpoint for querying service status
///
/// The cycle driver publishes a snapshot after every cycle; the server thread
/// only ever reads that snapshot, so requests never touch the stores or the
/// feed.
///
/// Endpoints:
/// - GET /health - Service health check
/// - GET /status - Last cycle summary and per-station levels
/// - GET /station/{station_no} - Latest state of one station

use crate::daemon::CycleReport;
use crate::model::Station;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Latest known state of one station.
#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub name: String,
    pub station_no: String,
    pub station_id_public: String,
    pub parameter: String,
    pub thresholds_cm: Vec<f64>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub measured_at: Option<DateTime<FixedOffset>>,
    pub level: Option<u8>,
    pub level_label: Option<String>,
    /// Error from the most recent cycle, if that cycle failed for this station.
    pub error: Option<String>,
    pub alerts_sent: u64,
}

impl StationStatus {
    fn for_station(station: &Station) -> Self {
        Self {
            name: station.name.clone(),
            station_no: station.station_no.clone(),
            station_id_public: station.station_id_public.clone(),
            parameter: station.parameter.clone(),
            thresholds_cm: station.thresholds_cm().to_vec(),
            value: None,
            unit: None,
            measured_at: None,
            level: None,
            level_label: None,
            error: None,
            alerts_sent: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub policy: String,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_ok: Option<bool>,
    pub feed_error: Option<String>,
    pub stations: Vec<StationStatus>,
}

// ---------------------------------------------------------------------------
// Shared snapshot
// ---------------------------------------------------------------------------

/// Handle to the snapshot shared between the cycle driver and the server.
#[derive(Debug, Clone)]
pub struct StatusBoard(Arc<Mutex<StatusSnapshot>>);

impl StatusBoard {
    pub fn new(policy: &str, stations: &[Station]) -> Self {
        Self(Arc::new(Mutex::new(StatusSnapshot {
            policy: policy.to_string(),
            stations: stations.iter().map(StationStatus::for_station).collect(),
            ..StatusSnapshot::default()
        })))
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        // A panic while publishing leaves plain data behind; keep serving it.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().clone()
    }

    /// Folds a finished cycle into the snapshot. Station values from earlier
    /// cycles are kept when the feed could not be fetched at all.
    pub fn publish(&self, report: &CycleReport) {
        let mut snapshot = self.lock();
        snapshot.cycles += 1;
        snapshot.last_cycle_at = Some(report.started_at);
        snapshot.last_cycle_ok = Some(report.is_success());
        snapshot.feed_error = report.feed_error.as_ref().map(|e| e.to_string());

        for outcome in &report.stations {
            let Some(status) = snapshot
                .stations
                .iter_mut()
                .find(|s| s.station_no == outcome.station_no && s.parameter == outcome.parameter)
            else {
                continue;
            };

            match &outcome.result {
                Ok(station_report) => {
                    status.value = Some(station_report.value);
                    status.unit = Some(station_report.unit.clone());
                    status.measured_at = Some(station_report.measured_at);
                    status.level = Some(station_report.level);
                    status.level_label = Some(station_report.level_label.clone());
                    status.alerts_sent += station_report.sent_count() as u64;
                    status.error = station_report.delivery_error();
                }
                Err(e) => status.error = Some(e.to_string()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Maps a request path to a status code and JSON body.
pub fn route(url: &str, snapshot: &StatusSnapshot) -> (u16, Value) {
    let path = url.split('?').next().unwrap_or_default();

    if path == "/health" {
        return (
            200,
            json!({
                "status": "ok",
                "service": "pegel_service",
                "version": env!("CARGO_PKG_VERSION")
            }),
        );
    }

    if path == "/status" {
        return match serde_json::to_value(snapshot) {
            Ok(body) => (200, body),
            Err(e) => (500, json!({ "error": e.to_string() })),
        };
    }

    if let Some(station_no) = path.strip_prefix("/station/") {
        let station_no = urlencoding::decode(station_no)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| station_no.to_string());
        let matches: Vec<&StationStatus> = snapshot
            .stations
            .iter()
            .filter(|s| s.station_no == station_no)
            .collect();

        if matches.is_empty() {
            return (
                404,
                json!({
                    "error": "Station not configured",
                    "station_no": station_no
                }),
            );
        }
        return match serde_json::to_value(&matches) {
            Ok(body) => (200, body),
            Err(e) => (500, json!({ "error": e.to_string() })),
        };
    }

    (
        404,
        json!({
            "error": "Not found",
            "available_endpoints": ["/health", "/status", "/station/{station_no}"]
        }),
    )
}

// ---------------------------------------------------------------------------
// HTTP Server
// ---------------------------------------------------------------------------

/// Binds the port and serves requests on a background thread.
pub fn spawn_endpoint_server(
    port: u16,
    board: StatusBoard,
) -> Result<thread::JoinHandle<()>, Box<dyn std::error::Error + Send + Sync>> {
    let server = tiny_http::Server::http(format!("0.0.0.0:{}", port))?;

    tracing::info!(port, "HTTP endpoint listening (GET /health, /status, /station/{{station_no}})");

    let handle = thread::Builder::new()
        .name("status-endpoint".to_string())
        .spawn(move || {
            for request in server.incoming_requests() {
                let (status, body) = route(request.url(), &board.snapshot());
                if let Err(e) = request.respond(create_response(status, &body)) {
                    tracing::warn!(error = %e, "failed to send response");
                }
            }
        })?;

    Ok(handle)
}

/// Create HTTP response with JSON body
fn create_response(status_code: u16, json: &Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let body = serde_json::to_string_pretty(json).unwrap_or_else(|_| "{}".to_string());
    let mut response = tiny_http::Response::from_data(body.into_bytes())
        .with_status_code(tiny_http::StatusCode::from(status_code));

    if let Ok(header) = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    response
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
