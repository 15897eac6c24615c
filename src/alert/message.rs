/// Alert mail rendering.

use crate::model::{Measurement, Station};
use crate::notify::Notification;
use chrono::{DateTime, FixedOffset};

/// Display format for measurement times: `HH:MM DD.MM.YYYY`.
pub const LOCAL_TIME_FORMAT: &str = "%H:%M %d.%m.%Y";

/// Formats a timestamp in the offset the feed reported it with.
pub fn format_local(ts: &DateTime<FixedOffset>) -> String {
    ts.format(LOCAL_TIME_FORMAT).to_string()
}

/// Unit for display; the feed occasionally omits it for water levels.
pub fn display_unit(measurement: &Measurement) -> &str {
    let unit = measurement.unit.trim();
    if unit.is_empty() { "cm" } else { unit }
}

/// Renders the notification for threshold `index` (0-based) of `station`.
pub fn render_threshold_alert(station: &Station, measurement: &Measurement, index: usize) -> Notification {
    let level = index + 1;
    let unit = display_unit(measurement);
    let threshold = station.thresholds_cm().get(index).copied().unwrap_or(f64::NAN);
    let level_name = station
        .level_names()
        .get(index)
        .map(String::as_str)
        .unwrap_or_default();

    let subject = format!(
        "WARNSTUFE {} {}: {:.1} {} (>= {:.1} {})",
        level, station.name, measurement.value, unit, threshold, unit
    );

    let thresholds = station
        .thresholds_cm()
        .iter()
        .map(|t| format!("{:.1}", t))
        .collect::<Vec<_>>()
        .join(", ");

    let mut body = format!(
        "Pegel-Warnung (HLNUG / WISKI-Web)\n\n\
         Station: {}\n\
         Warnstufe: {} ({})\n\
         Station-ID (Web): {}\n\
         Station-No (Daten): {}\n\
         Parameter: {}\n\
         Messwert: {:.1} {}\n\
         Schwellwert: {:.1} {}\n\
         Zeit: {}\n\
         Zeitstempel (Quelle, ISO): {}\n\n\
         Schwellwerte (cm): {}\n\
         Quelle (Endpoint): {}\n",
        station.name,
        level,
        level_name,
        station.station_id_public,
        station.station_no,
        station.parameter,
        measurement.value,
        unit,
        threshold,
        unit,
        format_local(&measurement.timestamp),
        measurement.timestamp.to_rfc3339(),
        thresholds,
        measurement.source,
    );

    if let Some(url) = &station.overview_url {
        body.push_str(&format!("\nÜbersicht:\n{}\n", url));
    }

    Notification { subject, body }
}
