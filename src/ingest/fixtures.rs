/// Test fixtures: representative payloads from the HLNUG WISKI-Web
/// `layers/10/index.json` endpoint.
///
/// Response shape: a flat JSON array, one object per station/parameter:
///   .station_no            : internal measurement number (string)
///   .station_id            : public web id (number)
///   .station_name
///   .stationparameter_name : parameter, "W" for water level
///   .ts_unitsymbol         : e.g. "cm"
///   .timestamp             : ISO 8601 with offset (older exports: epoch ms)
///   .ts_value              : number, occasionally a string with decimal comma
///
/// Entries for other parameters (discharge "Q", temperature, ...) share the
/// station number, so lookups must always filter on the parameter.

/// Two water-level stations plus a discharge record sharing a station number.
/// With the [60, 70, 80, 90] test configuration both Unter-Schmitten
/// (110 cm) and Ulfa (95 cm) are above all four thresholds.
pub(crate) fn fixture_two_stations_json() -> &'static str {
    r#"[
      {
        "station_id": 41806,
        "station_no": "24810600",
        "station_name": "Unter-Schmitten - Nidda",
        "stationparameter_name": "W",
        "ts_unitsymbol": "cm",
        "timestamp": "2026-02-25T05:45:00+01:00",
        "ts_value": 110.0
      },
      {
        "station_id": 41801,
        "station_no": "24810552",
        "station_name": "Ulfa - Ulfa",
        "stationparameter_name": "W",
        "ts_unitsymbol": "cm",
        "timestamp": "2026-02-25T13:30:00+01:00",
        "ts_value": 95.0
      },
      {
        "station_id": 41801,
        "station_no": "24810552",
        "station_name": "Ulfa - Ulfa",
        "stationparameter_name": "Q",
        "ts_unitsymbol": "m³/s",
        "timestamp": "2026-02-25T13:30:00+01:00",
        "ts_value": 3.41
      }
    ]"#
}

/// Older export style: epoch milliseconds and a decimal-comma string value.
pub(crate) fn fixture_epoch_and_comma_json() -> &'static str {
    r#"[
      {
        "station_id": 42010,
        "station_no": "24820305",
        "station_name": "Nidda - Bad Vilbel",
        "stationparameter_name": "W",
        "ts_unitsymbol": "cm",
        "timestamp": 1772023500000,
        "ts_value": "187,4"
      }
    ]"#
}

/// Record whose station number changed upstream; only the public id matches.
pub(crate) fn fixture_renumbered_station_json() -> &'static str {
    r#"[
      {
        "station_id": 41801,
        "station_no": "99990001",
        "station_name": "Ulfa - Ulfa",
        "stationparameter_name": "W",
        "ts_unitsymbol": "cm",
        "timestamp": "2026-02-25T13:30:00Z",
        "ts_value": 72
      }
    ]"#
}

/// Matching record with an unusable value and an out-of-range epoch.
pub(crate) fn fixture_unparsable_record_json() -> &'static str {
    r#"[
      {
        "station_id": 41806,
        "station_no": "24810600",
        "station_name": "Unter-Schmitten - Nidda",
        "stationparameter_name": "W",
        "ts_unitsymbol": "cm",
        "timestamp": 12345,
        "ts_value": "---"
      }
    ]"#
}

/// Structurally valid JSON but not the expected array.
pub(crate) fn fixture_object_payload_json() -> &'static str {
    r#"{ "error": "maintenance", "entries": [] }"#
}
