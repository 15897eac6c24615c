/// PostgreSQL implementations of the store contracts.
///
/// Tables live in the `pegel` schema (see `sql/001_pegel_schema.sql`). The
/// measurement store writes immediately; the alert state store buffers writes
/// and flushes them in a single transaction on commit, so one station's
/// evaluation is either fully visible or not at all.
///
/// Each store owns one connection and remembers its URL. A connection found
/// closed (server restart, dropped socket) is replaced before the next
/// statement, so a database outage only fails the cycles it overlaps.

use super::{AlertStateStore, MeasurementStore, StoreError};
use crate::db;
use crate::model::{Measurement, StationKey, StationState, ThresholdKey, ThresholdState};
use chrono::{DateTime, Utc};
use postgres::Client;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A client plus the URL needed to replace it.
struct Session {
    url: String,
    client: Option<Client>,
}

impl Session {
    fn new(url: &str, client: Client) -> Self {
        Self {
            url: url.to_string(),
            client: Some(client),
        }
    }

    /// Returns a live client, reconnecting if the last one was closed.
    fn client(&mut self) -> Result<&mut Client, StoreError> {
        let client = match self.client.take() {
            Some(client) if !client.is_closed() => client,
            _ => {
                tracing::warn!("database connection closed; reconnecting");
                db::connect_with_validation(&self.url)?
            }
        };
        Ok(self.client.insert(client))
    }
}

// ---------------------------------------------------------------------------
// Measurements
// ---------------------------------------------------------------------------

pub struct PgMeasurementStore {
    session: Session,
}

impl PgMeasurementStore {
    /// Wraps an open client; `url` is used to reconnect after it closes.
    pub fn new(url: &str, client: Client) -> Self {
        Self {
            session: Session::new(url, client),
        }
    }
}

impl MeasurementStore for PgMeasurementStore {
    fn insert_if_absent(&mut self, measurement: &Measurement, level: u8) -> Result<bool, StoreError> {
        let value = Decimal::from_f64(measurement.value)
            .ok_or(StoreError::UnrepresentableValue(measurement.value))?;
        let unit = (!measurement.unit.is_empty()).then_some(measurement.unit.as_str());
        let public_id =
            (!measurement.station_id_public.is_empty()).then_some(measurement.station_id_public.as_str());

        let rows = self.session.client()?.execute(
            "INSERT INTO pegel.measurements
                (station_no, parameter, measured_at, station_id_public, value, unit, level, source)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (station_no, parameter, measured_at) DO NOTHING",
            &[
                &measurement.station_no,
                &measurement.parameter,
                &measurement.timestamp_utc(),
                &public_id,
                &value,
                &unit,
                &i16::from(level),
                &measurement.source,
            ],
        )?;

        Ok(rows == 1)
    }
}

// ---------------------------------------------------------------------------
// Alert state
// ---------------------------------------------------------------------------

pub struct PgAlertStateStore {
    session: Session,
    pending_thresholds: HashMap<ThresholdKey, ThresholdState>,
    pending_stations: HashMap<StationKey, StationState>,
}

impl PgAlertStateStore {
    /// Wraps an open client; `url` is used to reconnect after it closes.
    pub fn new(url: &str, client: Client) -> Self {
        Self {
            session: Session::new(url, client),
            pending_thresholds: HashMap::new(),
            pending_stations: HashMap::new(),
        }
    }
}

fn level_from_db(key: &StationKey, raw: Option<i16>) -> Result<Option<u8>, StoreError> {
    raw.map(|v| {
        u8::try_from(v).map_err(|_| StoreError::Corrupt {
            key: format!("{}/{}", key.station_no, key.parameter),
            detail: format!("last_level {} out of range", v),
        })
    })
    .transpose()
}

fn index_to_db(key: &ThresholdKey) -> Result<i16, StoreError> {
    i16::try_from(key.index).map_err(|_| StoreError::Corrupt {
        key: format!("{}/{}", key.station.station_no, key.station.parameter),
        detail: format!("threshold index {} out of range", key.index),
    })
}

impl AlertStateStore for PgAlertStateStore {
    fn threshold_state(&mut self, key: &ThresholdKey) -> Result<Option<ThresholdState>, StoreError> {
        if let Some(state) = self.pending_thresholds.get(key) {
            return Ok(Some(*state));
        }

        let row = self.session.client()?.query_opt(
            "SELECT armed, below_since FROM pegel.threshold_state
             WHERE station_no = $1 AND parameter = $2 AND threshold_index = $3",
            &[&key.station.station_no, &key.station.parameter, &index_to_db(key)?],
        )?;

        Ok(row.map(|row| ThresholdState {
            armed: row.get(0),
            below_since: row.get::<_, Option<DateTime<Utc>>>(1),
        }))
    }

    fn set_threshold_state(&mut self, key: &ThresholdKey, state: ThresholdState) -> Result<(), StoreError> {
        self.pending_thresholds.insert(key.clone(), state);
        Ok(())
    }

    fn station_state(&mut self, key: &StationKey) -> Result<StationState, StoreError> {
        if let Some(state) = self.pending_stations.get(key) {
            return Ok(*state);
        }

        let row = self.session.client()?.query_opt(
            "SELECT last_level, last_alert_at FROM pegel.station_state
             WHERE station_no = $1 AND parameter = $2",
            &[&key.station_no, &key.parameter],
        )?;

        match row {
            Some(row) => Ok(StationState {
                last_level: level_from_db(key, row.get(0))?,
                last_alert_at: row.get(1),
            }),
            None => Ok(StationState::default()),
        }
    }

    fn set_station_state(&mut self, key: &StationKey, state: StationState) -> Result<(), StoreError> {
        self.pending_stations.insert(key.clone(), state);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.pending_thresholds.is_empty() && self.pending_stations.is_empty() {
            return Ok(());
        }

        let thresholds = std::mem::take(&mut self.pending_thresholds);
        let stations = std::mem::take(&mut self.pending_stations);

        // A failed statement drops the transaction, which rolls it back.
        let mut tx = self.session.client()?.transaction()?;

        for (key, state) in &thresholds {
            tx.execute(
                "INSERT INTO pegel.threshold_state
                    (station_no, parameter, threshold_index, armed, below_since, updated_at)
                 VALUES ($1, $2, $3, $4, $5, now())
                 ON CONFLICT (station_no, parameter, threshold_index) DO UPDATE
                 SET armed = EXCLUDED.armed,
                     below_since = EXCLUDED.below_since,
                     updated_at = now()",
                &[
                    &key.station.station_no,
                    &key.station.parameter,
                    &index_to_db(key)?,
                    &state.armed,
                    &state.below_since,
                ],
            )?;
        }

        for (key, state) in &stations {
            let level = state.last_level.map(i16::from);
            tx.execute(
                "INSERT INTO pegel.station_state
                    (station_no, parameter, last_level, last_alert_at, updated_at)
                 VALUES ($1, $2, $3, $4, now())
                 ON CONFLICT (station_no, parameter) DO UPDATE
                 SET last_level = EXCLUDED.last_level,
                     last_alert_at = EXCLUDED.last_alert_at,
                     updated_at = now()",
                &[&key.station_no, &key.parameter, &level, &state.last_alert_at],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn rollback(&mut self) {
        self.pending_thresholds.clear();
        self.pending_stations.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
