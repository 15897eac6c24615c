/// In-memory implementation of both store contracts.
///
/// Clones share the same data, so a test can hand one handle to the cycle
/// driver and inspect the committed state through another. Used for unit
/// tests and for `--memory` dry runs, where state does not survive a restart.

use super::{AlertStateStore, MeasurementStore, StoreError};
use crate::model::{Measurement, StationKey, StationState, ThresholdKey, ThresholdState};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// A measurement row as the in-memory log keeps it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMeasurement {
    pub measurement: Measurement,
    pub level: u8,
}

type MeasurementKey = (String, String, DateTime<Utc>);

#[derive(Debug, Default)]
struct MemoryData {
    measurements: BTreeMap<MeasurementKey, StoredMeasurement>,
    thresholds: HashMap<ThresholdKey, ThresholdState>,
    stations: HashMap<StationKey, StationState>,
    pending_thresholds: HashMap<ThresholdKey, ThresholdState>,
    pending_stations: HashMap<StationKey, StationState>,
    commits: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Rc<RefCell<MemoryData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct measurement rows.
    pub fn measurement_count(&self) -> usize {
        self.data.borrow().measurements.len()
    }

    pub fn measurements(&self) -> Vec<StoredMeasurement> {
        self.data.borrow().measurements.values().cloned().collect()
    }

    /// Committed threshold state, ignoring anything still buffered.
    pub fn committed_threshold_state(&self, key: &ThresholdKey) -> Option<ThresholdState> {
        self.data.borrow().thresholds.get(key).copied()
    }

    /// Committed station state, ignoring anything still buffered.
    pub fn committed_station_state(&self, key: &StationKey) -> Option<StationState> {
        self.data.borrow().stations.get(key).copied()
    }

    /// Seeds committed threshold state, e.g. to resume from a known point.
    pub fn seed_threshold_state(&self, key: ThresholdKey, state: ThresholdState) {
        self.data.borrow_mut().thresholds.insert(key, state);
    }

    pub fn seed_station_state(&self, key: StationKey, state: StationState) {
        self.data.borrow_mut().stations.insert(key, state);
    }

    pub fn has_pending_writes(&self) -> bool {
        let data = self.data.borrow();
        !data.pending_thresholds.is_empty() || !data.pending_stations.is_empty()
    }

    pub fn commit_count(&self) -> usize {
        self.data.borrow().commits
    }
}

impl MeasurementStore for MemoryStore {
    fn insert_if_absent(&mut self, measurement: &Measurement, level: u8) -> Result<bool, StoreError> {
        let key = (
            measurement.station_no.clone(),
            measurement.parameter.clone(),
            measurement.timestamp_utc(),
        );
        let mut data = self.data.borrow_mut();
        if data.measurements.contains_key(&key) {
            return Ok(false);
        }
        data.measurements.insert(
            key,
            StoredMeasurement {
                measurement: measurement.clone(),
                level,
            },
        );
        Ok(true)
    }
}

impl AlertStateStore for MemoryStore {
    fn threshold_state(&mut self, key: &ThresholdKey) -> Result<Option<ThresholdState>, StoreError> {
        let data = self.data.borrow();
        Ok(data
            .pending_thresholds
            .get(key)
            .or_else(|| data.thresholds.get(key))
            .copied())
    }

    fn set_threshold_state(&mut self, key: &ThresholdKey, state: ThresholdState) -> Result<(), StoreError> {
        self.data.borrow_mut().pending_thresholds.insert(key.clone(), state);
        Ok(())
    }

    fn station_state(&mut self, key: &StationKey) -> Result<StationState, StoreError> {
        let data = self.data.borrow();
        Ok(data
            .pending_stations
            .get(key)
            .or_else(|| data.stations.get(key))
            .copied()
            .unwrap_or_default())
    }

    fn set_station_state(&mut self, key: &StationKey, state: StationState) -> Result<(), StoreError> {
        self.data.borrow_mut().pending_stations.insert(key.clone(), state);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let mut guard = self.data.borrow_mut();
        let data = &mut *guard;
        data.thresholds.extend(data.pending_thresholds.drain());
        data.stations.extend(data.pending_stations.drain());
        data.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) {
        let mut data = self.data.borrow_mut();
        data.pending_thresholds.clear();
        data.pending_stations.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
