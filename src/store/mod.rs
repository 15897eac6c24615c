/// Persistence contracts for measurements and alert state.
///
/// Two stores with different guarantees:
///
/// - [`MeasurementStore`] is an append-only log. Inserts are idempotent on
///   (station_no, parameter, timestamp) and take effect immediately.
/// - [`AlertStateStore`] is the engine's only memory between cycles. Writes
///   are buffered and become durable on [`AlertStateStore::commit`]; a failed
///   station calls [`AlertStateStore::rollback`] so no partial state leaks.
///
/// Both have a PostgreSQL implementation (`pg`) and an in-memory one
/// (`memory`) for tests and dry runs.

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::{PgAlertStateStore, PgMeasurementStore};

use crate::model::{Measurement, StationKey, StationState, ThresholdKey, ThresholdState};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] postgres::Error),
    /// Reconnecting after a closed connection failed.
    #[error(transparent)]
    Connection(#[from] crate::db::DbConfigError),
    /// A persisted row could not be mapped back into the model.
    #[error("Corrupt state for {key}: {detail}")]
    Corrupt { key: String, detail: String },
    /// The measurement value cannot be represented as NUMERIC.
    #[error("Value {0} cannot be stored")]
    UnrepresentableValue(f64),
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// Append-only measurement log.
pub trait MeasurementStore {
    /// Stores the measurement with its computed level. Returns `false` when a
    /// row with the same (station_no, parameter, timestamp) already exists,
    /// in which case nothing is written.
    fn insert_if_absent(&mut self, measurement: &Measurement, level: u8) -> Result<bool, StoreError>;
}

/// Durable alert state with explicit commit.
pub trait AlertStateStore {
    /// Returns `None` if this threshold has never been persisted.
    fn threshold_state(&mut self, key: &ThresholdKey) -> Result<Option<ThresholdState>, StoreError>;

    fn set_threshold_state(&mut self, key: &ThresholdKey, state: ThresholdState) -> Result<(), StoreError>;

    /// Returns the default (no level, no alert) when nothing is stored.
    fn station_state(&mut self, key: &StationKey) -> Result<StationState, StoreError>;

    fn set_station_state(&mut self, key: &StationKey, state: StationState) -> Result<(), StoreError>;

    /// Makes all buffered writes durable.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discards all buffered writes.
    fn rollback(&mut self);
}
