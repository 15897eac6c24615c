/// Threshold engine: computes the level for a measurement and delegates the
/// notify/suppress decision to an [`AlertPolicy`].
///
/// All decision state lives in the [`AlertStateStore`]; the engine itself is
/// stateless, so one instance serves every station. Writes go to the store's
/// buffer and the caller decides whether to commit them.

use super::hysteresis::HysteresisPolicy;
use super::message::render_threshold_alert;
use super::rate_limit::{LevelIncreasePolicy, RateLimitPolicy};
use super::thresholds::compute_level;
use crate::config::AlertSettings;
use crate::model::{Measurement, Station};
use crate::notify::{Notifier, NotifyError};
use crate::store::{AlertStateStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Policy selection
// ---------------------------------------------------------------------------

/// Which decision policy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Per-threshold arm/rearm with a minimum time below before rearming.
    #[default]
    Hysteresis,
    /// Notify on every cycle at level >= 1, spaced by a minimum interval.
    RateLimit,
    /// Notify when the level strictly increases.
    LevelIncrease,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// The crossing was already present on the very first observation.
    FirstObservation,
    RateLimited,
}

/// What happened to one threshold that wanted to notify this cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AlertOutcome {
    Sent { threshold_index: usize },
    Failed { threshold_index: usize, cause: String },
    Suppressed { threshold_index: usize, reason: SuppressReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub level: u8,
    pub outcomes: Vec<AlertOutcome>,
}

impl EvaluationResult {
    pub fn delivery_failed(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o, AlertOutcome::Failed { .. }))
    }

    pub fn sent_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, AlertOutcome::Sent { .. }))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Policy contract
// ---------------------------------------------------------------------------

/// Inputs shared by every policy for one station in one cycle.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation<'a> {
    pub station: &'a Station,
    pub measurement: &'a Measurement,
    pub level: u8,
    pub now: DateTime<Utc>,
}

impl Evaluation<'_> {
    /// Renders and sends the alert for threshold `index`.
    pub fn notify(&self, index: usize, notifier: &dyn Notifier) -> Result<(), NotifyError> {
        let notification = render_threshold_alert(self.station, self.measurement, index);
        let result = notifier.send(&notification);
        match &result {
            Ok(()) => tracing::info!(
                station = %self.station.name,
                threshold_index = index,
                value = self.measurement.value,
                "alert delivered"
            ),
            Err(e) => tracing::warn!(
                station = %self.station.name,
                threshold_index = index,
                error = %e,
                "alert delivery failed; will retry next cycle"
            ),
        }
        result
    }
}

pub trait AlertPolicy {
    fn name(&self) -> &'static str;

    /// Reads and updates the policy's state for one measurement, sending
    /// whatever is due. At most one notification per threshold.
    fn apply(
        &self,
        eval: &Evaluation<'_>,
        store: &mut dyn AlertStateStore,
        notifier: &dyn Notifier,
    ) -> Result<Vec<AlertOutcome>, StoreError>;

    /// Whether `last_level` is recorded even when a send failed this cycle.
    fn advances_level_on_failure(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ThresholdEngine {
    policy: Box<dyn AlertPolicy>,
}

impl ThresholdEngine {
    pub fn new(policy: Box<dyn AlertPolicy>) -> Self {
        Self { policy }
    }

    pub fn from_settings(settings: &AlertSettings) -> Self {
        let policy: Box<dyn AlertPolicy> = match settings.policy {
            PolicyKind::Hysteresis => Box::new(HysteresisPolicy::new(settings.rearm_below)),
            PolicyKind::RateLimit => Box::new(RateLimitPolicy::new(settings.min_alert_interval)),
            PolicyKind::LevelIncrease => {
                Box::new(LevelIncreasePolicy::new(settings.min_alert_interval))
            }
        };
        Self::new(policy)
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Evaluates one measurement. Store errors abort the evaluation; the
    /// caller is expected to roll back the store in that case.
    pub fn evaluate(
        &self,
        station: &Station,
        measurement: &Measurement,
        now: DateTime<Utc>,
        store: &mut dyn AlertStateStore,
        notifier: &dyn Notifier,
    ) -> Result<EvaluationResult, StoreError> {
        let level = compute_level(measurement.value, station.thresholds_cm());
        let eval = Evaluation {
            station,
            measurement,
            level,
            now,
        };

        let outcomes = self.policy.apply(&eval, store, notifier)?;
        let result = EvaluationResult { level, outcomes };

        if !result.delivery_failed() || self.policy.advances_level_on_failure() {
            let key = station.key();
            let mut state = store.station_state(&key)?;
            state.last_level = Some(level);
            store.set_station_state(&key, state)?;
        }

        Ok(result)
    }
}
