/// Station-level policies kept for installations that relied on the older
/// alerting behaviour. Both track a single `last_alert_at` clock per station
/// instead of per-threshold arm state, and name the highest crossed threshold
/// in the notification.

use super::engine::{AlertOutcome, AlertPolicy, Evaluation, SuppressReason};
use crate::model::StationState;
use crate::notify::Notifier;
use crate::store::{AlertStateStore, StoreError};
use chrono::Duration;

fn within_interval(state: &StationState, eval: &Evaluation<'_>, min_interval: Duration) -> bool {
    state
        .last_alert_at
        .is_some_and(|last| eval.now - last < min_interval)
}

/// Sends for the current level and records `last_alert_at` on success.
fn send_and_record(
    eval: &Evaluation<'_>,
    mut state: StationState,
    store: &mut dyn AlertStateStore,
    notifier: &dyn Notifier,
) -> Result<AlertOutcome, StoreError> {
    let index = usize::from(eval.level) - 1;
    match eval.notify(index, notifier) {
        Ok(()) => {
            state.last_alert_at = Some(eval.now);
            store.set_station_state(&eval.station.key(), state)?;
            Ok(AlertOutcome::Sent { threshold_index: index })
        }
        Err(e) => Ok(AlertOutcome::Failed {
            threshold_index: index,
            cause: e.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Rate limit
// ---------------------------------------------------------------------------

/// Notifies on every cycle at level >= 1, at most once per `min_interval`.
pub struct RateLimitPolicy {
    min_interval: Duration,
}

impl RateLimitPolicy {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }
}

impl AlertPolicy for RateLimitPolicy {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn apply(
        &self,
        eval: &Evaluation<'_>,
        store: &mut dyn AlertStateStore,
        notifier: &dyn Notifier,
    ) -> Result<Vec<AlertOutcome>, StoreError> {
        if eval.level == 0 {
            return Ok(Vec::new());
        }
        let index = usize::from(eval.level) - 1;
        let state = store.station_state(&eval.station.key())?;

        if state.last_level.is_none() && !eval.station.alert_on_start {
            return Ok(vec![AlertOutcome::Suppressed {
                threshold_index: index,
                reason: SuppressReason::FirstObservation,
            }]);
        }
        if within_interval(&state, eval, self.min_interval) {
            return Ok(vec![AlertOutcome::Suppressed {
                threshold_index: index,
                reason: SuppressReason::RateLimited,
            }]);
        }

        Ok(vec![send_and_record(eval, state, store, notifier)?])
    }
}

// ---------------------------------------------------------------------------
// Level increase
// ---------------------------------------------------------------------------

/// Notifies when the level rises above the last recorded level. A strict
/// increase bypasses the rate limit; the limit still spaces first-sight
/// alerts when no level was recorded yet.
pub struct LevelIncreasePolicy {
    min_interval: Duration,
}

impl LevelIncreasePolicy {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }
}

impl AlertPolicy for LevelIncreasePolicy {
    fn name(&self) -> &'static str {
        "level_increase"
    }

    fn apply(
        &self,
        eval: &Evaluation<'_>,
        store: &mut dyn AlertStateStore,
        notifier: &dyn Notifier,
    ) -> Result<Vec<AlertOutcome>, StoreError> {
        if eval.level == 0 {
            return Ok(Vec::new());
        }
        let index = usize::from(eval.level) - 1;
        let state = store.station_state(&eval.station.key())?;

        let increased = match state.last_level {
            Some(last) if eval.level <= last => return Ok(Vec::new()),
            Some(_) => true,
            None if !eval.station.alert_on_start => {
                return Ok(vec![AlertOutcome::Suppressed {
                    threshold_index: index,
                    reason: SuppressReason::FirstObservation,
                }]);
            }
            None => false,
        };

        if !increased && within_interval(&state, eval, self.min_interval) {
            return Ok(vec![AlertOutcome::Suppressed {
                threshold_index: index,
                reason: SuppressReason::RateLimited,
            }]);
        }

        Ok(vec![send_and_record(eval, state, store, notifier)?])
    }

    /// Keeping the old level makes a failed increase alert retry next cycle.
    fn advances_level_on_failure(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
