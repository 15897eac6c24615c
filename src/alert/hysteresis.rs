/// Per-threshold hysteresis: each threshold fires once per crossing and only
/// rearms after the value has stayed below it for a minimum duration.
///
/// State machine per threshold:
///
/// ```text
///   armed ──value >= t, sent──▶ disarmed
///     ▲                            │ value < t: start below_since
///     │                            ▼
///     └──below for >= rearm_below──┘   (value >= t resets the streak)
/// ```
///
/// A failed send leaves the threshold armed so the next cycle retries.

use super::engine::{AlertOutcome, AlertPolicy, Evaluation, SuppressReason};
use crate::model::ThresholdKey;
use crate::notify::Notifier;
use crate::store::{AlertStateStore, StoreError};
use chrono::Duration;

pub struct HysteresisPolicy {
    rearm_below: Duration,
}

impl HysteresisPolicy {
    pub fn new(rearm_below: Duration) -> Self {
        Self { rearm_below }
    }
}

impl AlertPolicy for HysteresisPolicy {
    fn name(&self) -> &'static str {
        "hysteresis"
    }

    fn apply(
        &self,
        eval: &Evaluation<'_>,
        store: &mut dyn AlertStateStore,
        notifier: &dyn Notifier,
    ) -> Result<Vec<AlertOutcome>, StoreError> {
        let value = eval.measurement.value;
        let mut outcomes = Vec::new();

        for (index, &threshold) in eval.station.thresholds_cm().iter().enumerate() {
            let key = ThresholdKey::new(eval.station, index);
            let stored = store.threshold_state(&key)?;
            let mut state = stored.unwrap_or_default();

            if value < threshold {
                if state.armed {
                    state.below_since = None;
                } else {
                    match state.below_since {
                        None => state.below_since = Some(eval.measurement.timestamp_utc()),
                        Some(since) if eval.now - since >= self.rearm_below => {
                            state.armed = true;
                            state.below_since = None;
                            tracing::debug!(
                                station = %eval.station.name,
                                threshold_index = index,
                                "threshold rearmed"
                            );
                        }
                        Some(_) => {}
                    }
                }
            } else {
                state.below_since = None;

                if state.armed {
                    if stored.is_none() && !eval.station.alert_on_start {
                        state.armed = false;
                        outcomes.push(AlertOutcome::Suppressed {
                            threshold_index: index,
                            reason: SuppressReason::FirstObservation,
                        });
                    } else {
                        match eval.notify(index, notifier) {
                            Ok(()) => {
                                state.armed = false;
                                outcomes.push(AlertOutcome::Sent { threshold_index: index });
                            }
                            Err(e) => outcomes.push(AlertOutcome::Failed {
                                threshold_index: index,
                                cause: e.to_string(),
                            }),
                        }
                    }
                }
            }

            // Writing never-persisted state is what marks a threshold as seen.
            if stored != Some(state) {
                store.set_threshold_state(&key, state)?;
            }
        }

        Ok(outcomes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::engine::{EvaluationResult, ThresholdEngine};
    use crate::alert::testing::*;
    use crate::model::{Station, ThresholdState};
    use crate::store::MemoryStore;
    use chrono::{DateTime, Utc};

    fn engine() -> ThresholdEngine {
        ThresholdEngine::new(Box::new(HysteresisPolicy::new(Duration::hours(6))))
    }

    /// One committed cycle with the measurement taken at `now`.
    fn cycle(
        store: &mut MemoryStore,
        notifier: &RecordingNotifier,
        station: &Station,
        value: f64,
        now: DateTime<Utc>,
    ) -> EvaluationResult {
        let m = reading(station, value, now);
        let result = engine().evaluate(station, &m, now, store, notifier).unwrap();
        store.commit().unwrap();
        result
    }

    fn armed(store: &MemoryStore, station: &Station, index: usize) -> bool {
        store
            .committed_threshold_state(&ThresholdKey::new(station, index))
            .unwrap_or_default()
            .armed
    }

    #[test]
    fn test_crossing_fires_once_and_disarms() {
        let station = ulfa(true);
        let mut store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        let result = cycle(&mut store, &notifier, &station, 65.0, t0());
        assert_eq!(result.level, 1);
        assert_eq!(result.outcomes, vec![AlertOutcome::Sent { threshold_index: 0 }]);
        assert!(!armed(&store, &station, 0));
        assert!(armed(&store, &station, 1), "untouched thresholds stay armed");
    }

    #[test]
    fn test_no_double_fire_while_above() {
        let station = ulfa(true);
        let mut store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        for i in 0..20 {
            cycle(&mut store, &notifier, &station, 72.0, minutes(15 * i));
        }
        assert_eq!(notifier.count(), 2, "thresholds 60 and 70 fire exactly once each");
    }

    #[test]
    fn test_disarm_is_monotonic_without_rearm() {
        let station = ulfa(true);
        let mut store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        cycle(&mut store, &notifier, &station, 95.0, t0());
        // Brief dips below are not enough to rearm.
        for (i, value) in [55.0, 95.0, 55.0, 95.0].into_iter().enumerate() {
            cycle(&mut store, &notifier, &station, value, minutes(15 * (i as i64 + 1)));
        }
        assert_eq!(notifier.count(), 4, "only the first cycle notifies");
    }

    #[test]
    fn test_rearm_needs_full_duration_below() {
        let station = ulfa(true);
        let mut store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let key = ThresholdKey::new(&station, 0);

        cycle(&mut store, &notifier, &station, 65.0, t0());
        cycle(&mut store, &notifier, &station, 50.0, minutes(15));
        assert_eq!(
            store.committed_threshold_state(&key).unwrap().below_since,
            Some(minutes(15)),
            "below_since starts at the measurement time"
        );

        let just_short = minutes(15) + Duration::hours(6) - Duration::seconds(1);
        cycle(&mut store, &notifier, &station, 50.0, just_short);
        assert!(!armed(&store, &station, 0), "rearm must not happen before the full duration");

        let exactly = minutes(15) + Duration::hours(6);
        cycle(&mut store, &notifier, &station, 50.0, exactly);
        assert!(armed(&store, &station, 0), "rearm at exactly rearm_below");
        assert_eq!(store.committed_threshold_state(&key).unwrap().below_since, None);

        cycle(&mut store, &notifier, &station, 65.0, exactly + Duration::minutes(15));
        assert_eq!(notifier.count(), 2, "rearmed threshold fires again");
    }

    #[test]
    fn test_going_above_resets_below_streak() {
        let station = ulfa(true);
        let mut store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        cycle(&mut store, &notifier, &station, 65.0, t0());
        cycle(&mut store, &notifier, &station, 50.0, minutes(15));
        cycle(&mut store, &notifier, &station, 65.0, minutes(5 * 60));
        // The new streak starts here, so 6h after the first dip is not enough.
        cycle(&mut store, &notifier, &station, 50.0, minutes(6 * 60));
        cycle(&mut store, &notifier, &station, 50.0, minutes(6 * 60 + 30));
        assert!(!armed(&store, &station, 0));
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_failed_send_keeps_threshold_armed_and_retries_once() {
        let station = ulfa(true);
        let mut store = MemoryStore::new();
        let failing = RecordingNotifier::failing();

        let result = cycle(&mut store, &failing, &station, 65.0, t0());
        assert!(result.delivery_failed());
        assert!(armed(&store, &station, 0), "failed send must not disarm");

        let notifier = RecordingNotifier::default();
        cycle(&mut store, &notifier, &station, 65.0, minutes(15));
        cycle(&mut store, &notifier, &station, 65.0, minutes(30));
        assert_eq!(notifier.count(), 1, "retry succeeds exactly once");
        assert!(!armed(&store, &station, 0));
    }

    #[test]
    fn test_first_observation_suppressed_without_alert_on_start() {
        let station = ulfa(false);
        let mut store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        let result = cycle(&mut store, &notifier, &station, 75.0, t0());
        assert_eq!(notifier.count(), 0);
        assert_eq!(
            result.outcomes,
            vec![
                AlertOutcome::Suppressed {
                    threshold_index: 0,
                    reason: SuppressReason::FirstObservation
                },
                AlertOutcome::Suppressed {
                    threshold_index: 1,
                    reason: SuppressReason::FirstObservation
                },
            ]
        );
        assert!(!armed(&store, &station, 0));
    }

    #[test]
    fn test_known_state_notifies_without_alert_on_start() {
        let station = ulfa(false);
        let mut store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        // First cycle below all thresholds persists armed state.
        cycle(&mut store, &notifier, &station, 40.0, t0());
        assert_eq!(
            store.committed_threshold_state(&ThresholdKey::new(&station, 3)),
            Some(ThresholdState::default()),
            "never-persisted state is written even when unchanged"
        );

        cycle(&mut store, &notifier, &station, 65.0, minutes(15));
        assert_eq!(notifier.count(), 1, "a real crossing after the first observation notifies");
    }

    #[test]
    fn test_last_level_is_recorded() {
        let station = ulfa(true);
        let mut store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        cycle(&mut store, &notifier, &station, 85.0, t0());
        assert_eq!(store.committed_station_state(&station.key()).unwrap().last_level, Some(3));
        cycle(&mut store, &notifier, &station, 10.0, minutes(15));
        assert_eq!(store.committed_station_state(&station.key()).unwrap().last_level, Some(0));
    }

    #[test]
    fn test_four_threshold_scenario() {
        let station = ulfa(false);
        let mut store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        // Cycle 1: level 4 on first sight, all suppressed.
        let result = cycle(&mut store, &notifier, &station, 95.0, t0());
        assert_eq!(result.level, 4);
        assert_eq!(notifier.count(), 0);
        assert!((0..4).all(|i| !armed(&store, &station, i)));
        assert_eq!(store.committed_station_state(&station.key()).unwrap().last_level, Some(4));

        // Cycle 2: unchanged, nothing to rearm.
        cycle(&mut store, &notifier, &station, 95.0, minutes(15));
        assert_eq!(notifier.count(), 0);

        // The value drops and stays below long enough to rearm everything.
        cycle(&mut store, &notifier, &station, 50.0, minutes(30));
        cycle(&mut store, &notifier, &station, 50.0, minutes(30) + Duration::hours(6));
        assert!((0..4).all(|i| armed(&store, &station, i)));

        // Cycle 3: back up, all four notify.
        let result = cycle(&mut store, &notifier, &station, 95.0, minutes(45) + Duration::hours(6));
        assert_eq!(result.sent_count(), 4);
        assert_eq!(notifier.subjects()[3], "WARNSTUFE 4 Ulfa - Ulfa: 95.0 cm (>= 90.0 cm)");
    }

    #[test]
    fn test_rearm_from_resumed_state_at_exact_boundary() {
        let station = ulfa(true);
        let key = ThresholdKey::new(&station, 0);
        let notifier = RecordingNotifier::default();
        let disarmed = ThresholdState {
            armed: false,
            below_since: Some(t0()),
        };

        let mut store = MemoryStore::new();
        store.seed_threshold_state(key.clone(), disarmed);
        let before = t0() + Duration::hours(6) - Duration::seconds(1);
        cycle(&mut store, &notifier, &station, 50.0, before);
        assert_eq!(store.committed_threshold_state(&key), Some(disarmed));

        let mut store = MemoryStore::new();
        store.seed_threshold_state(key.clone(), disarmed);
        let at = t0() + Duration::hours(6);
        cycle(&mut store, &notifier, &station, 50.0, at);
        assert_eq!(store.committed_threshold_state(&key), Some(ThresholdState::default()));
        assert_eq!(notifier.count(), 0);
    }
}
