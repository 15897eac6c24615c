/// Shared helpers for the policy unit tests.

use crate::model::{Measurement, Station};
use crate::notify::{Notification, Notifier, NotifyError};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::cell::{Cell, RefCell};

/// Records every notification; can be switched to fail.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub sent: RefCell<Vec<Notification>>,
    pub failing: Cell<bool>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let n = Self::default();
        n.failing.set(true);
        n
    }

    pub fn count(&self) -> usize {
        self.sent.borrow().len()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent.borrow().iter().map(|n| n.subject.clone()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.get() {
            return Err(NotifyError::Build("smtp unavailable".to_string()));
        }
        self.sent.borrow_mut().push(notification.clone());
        Ok(())
    }
}

pub(crate) fn ulfa(alert_on_start: bool) -> Station {
    Station::new(
        "Ulfa - Ulfa",
        "41801",
        "24810552",
        "W",
        vec![60.0, 70.0, 80.0, 90.0],
        vec!["Melde".into(), "Warn".into(), "Alarm".into(), "Katastrophe".into()],
    )
    .unwrap()
    .with_alert_on_start(alert_on_start)
}

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 25, 12, 0, 0).unwrap()
}

pub(crate) fn minutes(m: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(m)
}

/// Measurement taken exactly at `at`.
pub(crate) fn reading(station: &Station, value: f64, at: DateTime<Utc>) -> Measurement {
    Measurement {
        station_no: station.station_no.clone(),
        station_id_public: station.station_id_public.clone(),
        parameter: station.parameter.clone(),
        timestamp: at.into(),
        value,
        unit: "cm".to_string(),
        source: "layers:10:index".to_string(),
    }
}
