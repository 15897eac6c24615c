/// Severity level computation.
///
/// A station's thresholds are strictly ascending, so the level is simply the
/// number of thresholds the value has reached: 0 below the first ("OK"),
/// k when `value >= thresholds[k - 1]`.

use crate::model::Station;

/// Level 0..=N for `value` against ascending `thresholds`.
pub fn compute_level(value: f64, thresholds: &[f64]) -> u8 {
    let reached = thresholds.iter().take_while(|t| value >= **t).count();
    u8::try_from(reached).unwrap_or(u8::MAX)
}

/// Human-readable level: "OK" or "k (name)".
pub fn level_label(station: &Station, level: u8) -> String {
    if level == 0 {
        return "OK".to_string();
    }
    match station.level_names().get(usize::from(level) - 1) {
        Some(name) => format!("{} ({})", level, name),
        None => level.to_string(),
    }
}
