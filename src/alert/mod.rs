/// Threshold alerting.
///
/// - `thresholds`: level computation and labels
/// - `engine`: the evaluation entry point and the policy contract
/// - `hysteresis`: the default per-threshold arm/rearm policy
/// - `rate_limit`: station-level rate-limit and level-increase policies
/// - `message`: alert mail rendering

pub mod engine;
pub mod hysteresis;
pub mod message;
pub mod rate_limit;
pub mod thresholds;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{
    AlertOutcome, AlertPolicy, Evaluation, EvaluationResult, PolicyKind, SuppressReason,
    ThresholdEngine,
};
pub use hysteresis::HysteresisPolicy;
pub use rate_limit::{LevelIncreasePolicy, RateLimitPolicy};
pub use thresholds::{compute_level, level_label};
