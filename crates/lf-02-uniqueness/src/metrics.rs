//! # Uniqueness Metrics
//!
//! Prometheus metrics for commit decisions.
//!
//! ## Metrics Exported
//!
//! - `uniqueness_commits_total` - Decided commands (by outcome)
//! - `uniqueness_malformed_total` - Requests rejected before reaching the log

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

use crate::domain::CommitDecision;
#[cfg(feature = "metrics")]
use crate::domain::NotaryError;

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref COMMITS: IntCounterVec = register_int_counter_vec!(
        "uniqueness_commits_total",
        "Decided commit commands by outcome",
        &["outcome"]
    )
    .expect("Failed to create COMMITS metric");

    pub static ref MALFORMED: IntCounter = register_int_counter!(
        "uniqueness_malformed_total",
        "Requests rejected before reaching the log"
    )
    .expect("Failed to create MALFORMED metric");
}

#[cfg(feature = "metrics")]
fn outcome_label(decision: &CommitDecision) -> &'static str {
    match decision {
        Ok(()) => "success",
        Err(NotaryError::Conflict { .. }) => "conflict",
        Err(NotaryError::TimeWindowInvalid { .. }) => "time_window",
    }
}

#[cfg(feature = "metrics")]
pub fn record_decision(decision: &CommitDecision) {
    COMMITS.with_label_values(&[outcome_label(decision)]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_malformed() {
    MALFORMED.inc();
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_decision(_decision: &CommitDecision) {}

#[cfg(not(feature = "metrics"))]
pub fn record_malformed() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_noop_when_disabled() {
        record_decision(&Ok(()));
        record_malformed();
    }
}
