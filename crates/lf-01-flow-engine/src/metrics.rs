//! # Flow Engine Metrics
//!
//! Prometheus metrics for the state machine manager.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! lf-01-flow-engine = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `flow_started_total` - Flows started locally or accepted as responders
//! - `flow_finished_total` - Terminated flows (by outcome)
//! - `flow_checkpoints_total` - Checkpoints written
//! - `flow_quarantined_total` - Flows whose checkpoint could not be restored

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref FLOWS_STARTED: IntCounter = register_int_counter!(
        "flow_started_total",
        "Flows started locally or accepted as responders"
    )
    .expect("Failed to create FLOWS_STARTED metric");

    pub static ref FLOWS_FINISHED: IntCounterVec = register_int_counter_vec!(
        "flow_finished_total",
        "Terminated flows by outcome",
        &["outcome"]
    )
    .expect("Failed to create FLOWS_FINISHED metric");

    pub static ref CHECKPOINTS_WRITTEN: IntCounter = register_int_counter!(
        "flow_checkpoints_total",
        "Checkpoints written"
    )
    .expect("Failed to create CHECKPOINTS_WRITTEN metric");

    pub static ref FLOWS_QUARANTINED: IntCounter = register_int_counter!(
        "flow_quarantined_total",
        "Flows whose checkpoint could not be restored"
    )
    .expect("Failed to create FLOWS_QUARANTINED metric");
}

#[cfg(feature = "metrics")]
pub fn record_flow_started() {
    FLOWS_STARTED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_flow_finished(outcome: &str) {
    FLOWS_FINISHED.with_label_values(&[outcome]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_checkpoint() {
    CHECKPOINTS_WRITTEN.inc();
}

#[cfg(feature = "metrics")]
pub fn record_quarantined() {
    FLOWS_QUARANTINED.inc();
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_flow_started() {}

#[cfg(not(feature = "metrics"))]
pub fn record_flow_finished(_outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_checkpoint() {}

#[cfg(not(feature = "metrics"))]
pub fn record_quarantined() {}
