//! # Raft Metrics
//!
//! ## Metrics Exported
//!
//! - `raft_elections_total` - Elections started by this process
//! - `raft_leaderships_total` - Elections won
//! - `raft_entries_applied_total` - Entries applied to the commit log
//! - `raft_submit_retries_total` - Client retries after a transient failure

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{register_int_counter, IntCounter};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref ELECTIONS: IntCounter =
        register_int_counter!("raft_elections_total", "Elections started")
            .expect("Failed to create ELECTIONS metric");

    pub static ref LEADERSHIPS: IntCounter =
        register_int_counter!("raft_leaderships_total", "Elections won")
            .expect("Failed to create LEADERSHIPS metric");

    pub static ref ENTRIES_APPLIED: IntCounter = register_int_counter!(
        "raft_entries_applied_total",
        "Entries applied to the commit log"
    )
    .expect("Failed to create ENTRIES_APPLIED metric");

    pub static ref SUBMIT_RETRIES: IntCounter = register_int_counter!(
        "raft_submit_retries_total",
        "Client retries after a transient failure"
    )
    .expect("Failed to create SUBMIT_RETRIES metric");
}

#[cfg(feature = "metrics")]
pub fn record_election() {
    ELECTIONS.inc();
}

#[cfg(feature = "metrics")]
pub fn record_leadership() {
    LEADERSHIPS.inc();
}

#[cfg(feature = "metrics")]
pub fn record_applied(count: u64) {
    ENTRIES_APPLIED.inc_by(count);
}

#[cfg(feature = "metrics")]
pub fn record_submit_retry() {
    SUBMIT_RETRIES.inc();
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_election() {}

#[cfg(not(feature = "metrics"))]
pub fn record_leadership() {}

#[cfg(not(feature = "metrics"))]
pub fn record_applied(_count: u64) {}

#[cfg(not(feature = "metrics"))]
pub fn record_submit_retry() {}
