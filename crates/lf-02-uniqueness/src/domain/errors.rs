//! Uniqueness error types

use serde::{Deserialize, Serialize};
use shared_types::{CodecError, KVStoreError, SecureHash, StateRef, TimeWindow, Timestamp};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// How a conflicting state was used by the request that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumedStateType {
    Input,
    Reference,
}

/// Who already consumed a state the request wanted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConsumptionDetails {
    /// Transaction that consumed the state first.
    pub consuming_tx: SecureHash,
    /// How the rejected request used the state.
    pub kind: ConsumedStateType,
}

/// A decided rejection. Recorded in the commit log like a success and
/// disclosed to the requesting party.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NotaryError {
    /// Some states were already consumed by a different transaction.
    #[error("{}", describe_conflict(.tx_id, .consumed))]
    Conflict {
        tx_id: SecureHash,
        consumed: BTreeMap<StateRef, StateConsumptionDetails>,
    },

    /// The transaction's time window does not contain the notary's clock.
    #[error("Time window {window:?} does not contain notary time {current_time}")]
    TimeWindowInvalid {
        current_time: Timestamp,
        window: TimeWindow,
    },
}

fn describe_conflict(
    tx_id: &SecureHash,
    consumed: &BTreeMap<StateRef, StateConsumptionDetails>,
) -> String {
    let mut out = format!("Transaction {tx_id} conflicts with");
    for (i, (state, details)) in consumed.iter().enumerate() {
        let sep = if i == 0 { " " } else { ", " };
        out.push_str(&format!("{sep}{state} consumed by {}", details.consuming_tx));
    }
    out
}

impl NotaryError {
    /// Conflicting states, empty for other rejections.
    pub fn conflicting_states(&self) -> Vec<StateRef> {
        match self {
            NotaryError::Conflict { consumed, .. } => consumed.keys().copied().collect(),
            _ => Vec::new(),
        }
    }
}

/// Errors that stop a request before any decision is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniquenessError {
    /// Rejected synchronously, never logged.
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// The provider could not reach a decision in time. Safe to retry.
    #[error("Uniqueness provider unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] KVStoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl fmt::Display for ConsumedStateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumedStateType::Input => f.write_str("input"),
            ConsumedStateType::Reference => f.write_str("reference"),
        }
    }
}
