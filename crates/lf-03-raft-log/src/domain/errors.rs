//! Raft error types

use crate::domain::entities::ReplicaId;
use lf_02_uniqueness::UniquenessError;
use shared_types::{CodecError, KVStoreError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaftError {
    /// This replica cannot order commands. `leader` is the last one it heard from.
    #[error("Not the leader (leader: {leader:?})")]
    NotLeader { leader: Option<ReplicaId> },

    /// The entry was not committed in time.
    #[error("No quorum reached")]
    NoQuorum,

    #[error("Replica {0} is unreachable")]
    Unreachable(ReplicaId),

    #[error("Replica is shut down")]
    Shutdown,

    #[error("Invalid configuration: {0}")]
    Config(#[from] RaftConfigError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] UniquenessError),

    #[error("Storage error: {0}")]
    Storage(#[from] KVStoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl RaftError {
    /// True for errors a client should answer by retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RaftError::NotLeader { .. } | RaftError::NoQuorum | RaftError::Unreachable(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaftConfigError {
    #[error("election timeout range is empty ({min}..{max} ms)")]
    EmptyElectionRange { min: u64, max: u64 },

    #[error("heartbeat interval {heartbeat} ms must be below the election timeout {min} ms")]
    HeartbeatTooSlow { heartbeat: u64, min: u64 },

    #[error("max_submit_attempts must be at least 1")]
    NoAttempts,
}
