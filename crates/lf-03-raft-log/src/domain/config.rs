//! Raft configuration

use crate::domain::errors::RaftConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Followers start an election after a random timeout in this range.
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    /// Leader heartbeat period.
    pub heartbeat_interval_ms: u64,
    /// Bound on a single replica-to-replica call.
    pub rpc_timeout_ms: u64,
    /// How long a proposer waits for its entry to commit.
    pub commit_timeout_ms: u64,
    /// Entries shipped per append call.
    pub max_entries_per_append: usize,
    /// Client-side attempts before giving up on a commit.
    pub max_submit_attempts: u32,
    /// First client back-off; doubles on every retry.
    pub retry_backoff_ms: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            rpc_timeout_ms: 100,
            commit_timeout_ms: 1_000,
            max_entries_per_append: 64,
            max_submit_attempts: 10,
            retry_backoff_ms: 50,
        }
    }
}

impl RaftConfig {
    pub fn validate(&self) -> Result<(), RaftConfigError> {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(RaftConfigError::EmptyElectionRange {
                min: self.election_timeout_min_ms,
                max: self.election_timeout_max_ms,
            });
        }
        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err(RaftConfigError::HeartbeatTooSlow {
                heartbeat: self.heartbeat_interval_ms,
                min: self.election_timeout_min_ms,
            });
        }
        if self.max_submit_attempts == 0 {
            return Err(RaftConfigError::NoAttempts);
        }
        Ok(())
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    /// A fresh randomised election timeout.
    pub fn election_timeout(&self) -> Duration {
        use rand::Rng;
        let ms = rand::thread_rng()
            .gen_range(self.election_timeout_min_ms..self.election_timeout_max_ms);
        Duration::from_millis(ms)
    }
}
