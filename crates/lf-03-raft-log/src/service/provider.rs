//! Uniqueness provider backed by the replicated log.

use super::RaftReplica;
use crate::domain::{RaftConfig, RaftError};
use crate::metrics;
use async_trait::async_trait;
use lf_02_uniqueness::{
    check_request, CommitRequest, CommitResult, UniquenessError, UniquenessProvider,
};
use shared_crypto::Ed25519KeyPair;
use shared_types::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Dependencies for [`RaftUniquenessProvider`]
pub struct RaftUniquenessDependencies<S: KeyValueStore> {
    /// The replica this node submits through.
    pub replica: Arc<RaftReplica<S>>,
    /// Notary service key shared by every replica.
    pub signer: Arc<Ed25519KeyPair>,
    pub config: RaftConfig,
}

/// Submits commit requests through a local replica, retrying across
/// elections. Resubmitting is safe: a command that did commit before the
/// failure is idempotent on the commit log.
pub struct RaftUniquenessProvider<S: KeyValueStore> {
    replica: Arc<RaftReplica<S>>,
    signer: Arc<Ed25519KeyPair>,
    config: RaftConfig,
}

impl<S: KeyValueStore + 'static> RaftUniquenessProvider<S> {
    pub fn new(deps: RaftUniquenessDependencies<S>) -> Self {
        Self {
            replica: deps.replica,
            signer: deps.signer,
            config: deps.config,
        }
    }

    pub fn replica(&self) -> &Arc<RaftReplica<S>> {
        &self.replica
    }
}

#[async_trait]
impl<S: KeyValueStore + 'static> UniquenessProvider for RaftUniquenessProvider<S> {
    async fn commit(&self, request: CommitRequest) -> Result<CommitResult, UniquenessError> {
        check_request(&request, &self.signer)?;
        let tx_id = request.tx_id;
        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut last_error = RaftError::NotLeader { leader: None };

        for attempt in 1..=self.config.max_submit_attempts {
            match self.replica.submit(request.clone()).await {
                Ok(decision) => {
                    lf_02_uniqueness::metrics::record_decision(&decision);
                    match &decision {
                        Ok(()) => info!(tx_id = %tx_id, attempt, "Transaction notarised"),
                        Err(e) => info!(tx_id = %tx_id, reason = %e, "Notarisation refused"),
                    }
                    return Ok(CommitResult::from_decision(decision, &tx_id, &self.signer));
                }
                Err(RaftError::StateMachine(e)) => return Err(e),
                Err(e) if !e.is_transient() => {
                    warn!(tx_id = %tx_id, error = %e, "Commit failed");
                    return Err(UniquenessError::Unavailable(e.to_string()));
                }
                Err(e) => {
                    debug!(tx_id = %tx_id, attempt, error = %e, "Commit attempt failed, retrying");
                    metrics::record_submit_retry();
                    last_error = e;
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_millis(
                        self.config.election_timeout_max_ms,
                    ));
                }
            }
        }

        warn!(
            tx_id = %tx_id,
            attempts = self.config.max_submit_attempts,
            error = %last_error,
            "Giving up on commit"
        );
        Err(UniquenessError::Unavailable(format!(
            "not committed after {} attempts: {}",
            self.config.max_submit_attempts, last_error
        )))
    }
}
