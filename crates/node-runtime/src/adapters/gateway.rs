//! Notary access to the replica cluster.
//!
//! The notary's flow engine commits through one replica at a time. When that
//! replica is taken off the transport the gateway moves on to the next one
//! that is still reachable; the replica itself forwards to whoever leads.

use async_trait::async_trait;
use lf_02_uniqueness::{CommitRequest, CommitResult, UniquenessError, UniquenessProvider};
use lf_03_raft_log::{InMemoryRaftTransport, RaftUniquenessProvider};
use shared_types::KeyValueStore;
use std::sync::Arc;
use tracing::debug;

pub struct ClusterGateway<S: KeyValueStore> {
    transport: Arc<InMemoryRaftTransport>,
    members: Vec<RaftUniquenessProvider<S>>,
}

impl<S: KeyValueStore + 'static> ClusterGateway<S> {
    pub fn new(transport: Arc<InMemoryRaftTransport>, members: Vec<RaftUniquenessProvider<S>>) -> Self {
        Self { transport, members }
    }

    fn reachable(&self) -> Option<&RaftUniquenessProvider<S>> {
        self.members
            .iter()
            .find(|member| !self.transport.is_down(member.replica().id()))
    }
}

#[async_trait]
impl<S: KeyValueStore + 'static> UniquenessProvider for ClusterGateway<S> {
    async fn commit(&self, request: CommitRequest) -> Result<CommitResult, UniquenessError> {
        let member = self
            .reachable()
            .ok_or_else(|| UniquenessError::Unavailable("every replica is down".into()))?;
        debug!(replica = %member.replica().id(), tx_id = %request.tx_id, "Submitting through replica");
        member.commit(request).await
    }
}
