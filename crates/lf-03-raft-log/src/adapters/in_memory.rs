//! In-process transport for clusters living in one address space.
//!
//! Replicas can be taken down and brought back to simulate crashes and
//! partitions: every call from or to a down replica fails with
//! `Unreachable` and never reaches its handler.

use crate::domain::{AppendEntries, AppendResponse, RaftError, ReplicaId, RequestVote, VoteResponse};
use crate::ports::{RaftHandler, RaftTransport};
use async_trait::async_trait;
use lf_02_uniqueness::{CommitDecision, CommitRequest};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::info;

#[derive(Default)]
pub struct InMemoryRaftTransport {
    handlers: RwLock<HashMap<ReplicaId, Weak<dyn RaftHandler>>>,
    down: RwLock<HashSet<ReplicaId>>,
}

impl InMemoryRaftTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handler` reachable under its replica id.
    ///
    /// Only a weak reference is kept; dropping the replica unregisters it.
    pub fn register<H: RaftHandler + 'static>(&self, handler: &Arc<H>) {
        let handler: Arc<dyn RaftHandler> = handler.clone();
        let id = handler.replica_id().clone();
        self.handlers.write().insert(id, Arc::downgrade(&handler));
    }

    pub fn take_down(&self, replica: &ReplicaId) {
        info!(replica = %replica, "Replica taken down");
        self.down.write().insert(replica.clone());
    }

    pub fn bring_up(&self, replica: &ReplicaId) {
        info!(replica = %replica, "Replica brought up");
        self.down.write().remove(replica);
    }

    pub fn is_down(&self, replica: &ReplicaId) -> bool {
        self.down.read().contains(replica)
    }

    fn route(&self, from: &ReplicaId, to: &ReplicaId) -> Result<Arc<dyn RaftHandler>, RaftError> {
        {
            let down = self.down.read();
            if down.contains(from) || down.contains(to) {
                return Err(RaftError::Unreachable(to.clone()));
            }
        }
        self.handlers
            .read()
            .get(to)
            .and_then(Weak::upgrade)
            .ok_or_else(|| RaftError::Unreachable(to.clone()))
    }
}

#[async_trait]
impl RaftTransport for InMemoryRaftTransport {
    async fn request_vote(
        &self,
        from: &ReplicaId,
        to: &ReplicaId,
        request: RequestVote,
    ) -> Result<VoteResponse, RaftError> {
        let handler = self.route(from, to)?;
        Ok(handler.handle_request_vote(request).await)
    }

    async fn append_entries(
        &self,
        from: &ReplicaId,
        to: &ReplicaId,
        request: AppendEntries,
    ) -> Result<AppendResponse, RaftError> {
        let handler = self.route(from, to)?;
        Ok(handler.handle_append_entries(request).await)
    }

    async fn submit(
        &self,
        from: &ReplicaId,
        to: &ReplicaId,
        request: CommitRequest,
    ) -> Result<CommitDecision, RaftError> {
        let handler = self.route(from, to)?;
        handler.handle_submit(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(ReplicaId);

    #[async_trait]
    impl RaftHandler for Echo {
        fn replica_id(&self) -> &ReplicaId {
            &self.0
        }

        async fn handle_request_vote(&self, request: RequestVote) -> VoteResponse {
            VoteResponse {
                term: request.term,
                granted: true,
            }
        }

        async fn handle_append_entries(&self, request: AppendEntries) -> AppendResponse {
            AppendResponse {
                term: request.term,
                success: true,
                match_index: request.prev_log_index,
            }
        }

        async fn handle_submit(&self, _request: CommitRequest) -> Result<CommitDecision, RaftError> {
            Err(RaftError::NotLeader { leader: None })
        }
    }

    fn vote(term: u64) -> RequestVote {
        RequestVote {
            term,
            candidate: ReplicaId::new("a"),
            last_log_index: 0,
            last_log_term: 0,
        }
    }

    #[tokio::test]
    async fn test_down_replica_is_unreachable_both_ways() {
        let transport = InMemoryRaftTransport::new();
        let a = ReplicaId::new("a");
        let b = Arc::new(Echo(ReplicaId::new("b")));
        transport.register(&b);

        assert!(transport.request_vote(&a, &b.0, vote(1)).await.unwrap().granted);

        transport.take_down(&b.0);
        assert_eq!(
            transport.request_vote(&a, &b.0, vote(2)).await,
            Err(RaftError::Unreachable(b.0.clone()))
        );

        transport.bring_up(&b.0);
        transport.take_down(&a);
        assert!(transport.request_vote(&a, &b.0, vote(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_handler_is_unreachable() {
        let transport = InMemoryRaftTransport::new();
        let b = Arc::new(Echo(ReplicaId::new("b")));
        transport.register(&b);
        let id = b.0.clone();
        drop(b);

        assert!(transport
            .request_vote(&ReplicaId::new("a"), &id, vote(1))
            .await
            .is_err());
    }
}
