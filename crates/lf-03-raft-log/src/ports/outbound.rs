//! Outbound port: how a replica reaches its peers.

use crate::domain::{AppendEntries, AppendResponse, RaftError, ReplicaId, RequestVote, VoteResponse};
use async_trait::async_trait;
use lf_02_uniqueness::{CommitDecision, CommitRequest};

/// Delivery of replica-to-replica calls. Implementations return
/// `RaftError::Unreachable` when either end cannot be reached.
#[async_trait]
pub trait RaftTransport: Send + Sync {
    async fn request_vote(
        &self,
        from: &ReplicaId,
        to: &ReplicaId,
        request: RequestVote,
    ) -> Result<VoteResponse, RaftError>;

    async fn append_entries(
        &self,
        from: &ReplicaId,
        to: &ReplicaId,
        request: AppendEntries,
    ) -> Result<AppendResponse, RaftError>;

    /// Forward a client command to the replica believed to lead.
    async fn submit(
        &self,
        from: &ReplicaId,
        to: &ReplicaId,
        request: CommitRequest,
    ) -> Result<CommitDecision, RaftError>;
}
