//! Inbound port: what a replica answers.

use crate::domain::{AppendEntries, AppendResponse, RaftError, ReplicaId, RequestVote, VoteResponse};
use async_trait::async_trait;
use lf_02_uniqueness::{CommitDecision, CommitRequest};

/// The RPC surface of one replica.
#[async_trait]
pub trait RaftHandler: Send + Sync {
    fn replica_id(&self) -> &ReplicaId;

    async fn handle_request_vote(&self, request: RequestVote) -> VoteResponse;

    async fn handle_append_entries(&self, request: AppendEntries) -> AppendResponse;

    /// Order `request` if this replica leads, otherwise `NotLeader`.
    async fn handle_submit(&self, request: CommitRequest) -> Result<CommitDecision, RaftError>;
}
