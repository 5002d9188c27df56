//! Driving ports (Inbound API)

use crate::domain::{CommitRequest, CommitResult, UniquenessError};
use async_trait::async_trait;

/// Guarantees at-most-once consumption of every state it is asked about.
///
/// A success is final: resubmitting the same request returns success again.
/// `Err` means no decision was made (malformed request, provider
/// unavailable); `Ok(CommitResult::Failure)` is a decided rejection.
#[async_trait]
pub trait UniquenessProvider: Send + Sync {
    async fn commit(&self, request: CommitRequest) -> Result<CommitResult, UniquenessError>;
}
