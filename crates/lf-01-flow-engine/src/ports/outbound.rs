//! Driven ports (Outbound dependencies)

use crate::domain::{Checkpoint, CheckpointError, OutboxRecord, StepCommit, TerminalRecord};
use async_trait::async_trait;
use shared_types::{FlowId, SessionId};

/// Durable storage for checkpoints, outboxes, terminal records and the
/// ledger values flows write.
///
/// Production: [`KvCheckpointStore`](crate::adapters::KvCheckpointStore)
/// over RocksDB. Testing: the same adapter over an in-memory store.
pub trait CheckpointStore: Send + Sync {
    /// Apply one step atomically: checkpoint (or terminal record), outbox,
    /// ledger writes and session ownership.
    ///
    /// Fails with `StaleSequence` if a checkpoint with an equal or higher
    /// sequence number is already current for the flow.
    fn commit(&self, step: StepCommit) -> Result<(), CheckpointError>;

    /// Current checkpoint of a live flow.
    fn get_checkpoint(&self, flow_id: FlowId) -> Result<Option<Checkpoint>, CheckpointError>;

    /// All live checkpoints. Entries that cannot be decoded come back as
    /// errors so the caller can quarantine them.
    fn checkpoints(&self)
        -> Result<Vec<(FlowId, Result<Checkpoint, CheckpointError>)>, CheckpointError>;

    fn terminal(&self, flow_id: FlowId) -> Result<Option<TerminalRecord>, CheckpointError>;

    /// Outboxes committed but not yet confirmed sent.
    fn pending_outboxes(&self) -> Result<Vec<(FlowId, OutboxRecord)>, CheckpointError>;

    /// Drop the outbox of `flow_id` if it is still the one committed at `seq`.
    fn clear_outbox(&self, flow_id: FlowId, seq: u64) -> Result<(), CheckpointError>;

    /// Flow that created or accepted `session`, live or finished.
    fn session_owner(&self, session: SessionId) -> Result<Option<FlowId>, CheckpointError>;

    fn read_ledger(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CheckpointError>;

    /// Replace the checkpoint of `flow_id` with a terminal record.
    fn mark_terminal(
        &self,
        record: TerminalRecord,
        seq: u64,
        outbox: Vec<crate::domain::OutboundMessage>,
    ) -> Result<(), CheckpointError> {
        self.commit(StepCommit {
            flow_id: record.flow_id,
            seq,
            checkpoint: None,
            terminal: Some(record),
            outbox,
            ledger_writes: Vec::new(),
            new_sessions: Vec::new(),
        })
    }
}

/// A node service that flows call through [`Suspend::External`](crate::Suspend).
///
/// Requests are persisted before the call and re-issued after a crash, so
/// implementations must be idempotent for a given payload.
#[async_trait]
pub trait ExternalService: Send + Sync {
    async fn execute(&self, payload: Vec<u8>) -> Result<Vec<u8>, String>;
}
