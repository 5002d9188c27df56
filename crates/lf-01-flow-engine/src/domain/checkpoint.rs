//! # Checkpoint Model
//!
//! Everything the engine persists about a flow.
//!
//! ## Write-Ahead Order
//!
//! At each suspension the engine writes, in ONE atomic batch:
//! the new [`Checkpoint`], the [`OutboxRecord`] of messages the step produced
//! and the ledger writes the step made. Only then are the messages handed to
//! the network, after which the outbox record is cleared and consumed inbound
//! deliveries are acknowledged. A crash at any point either loses the whole
//! step (it is replayed) or keeps it and re-sends the outbox (receivers drop
//! the duplicates by sequence number).

use crate::domain::errors::FlowError;
use crate::domain::logic::{ExternalRequest, Resume};
use crate::domain::progress::ProgressTracker;
use serde::{Deserialize, Serialize};
use shared_bus::{SessionError, SessionMessage};
use shared_types::{FlowId, Party, SessionId, Timestamp};
use std::collections::{BTreeMap, VecDeque};

/// Serialized execution state of one suspended flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub flow_id: FlowId,
    /// Strictly increasing per flow. A write must carry a higher value than
    /// the checkpoint it supersedes.
    pub seq: u64,
    /// Call stack, outermost flow first.
    pub stack: Vec<Frame>,
    pub sessions: BTreeMap<SessionId, SessionRecord>,
    pub wait: Wait,
}

/// One flow on the call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub protocol: String,
    pub version: u32,
    /// The flow value, encoded.
    pub state: Vec<u8>,
    pub progress: ProgressTracker,
}

/// What a suspended flow is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wait {
    /// Runnable; resume the top frame with this input.
    Ready(Resume),
    /// Parked until a message (or end) arrives on `session`.
    Receive {
        session: SessionId,
        deadline_at: Option<Timestamp>,
    },
    /// Parked until a node service answers.
    External(ExternalRequest),
}

/// Lifecycle of a session as seen from one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// `Init` sent, no `Confirm` yet.
    Initiating,
    Initiated,
    Rejected(String),
    /// We sent `End`.
    Ended,
}

/// Per-session bookkeeping carried in the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub counterparty: Party,
    pub state: SessionState,
    /// Set when this side opened the session: the protocol sent in `Init`.
    pub initiated_with: Option<(String, u32)>,
    pub next_send_seq: u64,
    pub next_recv_seq: u64,
    /// Payloads received but not yet consumed by a receive.
    pub inbound: VecDeque<Vec<u8>>,
    /// `Some` once the counterparty sent `End`.
    pub remote_end: Option<Option<SessionError>>,
}

impl SessionRecord {
    pub fn initiating(counterparty: Party, protocol: &str, version: u32) -> Self {
        Self {
            counterparty,
            state: SessionState::Initiating,
            initiated_with: Some((protocol.to_string(), version)),
            next_send_seq: 0,
            next_recv_seq: 0,
            inbound: VecDeque::new(),
            remote_end: None,
        }
    }

    pub fn accepted(counterparty: Party) -> Self {
        Self {
            counterparty,
            state: SessionState::Initiated,
            initiated_with: None,
            next_send_seq: 0,
            next_recv_seq: 0,
            inbound: VecDeque::new(),
            remote_end: None,
        }
    }

    /// True if we may still send on this session.
    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            SessionState::Initiating | SessionState::Initiated
        )
    }
}

/// A session message waiting to leave the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: Party,
    pub message: SessionMessage,
}

/// Messages committed by one step and not yet confirmed sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub seq: u64,
    pub messages: Vec<OutboundMessage>,
}

/// Final result of a flow: its encoded output or the error it failed with.
pub type FlowOutcome = Result<Vec<u8>, FlowError>;

/// Written in place of the checkpoint when a flow terminates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalRecord {
    pub flow_id: FlowId,
    pub protocol: String,
    pub outcome: FlowOutcome,
    /// Every session the flow held, so late traffic is recognised.
    pub sessions: Vec<SessionId>,
    pub finished_at: Timestamp,
}

/// One atomic write to the checkpoint store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepCommit {
    pub flow_id: FlowId,
    pub seq: u64,
    /// The new current checkpoint; `None` when the flow terminates.
    pub checkpoint: Option<Checkpoint>,
    pub terminal: Option<TerminalRecord>,
    pub outbox: Vec<OutboundMessage>,
    pub ledger_writes: Vec<(Vec<u8>, Vec<u8>)>,
    /// Sessions created in this step; ownership is recorded permanently.
    pub new_sessions: Vec<SessionId>,
}

/// Observable state of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    Runnable,
    Suspended,
    Recovering,
    /// A write to the checkpoint store failed. The flow is not running and
    /// resumes from its last checkpoint on the next start.
    Stalled,
    Completed,
    Failed,
    Killed,
    /// Checkpoint could not be restored. Not retried.
    Fatal,
}

impl FlowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowStatus::Completed | FlowStatus::Failed | FlowStatus::Killed | FlowStatus::Fatal
        )
    }
}
