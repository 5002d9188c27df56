//! Error types for the flow engine

use serde::{Deserialize, Serialize};
use shared_types::{CodecError, FlowId, KVStoreError, SessionId};
use std::fmt;
use thiserror::Error;

/// A business-level rejection raised by flow logic.
///
/// Unlike every other [`FlowError`], the message of a `FlowException` is
/// disclosed to counterparties holding an open session with the failing flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowException {
    pub message: String,
}

impl FlowException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for FlowException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FlowException {}

/// Flow error types
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FlowError {
    #[error("{0}")]
    Exception(FlowException),

    #[error("Flow defect: {0}")]
    Defect(String),

    #[error("Session {session} rejected by counterparty: {reason}")]
    SessionRejected { session: SessionId, reason: String },

    #[error("Counterparty ended session {0} before sending the expected message")]
    UnexpectedSessionEnd(SessionId),

    #[error("Counterparty flow on session {0} failed")]
    CounterpartyFailed(SessionId),

    #[error("Timed out waiting for a message on session {0}")]
    ReceiveTimeout(SessionId),

    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    #[error("Session {0} is already closed")]
    SessionClosed(SessionId),

    #[error("No flow registered for protocol {name} v{version}")]
    UnknownProtocol { name: String, version: u32 },

    #[error("External service {service} failed: {message}")]
    External { service: String, message: String },

    #[error("Flow was killed")]
    Killed,

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Flow {0} is quarantined")]
    Quarantined(FlowId),

    #[error("Unknown flow {0}")]
    UnknownFlow(FlowId),

    #[error("Flow engine already started")]
    AlreadyStarted,

    #[error("Flow engine stopped")]
    EngineStopped,
}

impl FlowError {
    /// Shorthand for a business rejection.
    pub fn exception(message: impl Into<String>) -> Self {
        FlowError::Exception(FlowException::new(message))
    }

    /// True for rejections that are expected and safe to disclose.
    pub fn is_business(&self) -> bool {
        matches!(self, FlowError::Exception(_))
    }
}

impl From<FlowException> for FlowError {
    fn from(e: FlowException) -> Self {
        FlowError::Exception(e)
    }
}

impl From<CodecError> for FlowError {
    fn from(e: CodecError) -> Self {
        FlowError::Codec(e.to_string())
    }
}

impl From<CheckpointError> for FlowError {
    fn from(e: CheckpointError) -> Self {
        FlowError::Checkpoint(e.to_string())
    }
}

/// Errors raised by a [`CheckpointStore`](crate::ports::CheckpointStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("Storage error: {0}")]
    Storage(#[from] KVStoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Checkpoint {proposed} for flow {flow_id} does not supersede {current}")]
    StaleSequence {
        flow_id: FlowId,
        current: u64,
        proposed: u64,
    },
}
