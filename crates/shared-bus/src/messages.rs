//! # Session Messages
//!
//! Wire types exchanged between the flow engines of two parties.
//!
//! A session is opened by `Init`, answered by `Confirm` or `Reject`, carries
//! any number of `Data` messages in both directions and is closed by `End`.
//! `Data` and `End` are numbered per direction so that a receiver can drop
//! the duplicates produced by at-least-once redelivery and sender replay.

use serde::{Deserialize, Serialize};
use shared_types::{Party, SessionId};
use std::fmt;
use uuid::Uuid;

/// Identifier of one network delivery, used for acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reason attached to an `End` that closes a session abnormally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionError {
    /// Business-level rejection; the message is meant for the counterparty.
    FlowException(String),
    /// The counterparty hit a defect. Details stay on the failing node.
    CounterpartyFailed,
    /// The counterparty flow was killed by its operator.
    Killed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::FlowException(message) => write!(f, "{message}"),
            SessionError::CounterpartyFailed => f.write_str("counterparty flow failed"),
            SessionError::Killed => f.write_str("counterparty flow was killed"),
        }
    }
}

/// A message on a flow session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMessage {
    /// Ask the recipient to start the responder registered for `protocol`.
    Init {
        session: SessionId,
        protocol: String,
        version: u32,
    },
    /// The responder is running.
    Confirm { session: SessionId },
    /// No responder could be started.
    Reject { session: SessionId, reason: String },
    /// Application payload, numbered from zero per direction.
    Data {
        session: SessionId,
        seq: u64,
        payload: Vec<u8>,
    },
    /// The sending side has finished with the session.
    End {
        session: SessionId,
        seq: u64,
        error: Option<SessionError>,
    },
}

impl SessionMessage {
    /// The session this message belongs to.
    #[must_use]
    pub fn session(&self) -> SessionId {
        match self {
            SessionMessage::Init { session, .. }
            | SessionMessage::Confirm { session }
            | SessionMessage::Reject { session, .. }
            | SessionMessage::Data { session, .. }
            | SessionMessage::End { session, .. } => *session,
        }
    }

    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::Init { .. } => "init",
            SessionMessage::Confirm { .. } => "confirm",
            SessionMessage::Reject { .. } => "reject",
            SessionMessage::Data { .. } => "data",
            SessionMessage::End { .. } => "end",
        }
    }
}

/// A message in transit, as handed to the recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub delivery_id: DeliveryId,
    pub from: Party,
    pub to: Party,
    pub topic: String,
    pub message: SessionMessage,
}
