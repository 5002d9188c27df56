//! # Flow Logic
//!
//! A flow is one party's role in a protocol, written as an explicit state
//! machine. The engine calls [`FlowLogic::resume`] with what happened since
//! the last suspension and the flow answers with the next [`Suspend`] point.
//! Between calls the flow value itself is serialized into the checkpoint, so
//! every field it needs after a suspension must live in `self`.
//!
//! ```text
//!   Resume::Start ──→ resume() ──→ Suspend::Receive(s) ──(park, checkpoint)──┐
//!                                                                          │
//!   Resume::Received(m) ←──────── message arrives on s ←───────────────────┘
//! ```

use crate::domain::context::FlowContext;
use crate::domain::errors::{FlowError, FlowException};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared_types::{decode, encode, CodecError, Party, SessionId};
use std::fmt;
use std::time::Duration;

/// Serialization of a flow's locals into a checkpoint frame.
///
/// Implemented for every `Serialize` type; flow authors never write it.
pub trait Snapshot {
    fn snapshot(&self) -> Result<Vec<u8>, CodecError>;
}

impl<T: Serialize> Snapshot for T {
    fn snapshot(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }
}

/// One step function of a flow.
pub trait FlowLogic: Snapshot + Send + 'static {
    /// Protocol name, used to look the flow up when restoring a checkpoint
    /// and, for initiating flows, to pick the counterparty's responder.
    fn protocol(&self) -> &'static str;

    fn version(&self) -> u32 {
        1
    }

    /// Advance the flow until its next suspension point.
    fn resume(&mut self, ctx: &mut FlowContext<'_>, input: Resume) -> Result<Suspend, FlowError>;
}

/// A flow type that can be registered with a
/// [`FlowRegistry`](crate::registry::FlowRegistry).
pub trait FlowType: FlowLogic + DeserializeOwned {
    const PROTOCOL: &'static str;
    const VERSION: u32 = 1;

    /// Value the flow completes with.
    type Output: Serialize + DeserializeOwned + Send + 'static;
}

/// What the engine hands back to a flow when it resumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resume {
    /// First call.
    Start,
    /// Resumed after [`Suspend::Continue`].
    Continue,
    /// A message arrived on the session the flow was waiting on.
    Received(ReceivedMessage),
    /// The sub-flow started by [`Suspend::SubFlow`] completed with this value.
    SubFlowReturned(Vec<u8>),
    /// The sub-flow failed with a business rejection.
    SubFlowFailed(FlowException),
    /// The external operation completed with this value.
    ExternalReturned(Vec<u8>),
}

impl Resume {
    /// Unwrap a received message, failing on any other input.
    pub fn into_received(self) -> Result<ReceivedMessage, FlowError> {
        match self {
            Resume::Received(message) => Ok(message),
            other => Err(unexpected("a received message", &other)),
        }
    }

    /// Decode the value returned by a sub-flow or an external operation.
    pub fn returned<T: DeserializeOwned>(self) -> Result<T, FlowError> {
        match self {
            Resume::SubFlowReturned(bytes) | Resume::ExternalReturned(bytes) => {
                Ok(decode(&bytes)?)
            }
            other => Err(unexpected("a returned value", &other)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Resume::Start => "start",
            Resume::Continue => "continue",
            Resume::Received(_) => "received",
            Resume::SubFlowReturned(_) => "sub-flow result",
            Resume::SubFlowFailed(_) => "sub-flow failure",
            Resume::ExternalReturned(_) => "external result",
        }
    }
}

fn unexpected(wanted: &str, got: &Resume) -> FlowError {
    FlowError::Defect(format!("expected {wanted}, resumed with {}", got.kind()))
}

/// Where a flow stops until the engine resumes it.
pub enum Suspend {
    /// Checkpoint (flushing any sends) and resume straight away.
    Continue,
    /// Wait for the next message on `session`.
    Receive {
        session: SessionId,
        timeout: Option<Duration>,
    },
    /// Run another flow to completion on this fiber.
    SubFlow(Box<dyn FlowLogic>),
    /// Call a node service outside the flow worker.
    External(ExternalRequest),
    /// Finish the current frame with an encoded result.
    Complete(Vec<u8>),
}

impl Suspend {
    pub fn complete<T: Serialize>(value: &T) -> Result<Self, FlowError> {
        Ok(Suspend::Complete(encode(value)?))
    }

    pub fn sub_flow<F: FlowLogic>(flow: F) -> Self {
        Suspend::SubFlow(Box::new(flow))
    }

    pub fn external<T: Serialize>(service: &str, payload: &T) -> Result<Self, FlowError> {
        Ok(Suspend::External(ExternalRequest {
            service: service.to_string(),
            payload: encode(payload)?,
        }))
    }
}

impl fmt::Debug for Suspend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suspend::Continue => f.write_str("Continue"),
            Suspend::Receive { session, timeout } => f
                .debug_struct("Receive")
                .field("session", session)
                .field("timeout", timeout)
                .finish(),
            Suspend::SubFlow(flow) => write!(f, "SubFlow({})", flow.protocol()),
            Suspend::External(request) => write!(f, "External({})", request.service),
            Suspend::Complete(bytes) => write!(f, "Complete({} bytes)", bytes.len()),
        }
    }
}

/// A suspending call into a node service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRequest {
    pub service: String,
    pub payload: Vec<u8>,
}

/// A message taken off a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub session: SessionId,
    pub from: Party,
    pub payload: Vec<u8>,
}

impl ReceivedMessage {
    /// Decode the payload. The result must be validated before use.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<UntrustworthyData<T>, FlowError> {
        Ok(UntrustworthyData(decode(&self.payload)?))
    }
}

/// Data sent by a counterparty that has not been checked yet.
///
/// The only way to get at the value is through a validator.
#[derive(Debug)]
pub struct UntrustworthyData<T>(T);

impl<T> UntrustworthyData<T> {
    pub fn unwrap_with<R>(
        self,
        validator: impl FnOnce(T) -> Result<R, FlowError>,
    ) -> Result<R, FlowError> {
        validator(self.0)
    }
}
