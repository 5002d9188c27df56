//! # Flow Context
//!
//! The flow's view of the node during one step. Nothing done through the
//! context leaves the node until the step's checkpoint is durable: sends are
//! buffered in the step outbox and ledger writes are committed in the same
//! batch as the checkpoint.

use crate::domain::checkpoint::{OutboundMessage, SessionRecord, SessionState};
use crate::domain::errors::FlowError;
use crate::domain::logic::Suspend;
use crate::domain::progress::{ProgressEvent, ProgressTracker};
use crate::ports::CheckpointStore;
use serde::Serialize;
use shared_bus::SessionMessage;
use shared_types::{encode, FlowId, Party, SessionId, Timestamp};
use std::collections::BTreeMap;
use std::time::Duration;

/// Side effects collected while a step runs.
#[derive(Debug, Default)]
pub(crate) struct StepEffects {
    pub outbox: Vec<OutboundMessage>,
    pub ledger_writes: Vec<(Vec<u8>, Vec<u8>)>,
    pub new_sessions: Vec<SessionId>,
    pub progress: Vec<ProgressEvent>,
}

pub struct FlowContext<'a> {
    flow_id: FlowId,
    me: &'a Party,
    protocol: &'static str,
    version: u32,
    now: Timestamp,
    sessions: &'a mut BTreeMap<SessionId, SessionRecord>,
    effects: &'a mut StepEffects,
    ledger: &'a dyn CheckpointStore,
    progress: &'a mut ProgressTracker,
    progress_path: Vec<String>,
}

impl<'a> FlowContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        flow_id: FlowId,
        me: &'a Party,
        protocol: &'static str,
        version: u32,
        now: Timestamp,
        sessions: &'a mut BTreeMap<SessionId, SessionRecord>,
        effects: &'a mut StepEffects,
        ledger: &'a dyn CheckpointStore,
        progress: &'a mut ProgressTracker,
        progress_path: Vec<String>,
    ) -> Self {
        Self {
            flow_id,
            me,
            protocol,
            version,
            now,
            sessions,
            effects,
            ledger,
            progress,
            progress_path,
        }
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn our_identity(&self) -> &Party {
        self.me
    }

    /// Node clock at the start of this step.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    /// Open a session to `counterparty`, which will run the responder
    /// registered for the calling flow's protocol.
    pub fn initiate_flow(&mut self, counterparty: &Party) -> SessionId {
        let session = SessionId::new();
        self.sessions.insert(
            session,
            SessionRecord::initiating(counterparty.clone(), self.protocol, self.version),
        );
        self.effects.outbox.push(OutboundMessage {
            to: counterparty.clone(),
            message: SessionMessage::Init {
                session,
                protocol: self.protocol.to_string(),
                version: self.version,
            },
        });
        self.effects.new_sessions.push(session);
        session
    }

    pub fn counterparty(&self, session: SessionId) -> Result<&Party, FlowError> {
        self.sessions
            .get(&session)
            .map(|s| &s.counterparty)
            .ok_or(FlowError::UnknownSession(session))
    }

    /// Queue `payload` on `session`. Never suspends.
    pub fn send<T: Serialize>(&mut self, session: SessionId, payload: &T) -> Result<(), FlowError> {
        let payload = encode(payload)?;
        let record = self.open_session(session)?;
        let seq = record.next_send_seq;
        record.next_send_seq += 1;
        let to = record.counterparty.clone();
        self.effects.outbox.push(OutboundMessage {
            to,
            message: SessionMessage::Data {
                session,
                seq,
                payload,
            },
        });
        Ok(())
    }

    /// Suspend until the next message on `session`.
    pub fn receive(&self, session: SessionId) -> Suspend {
        Suspend::Receive {
            session,
            timeout: None,
        }
    }

    /// Like [`receive`](Self::receive), failing with
    /// [`FlowError::ReceiveTimeout`] if nothing arrives in time.
    pub fn receive_within(&self, session: SessionId, timeout: Duration) -> Suspend {
        Suspend::Receive {
            session,
            timeout: Some(timeout),
        }
    }

    pub fn send_and_receive<T: Serialize>(
        &mut self,
        session: SessionId,
        payload: &T,
    ) -> Result<Suspend, FlowError> {
        self.send(session, payload)?;
        Ok(self.receive(session))
    }

    /// Tell the counterparty we are done with `session`.
    pub fn close_session(&mut self, session: SessionId) -> Result<(), FlowError> {
        let record = self.open_session(session)?;
        let seq = record.next_send_seq;
        record.next_send_seq += 1;
        record.state = SessionState::Ended;
        let to = record.counterparty.clone();
        self.effects.outbox.push(OutboundMessage {
            to,
            message: SessionMessage::End {
                session,
                seq,
                error: None,
            },
        });
        Ok(())
    }

    fn open_session(&mut self, session: SessionId) -> Result<&mut SessionRecord, FlowError> {
        let record = self
            .sessions
            .get_mut(&session)
            .ok_or(FlowError::UnknownSession(session))?;
        match &record.state {
            SessionState::Rejected(reason) => Err(FlowError::SessionRejected {
                session,
                reason: reason.clone(),
            }),
            SessionState::Ended => Err(FlowError::SessionClosed(session)),
            SessionState::Initiating | SessionState::Initiated => Ok(record),
        }
    }

    // =========================================================================
    // LEDGER
    // =========================================================================

    /// Read a ledger value, seeing this step's own writes.
    pub fn read_ledger(&self, key: &[u8]) -> Result<Option<Vec<u8>>, FlowError> {
        if let Some((_, value)) = self
            .effects
            .ledger_writes
            .iter()
            .rev()
            .find(|(k, _)| k.as_slice() == key)
        {
            return Ok(Some(value.clone()));
        }
        Ok(self.ledger.read_ledger(key)?)
    }

    /// Write a ledger value. Committed atomically with this step's checkpoint.
    pub fn write_ledger(&mut self, key: &[u8], value: Vec<u8>) {
        self.effects.ledger_writes.push((key.to_vec(), value));
    }

    // =========================================================================
    // PROGRESS
    // =========================================================================

    /// Mark the current frame as being at `label`.
    pub fn step(&mut self, label: &str) {
        self.progress.set_current(label);
        let mut path = self.progress_path.clone();
        path.push(label.to_string());
        self.effects.progress.push(ProgressEvent::Step {
            flow_id: self.flow_id,
            path,
        });
    }

    pub fn progress(&self) -> &ProgressTracker {
        self.progress
    }
}
