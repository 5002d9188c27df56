//! In-memory form of a checkpoint: the same data with live flow objects on
//! the stack instead of encoded frames.

use crate::domain::{
    Checkpoint, FlowError, FlowLogic, Frame, ProgressTracker, Resume, SessionRecord, SessionState,
    Wait,
};
use crate::domain::logic::ReceivedMessage;
use crate::registry::FlowRegistry;
use shared_bus::SessionError;
use shared_types::{FlowId, SessionId, Timestamp};
use std::collections::BTreeMap;

pub(crate) struct LiveFrame {
    pub logic: Box<dyn FlowLogic>,
    pub progress: ProgressTracker,
}

pub(crate) struct Fiber {
    pub flow_id: FlowId,
    pub seq: u64,
    pub stack: Vec<LiveFrame>,
    pub sessions: BTreeMap<SessionId, SessionRecord>,
    pub wait: Wait,
}

impl Fiber {
    pub fn new(flow_id: FlowId, logic: Box<dyn FlowLogic>) -> Self {
        Self {
            flow_id,
            seq: 0,
            stack: vec![LiveFrame {
                logic,
                progress: ProgressTracker::new(),
            }],
            sessions: BTreeMap::new(),
            wait: Wait::Ready(Resume::Start),
        }
    }

    pub fn restore(checkpoint: Checkpoint, registry: &FlowRegistry) -> Result<Self, FlowError> {
        if checkpoint.stack.is_empty() {
            return Err(FlowError::Defect("checkpoint has an empty call stack".into()));
        }
        let stack = checkpoint
            .stack
            .into_iter()
            .map(|frame| {
                Ok(LiveFrame {
                    logic: registry.restore(&frame.protocol, frame.version, &frame.state)?,
                    progress: frame.progress,
                })
            })
            .collect::<Result<Vec<_>, FlowError>>()?;
        Ok(Self {
            flow_id: checkpoint.flow_id,
            seq: checkpoint.seq,
            stack,
            sessions: checkpoint.sessions,
            wait: checkpoint.wait,
        })
    }

    /// Encode the current state under the next sequence number.
    pub fn checkpoint(&mut self) -> Result<Checkpoint, FlowError> {
        let stack = self
            .stack
            .iter()
            .map(|frame| {
                Ok(Frame {
                    protocol: frame.logic.protocol().to_string(),
                    version: frame.logic.version(),
                    state: frame.logic.snapshot()?,
                    progress: frame.progress.clone(),
                })
            })
            .collect::<Result<Vec<_>, FlowError>>()?;
        self.seq += 1;
        Ok(Checkpoint {
            flow_id: self.flow_id,
            seq: self.seq,
            stack,
            sessions: self.sessions.clone(),
            wait: self.wait.clone(),
        })
    }

    pub fn root_protocol(&self) -> &'static str {
        self.stack.first().map_or("", |f| f.logic.protocol())
    }

    /// Current step of every frame below the top one.
    pub fn progress_path(&self) -> Vec<String> {
        let below_top = self.stack.len().saturating_sub(1);
        self.stack[..below_top]
            .iter()
            .filter_map(|f| f.progress.current().map(str::to_string))
            .collect()
    }

    pub fn receive_deadline(&self) -> Option<(SessionId, Timestamp)> {
        match self.wait {
            Wait::Receive {
                session,
                deadline_at: Some(at),
            } => Some((session, at)),
            _ => None,
        }
    }

    /// If the flow waits on a session that has something for it, take it.
    pub fn poll_receive(&mut self) -> Option<Result<Resume, FlowError>> {
        let Wait::Receive { session, .. } = self.wait else {
            return None;
        };
        let Some(record) = self.sessions.get_mut(&session) else {
            return Some(Err(FlowError::UnknownSession(session)));
        };
        if let Some(payload) = record.inbound.pop_front() {
            return Some(Ok(Resume::Received(ReceivedMessage {
                session,
                from: record.counterparty.clone(),
                payload,
            })));
        }
        if let SessionState::Rejected(reason) = &record.state {
            return Some(Err(FlowError::SessionRejected {
                session,
                reason: reason.clone(),
            }));
        }
        match &record.remote_end {
            None => None,
            Some(None) => Some(Err(FlowError::UnexpectedSessionEnd(session))),
            Some(Some(SessionError::FlowException(message))) => {
                Some(Err(FlowError::exception(message.clone())))
            }
            Some(Some(_)) => Some(Err(FlowError::CounterpartyFailed(session))),
        }
    }

    /// What a step can change on existing sessions: the send counter and the
    /// local state.
    pub fn session_marks(&self) -> BTreeMap<SessionId, (u64, SessionState)> {
        self.sessions
            .iter()
            .map(|(id, r)| (*id, (r.next_send_seq, r.state.clone())))
            .collect()
    }

    /// Undo a failed step's session changes: drop the sessions it opened and
    /// put the others back to `marks`.
    pub fn rewind_sessions(
        &mut self,
        marks: &BTreeMap<SessionId, (u64, SessionState)>,
        opened: &[SessionId],
    ) {
        for session in opened {
            self.sessions.remove(session);
        }
        for (session, (next_send_seq, state)) in marks {
            if let Some(record) = self.sessions.get_mut(session) {
                record.next_send_seq = *next_send_seq;
                record.state = state.clone();
            }
        }
    }

    /// Sessions on which we still owe the counterparty an `End`.
    pub fn open_sessions(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|(_, r)| r.is_open() && r.remote_end.is_none())
            .map(|(id, _)| *id)
            .collect()
    }
}
