//! # Flow Runner
//!
//! One tokio task per live flow. The task holds the flow's [`Fiber`] and
//! waits on its mailbox while parked; it takes a worker permit only while it
//! is executing steps.
//!
//! ## Step Protocol
//!
//! ```text
//! resume() ──→ checkpoint + outbox + ledger writes (one batch)
//!          ──→ send outbox ──→ clear outbox ──→ ack consumed deliveries
//!          ──→ continue, or park until the next event
//! ```

use crate::domain::context::StepEffects;
use crate::domain::{
    ExternalRequest, FlowContext, FlowError, FlowOutcome, FlowStatus, OutboundMessage,
    ProgressEvent, ProgressTracker, Resume, SessionState, StepCommit, Suspend, TerminalRecord,
    Wait,
};
use crate::service::fiber::{Fiber, LiveFrame};
use crate::service::EngineCore;
use shared_bus::{DeliveryId, Envelope, SessionError, SessionMessage};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// Something that happened to a parked flow.
pub(crate) enum FlowEvent {
    Inbound(Envelope),
    ExternalDone(Result<Vec<u8>, String>),
    Kill,
}

/// Input for the next step: a resume value, or an error to unwind with.
type Input = Result<Resume, FlowError>;

/// Why the runner stopped executing steps.
enum Control {
    Park,
    Finished,
    /// Shut down or lost the ability to persist. The last checkpoint stays
    /// current and is picked up by the next recovery.
    Stopped,
}

enum Next {
    Run(Input),
    Poll,
    External(ExternalRequest),
    Finish(FlowOutcome),
}

pub(crate) struct FlowRunner {
    core: Arc<EngineCore>,
    fiber: Fiber,
    mailbox: mpsc::UnboundedReceiver<FlowEvent>,
    events: mpsc::UnboundedSender<FlowEvent>,
    outcome: watch::Sender<Option<FlowOutcome>>,
    progress: broadcast::Sender<ProgressEvent>,
    pending_acks: Vec<DeliveryId>,
    shutdown: watch::Receiver<bool>,
}

impl FlowRunner {
    pub fn new(
        core: Arc<EngineCore>,
        fiber: Fiber,
        mailbox: mpsc::UnboundedReceiver<FlowEvent>,
        events: mpsc::UnboundedSender<FlowEvent>,
        outcome: watch::Sender<Option<FlowOutcome>>,
        progress: broadcast::Sender<ProgressEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            core,
            fiber,
            mailbox,
            events,
            outcome,
            progress,
            pending_acks: Vec::new(),
            shutdown,
        }
    }

    pub async fn run(mut self, recovering: bool) {
        if self.is_stopped() {
            return;
        }
        if recovering {
            self.recover().await;
        }

        let mut next = self.initial_input();
        loop {
            if let Some(input) = next.take() {
                match self.execute(input).await {
                    Control::Park => {
                        self.core.set_status(self.fiber.flow_id, FlowStatus::Suspended);
                    }
                    Control::Finished | Control::Stopped => return,
                }
            }

            let deadline_ms = self
                .fiber
                .receive_deadline()
                .map(|(_, at)| at.saturating_sub(self.core.time.now()));

            let event = tokio::select! {
                _ = self.shutdown.changed() => return,
                event = self.mailbox.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
                _ = tokio::time::sleep(Duration::from_millis(deadline_ms.unwrap_or(0))),
                    if deadline_ms.is_some() => {
                    next = self.on_deadline();
                    continue;
                }
            };

            match self.on_event(event).await {
                Ok(input) => next = input,
                Err(_) => return,
            }
        }
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    // =========================================================================
    // RECOVERY
    // =========================================================================

    /// Re-establish sessions that never got confirmed before the crash.
    async fn recover(&mut self) {
        let flow_id = self.fiber.flow_id;
        if !self.core.config.reinitiate_on_recovery {
            return;
        }
        let pending: Vec<OutboundMessage> = self
            .fiber
            .sessions
            .iter()
            .filter(|(_, r)| r.state == SessionState::Initiating)
            .filter_map(|(session, r)| {
                r.initiated_with.as_ref().map(|(protocol, version)| OutboundMessage {
                    to: r.counterparty.clone(),
                    message: SessionMessage::Init {
                        session: *session,
                        protocol: protocol.clone(),
                        version: *version,
                    },
                })
            })
            .collect();
        if pending.is_empty() {
            return;
        }
        debug!(flow_id = %flow_id, sessions = pending.len(), "Re-initiating unconfirmed sessions");
        for message in pending {
            if let Err(e) = self
                .core
                .messaging
                .send(&message.to, shared_bus::SESSION_TOPIC, message.message)
                .await
            {
                warn!(flow_id = %flow_id, error = %e, "Failed to re-send session init");
            }
        }
    }

    fn initial_input(&mut self) -> Option<Input> {
        match self.fiber.wait.clone() {
            Wait::Ready(resume) => Some(Ok(resume)),
            Wait::Receive { .. } => self.fiber.poll_receive(),
            Wait::External(request) => {
                self.dispatch_external(request);
                None
            }
        }
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    async fn execute(&mut self, mut input: Input) -> Control {
        let Ok(_permit) = self.core.workers.clone().acquire_owned().await else {
            return Control::Stopped;
        };
        self.core.set_status(self.fiber.flow_id, FlowStatus::Runnable);

        loop {
            if self.is_stopped() {
                return Control::Stopped;
            }

            let mut effects = StepEffects::default();
            let marks = self.fiber.session_marks();
            let result = match input {
                Ok(resume) => self.step(resume, &mut effects),
                Err(error) => Err(error),
            };
            if result.is_err() {
                // A failed step is rolled back: its sends, writes and new
                // sessions never happened.
                self.fiber.rewind_sessions(&marks, &effects.new_sessions);
                effects.outbox.clear();
                effects.ledger_writes.clear();
                effects.new_sessions.clear();
            }
            for event in effects.progress.drain(..) {
                let _ = self.progress.send(event);
            }

            let next = match result {
                Ok(Suspend::Continue) => {
                    self.fiber.wait = Wait::Ready(Resume::Continue);
                    Next::Run(Ok(Resume::Continue))
                }
                Ok(Suspend::Receive { session, timeout }) => {
                    let deadline_at = timeout
                        .map(|t| self.core.time.now().saturating_add(t.as_millis() as u64));
                    self.fiber.wait = Wait::Receive {
                        session,
                        deadline_at,
                    };
                    Next::Poll
                }
                Ok(Suspend::SubFlow(child)) => {
                    debug!(
                        flow_id = %self.fiber.flow_id,
                        sub_flow = child.protocol(),
                        "Starting sub-flow"
                    );
                    self.fiber.stack.push(LiveFrame {
                        logic: child,
                        progress: ProgressTracker::new(),
                    });
                    self.fiber.wait = Wait::Ready(Resume::Start);
                    Next::Run(Ok(Resume::Start))
                }
                Ok(Suspend::External(request)) => {
                    self.fiber.wait = Wait::External(request.clone());
                    Next::External(request)
                }
                Ok(Suspend::Complete(bytes)) => {
                    if self.fiber.stack.len() == 1 {
                        Next::Finish(Ok(bytes))
                    } else {
                        self.pop_frame();
                        let resume = Resume::SubFlowReturned(bytes);
                        self.fiber.wait = Wait::Ready(resume.clone());
                        Next::Run(Ok(resume))
                    }
                }
                Err(error) => match self.unwind(error) {
                    Ok(resume) => {
                        self.fiber.wait = Wait::Ready(resume.clone());
                        Next::Run(Ok(resume))
                    }
                    Err(error) => Next::Finish(Err(error)),
                },
            };

            let next = match next {
                Next::Finish(outcome) => {
                    self.finish(outcome, effects).await;
                    return Control::Finished;
                }
                other => other,
            };
            if let Err(control) = self.persist(effects).await {
                return control;
            }

            match next {
                Next::Run(next_input) => input = next_input,
                Next::Poll => match self.fiber.poll_receive() {
                    Some(next_input) => input = next_input,
                    None => return Control::Park,
                },
                Next::External(request) => {
                    self.dispatch_external(request);
                    return Control::Park;
                }
                Next::Finish(_) => return Control::Finished,
            }
        }
    }

    /// Run the top frame once.
    fn step(&mut self, resume: Resume, effects: &mut StepEffects) -> Result<Suspend, FlowError> {
        let path = self.fiber.progress_path();
        let now = self.core.time.now();
        let core = &self.core;
        let fiber = &mut self.fiber;
        let flow_id = fiber.flow_id;

        let Some(LiveFrame { logic, progress }) = fiber.stack.last_mut() else {
            return Err(FlowError::Defect("empty call stack".into()));
        };
        let protocol = logic.protocol();
        let version = logic.version();
        let mut ctx = FlowContext::new(
            flow_id,
            &core.me,
            protocol,
            version,
            now,
            &mut fiber.sessions,
            effects,
            core.store.as_ref(),
            progress,
            path,
        );

        catch_unwind(AssertUnwindSafe(|| logic.resume(&mut ctx, resume)))
            .unwrap_or_else(|_| Err(FlowError::Defect(format!("{protocol} panicked"))))
    }

    fn pop_frame(&mut self) {
        if let Some(child) = self.fiber.stack.pop() {
            if let Some(parent) = self.fiber.stack.last_mut() {
                parent.progress.attach_child(child.progress);
            }
        }
    }

    /// A business rejection inside a sub-flow is handed to the parent frame;
    /// anything else terminates the whole flow.
    fn unwind(&mut self, error: FlowError) -> Result<Resume, FlowError> {
        if let FlowError::Exception(exception) = &error {
            if self.fiber.stack.len() > 1 {
                debug!(
                    flow_id = %self.fiber.flow_id,
                    error = %exception,
                    "Sub-flow failed, resuming parent"
                );
                self.pop_frame();
                return Ok(Resume::SubFlowFailed(exception.clone()));
            }
        }
        Err(error)
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    async fn persist(&mut self, effects: StepEffects) -> Result<(), Control> {
        let flow_id = self.fiber.flow_id;
        let checkpoint = match self.fiber.checkpoint() {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                for session in &effects.new_sessions {
                    self.fiber.sessions.remove(session);
                }
                self.finish(Err(FlowError::Defect(e.to_string())), StepEffects::default())
                    .await;
                return Err(Control::Finished);
            }
        };
        let seq = checkpoint.seq;
        let outbox = effects.outbox;
        let new_sessions = effects.new_sessions;

        if self.is_stopped() {
            return Err(Control::Stopped);
        }
        let commit = StepCommit {
            flow_id,
            seq,
            checkpoint: Some(checkpoint),
            terminal: None,
            outbox: outbox.clone(),
            ledger_writes: effects.ledger_writes,
            new_sessions: new_sessions.clone(),
        };
        if let Err(e) = self.core.store.commit(commit) {
            error!(flow_id = %flow_id, seq, error = %e, "Checkpoint write failed, stopping flow");
            self.stall();
            return Err(Control::Stopped);
        }
        crate::metrics::record_checkpoint();
        self.core.register_sessions(flow_id, new_sessions);

        if self.is_stopped() {
            return Err(Control::Stopped);
        }
        if self.core.flush_outbox(flow_id, seq, outbox).await.is_err() {
            return Err(Control::Stopped);
        }
        self.acknowledge();
        Ok(())
    }

    /// The runner is about to exit without a durable outcome. The slot stays
    /// so the flow reports [`FlowStatus::Stalled`] until the next start
    /// recovers it from its last checkpoint.
    fn stall(&mut self) {
        self.pending_acks.clear();
        self.core.set_status(self.fiber.flow_id, FlowStatus::Stalled);
    }

    fn acknowledge(&mut self) {
        for delivery_id in self.pending_acks.drain(..) {
            self.core.messaging.acknowledge(delivery_id);
        }
    }

    // =========================================================================
    // TERMINATION
    // =========================================================================

    async fn finish(&mut self, outcome: FlowOutcome, effects: StepEffects) {
        let flow_id = self.fiber.flow_id;
        let protocol = self.fiber.root_protocol();

        let StepEffects {
            mut outbox,
            ledger_writes,
            new_sessions,
            ..
        } = effects;

        let end_error = match &outcome {
            Ok(_) => None,
            Err(FlowError::Exception(e)) => Some(SessionError::FlowException(e.message.clone())),
            Err(FlowError::Killed) => Some(SessionError::Killed),
            Err(_) => Some(SessionError::CounterpartyFailed),
        };
        for session in self.fiber.open_sessions() {
            if let Some(record) = self.fiber.sessions.get_mut(&session) {
                let seq = record.next_send_seq;
                record.next_send_seq += 1;
                record.state = SessionState::Ended;
                outbox.push(OutboundMessage {
                    to: record.counterparty.clone(),
                    message: SessionMessage::End {
                        session,
                        seq,
                        error: end_error.clone(),
                    },
                });
            }
        }

        let seq = self.fiber.seq + 1;
        let record = TerminalRecord {
            flow_id,
            protocol: protocol.to_string(),
            outcome: outcome.clone(),
            sessions: self.fiber.sessions.keys().copied().collect(),
            finished_at: self.core.time.now(),
        };
        if self.is_stopped() {
            return;
        }
        let commit = StepCommit {
            flow_id,
            seq,
            checkpoint: None,
            terminal: Some(record),
            outbox: outbox.clone(),
            ledger_writes,
            new_sessions: new_sessions.clone(),
        };
        if let Err(e) = self.core.store.commit(commit) {
            error!(flow_id = %flow_id, error = %e, "Terminal record write failed, stopping flow");
            self.stall();
            return;
        }
        self.core.register_sessions(flow_id, new_sessions);

        let status = match &outcome {
            Ok(_) => {
                info!(flow_id = %flow_id, protocol, "Flow completed");
                FlowStatus::Completed
            }
            Err(FlowError::Killed) => {
                warn!(flow_id = %flow_id, protocol, "Flow killed");
                FlowStatus::Killed
            }
            Err(e) if e.is_business() => {
                info!(flow_id = %flow_id, protocol, reason = %e, "Flow failed");
                FlowStatus::Failed
            }
            Err(e) => {
                error!(
                    flow_id = %flow_id,
                    protocol,
                    stack_depth = self.fiber.stack.len(),
                    sessions = self.fiber.sessions.len(),
                    error = %e,
                    "Flow failed with a defect"
                );
                FlowStatus::Failed
            }
        };
        crate::metrics::record_flow_finished(match status {
            FlowStatus::Completed => "completed",
            FlowStatus::Killed => "killed",
            _ => "failed",
        });

        if !self.is_stopped() {
            let _ = self.core.flush_outbox(flow_id, seq, outbox).await;
            self.acknowledge();
        }

        let success = outcome.is_ok();
        self.outcome.send_replace(Some(outcome));
        let _ = self.progress.send(ProgressEvent::Finished { flow_id, success });
        self.core.remove_flow(flow_id, self.fiber.sessions.keys().copied());
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    async fn on_event(&mut self, event: FlowEvent) -> Result<Option<Input>, ()> {
        match event {
            FlowEvent::Kill => {
                self.finish(Err(FlowError::Killed), StepEffects::default())
                    .await;
                Err(())
            }
            FlowEvent::ExternalDone(result) => match &self.fiber.wait {
                Wait::External(request) => {
                    let service = request.service.clone();
                    Ok(Some(result.map(Resume::ExternalReturned).map_err(|message| {
                        FlowError::External { service, message }
                    })))
                }
                _ => Ok(None),
            },
            FlowEvent::Inbound(envelope) => {
                self.pending_acks.push(envelope.delivery_id);
                let changed = self.apply_inbound(envelope);
                if let Some(input) = self.fiber.poll_receive() {
                    return Ok(Some(input));
                }
                if changed {
                    match self.persist(StepEffects::default()).await {
                        Ok(()) => {}
                        Err(_) => return Err(()),
                    }
                } else {
                    self.acknowledge();
                }
                Ok(None)
            }
        }
    }

    fn on_deadline(&mut self) -> Option<Input> {
        let (session, at) = self.fiber.receive_deadline()?;
        if self.core.time.now() < at {
            return None;
        }
        if let Some(input) = self.fiber.poll_receive() {
            return Some(input);
        }
        warn!(flow_id = %self.fiber.flow_id, session = %session, "Receive timed out");
        Some(Err(FlowError::ReceiveTimeout(session)))
    }

    /// Fold an inbound session message into the fiber. Returns false for
    /// duplicates and anything else that leaves the state unchanged.
    fn apply_inbound(&mut self, envelope: Envelope) -> bool {
        let flow_id = self.fiber.flow_id;
        let session = envelope.message.session();
        let Some(record) = self.fiber.sessions.get_mut(&session) else {
            warn!(flow_id = %flow_id, session = %session, "Message for a session this flow does not hold");
            return false;
        };
        if record.counterparty.name != envelope.from.name {
            warn!(
                flow_id = %flow_id,
                session = %session,
                from = %envelope.from,
                "Dropping message from a party that is not the session counterparty"
            );
            return false;
        }

        match envelope.message {
            SessionMessage::Confirm { .. } => {
                if record.state != SessionState::Initiating {
                    return false;
                }
                debug!(flow_id = %flow_id, session = %session, "Session confirmed");
                record.state = SessionState::Initiated;
                true
            }
            SessionMessage::Reject { reason, .. } => {
                if record.state != SessionState::Initiating {
                    return false;
                }
                warn!(flow_id = %flow_id, session = %session, reason = %reason, "Session rejected");
                record.state = SessionState::Rejected(reason);
                true
            }
            SessionMessage::Data { seq, payload, .. } => {
                if seq < record.next_recv_seq {
                    debug!(flow_id = %flow_id, session = %session, seq, "Dropping duplicate data");
                    return false;
                }
                record.next_recv_seq = seq + 1;
                record.inbound.push_back(payload);
                true
            }
            SessionMessage::End { seq, error, .. } => {
                if seq < record.next_recv_seq || record.remote_end.is_some() {
                    return false;
                }
                record.next_recv_seq = seq + 1;
                record.remote_end = Some(error);
                true
            }
            SessionMessage::Init { .. } => false,
        }
    }

    fn dispatch_external(&self, request: ExternalRequest) {
        let service = self.core.services.get(&request.service).cloned();
        let events = self.events.clone();
        debug!(flow_id = %self.fiber.flow_id, service = %request.service, "Calling external service");
        tokio::spawn(async move {
            let result = match service {
                Some(service) => service.execute(request.payload).await,
                None => Err(format!("no service registered as {}", request.service)),
            };
            let _ = events.send(FlowEvent::ExternalDone(result));
        });
    }
}
