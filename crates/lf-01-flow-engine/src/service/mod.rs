//! # State Machine Manager
//!
//! Owns every live flow on the node.
//!
//! ## Responsibilities
//!
//! - Start local flows and accept inbound sessions by running the registered
//!   responder.
//! - Route inbound session messages to the owning flow.
//! - Recover after a restart: re-send committed outboxes, then resume every
//!   checkpointed flow. Checkpoints that cannot be restored are quarantined.
//!
//! ## Delivery Guarantees
//!
//! An inbound delivery is acknowledged only once its effect is in a durable
//! checkpoint (or it was a duplicate). Outbound messages are sent only after
//! the step that produced them is committed, and a crash between the commit
//! and the send is repaired by re-sending the stored outbox on recovery.
//! Receivers drop duplicates by session sequence number.

mod fiber;
mod runner;


use crate::domain::{
    FlowEngineConfig, FlowError, FlowOutcome, FlowStatus, FlowType, OutboundMessage,
    ProgressEvent, SessionRecord, StepCommit,
};
use crate::handle::FlowHandle;
use crate::ports::{CheckpointStore, ExternalService, MessagingService};
use crate::registry::FlowRegistry;
use fiber::Fiber;
use parking_lot::Mutex;
use runner::{FlowEvent, FlowRunner};
use serde::de::DeserializeOwned;
use shared_bus::{BusError, Envelope, Inbox, SessionMessage, SESSION_TOPIC};
use shared_types::{FlowId, Party, SessionId, TimeSource};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

/// Buffered progress events per flow before slow readers start lagging.
const PROGRESS_BUFFER: usize = 64;

/// Dependencies for [`StateMachineManager`]
pub struct FlowEngineDependencies {
    pub config: FlowEngineConfig,
    pub registry: FlowRegistry,
    pub store: Arc<dyn CheckpointStore>,
    pub messaging: Arc<dyn MessagingService>,
    pub inbox: Inbox,
    /// Services flows reach through `Suspend::External`, by name.
    pub services: HashMap<String, Arc<dyn ExternalService>>,
    pub time_source: Arc<dyn TimeSource>,
}

/// What recovery found on start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Flows resumed from a checkpoint.
    pub recovered: usize,
    /// Flows whose checkpoint could not be restored.
    pub quarantined: usize,
    /// Committed outbound messages sent again.
    pub resent: usize,
}

struct FlowSlot {
    events: mpsc::UnboundedSender<FlowEvent>,
    outcome: watch::Receiver<Option<FlowOutcome>>,
    progress: broadcast::Sender<ProgressEvent>,
    status: FlowStatus,
}

/// State shared by the manager, the inbound pump and every runner.
pub(crate) struct EngineCore {
    pub me: Party,
    pub config: FlowEngineConfig,
    pub registry: FlowRegistry,
    pub store: Arc<dyn CheckpointStore>,
    pub messaging: Arc<dyn MessagingService>,
    pub services: HashMap<String, Arc<dyn ExternalService>>,
    pub time: Arc<dyn TimeSource>,
    pub workers: Arc<Semaphore>,
    flows: Mutex<HashMap<FlowId, FlowSlot>>,
    sessions: Mutex<HashMap<SessionId, FlowId>>,
    quarantined: Mutex<BTreeMap<FlowId, String>>,
    shutdown: watch::Sender<bool>,
}

impl EngineCore {
    pub fn set_status(&self, flow_id: FlowId, status: FlowStatus) {
        if let Some(slot) = self.flows.lock().get_mut(&flow_id) {
            slot.status = status;
        }
    }

    pub fn register_sessions(&self, flow_id: FlowId, sessions: impl IntoIterator<Item = SessionId>) {
        let mut map = self.sessions.lock();
        for session in sessions {
            map.insert(session, flow_id);
        }
    }

    pub fn remove_flow(&self, flow_id: FlowId, sessions: impl IntoIterator<Item = SessionId>) {
        let mut map = self.sessions.lock();
        for session in sessions {
            map.remove(&session);
        }
        drop(map);
        self.flows.lock().remove(&flow_id);
    }

    /// Send a committed outbox, then mark it sent.
    ///
    /// Messages to parties the network has never heard of are dropped with a
    /// warning. A disconnected endpoint aborts the flush and leaves the outbox
    /// for the next recovery.
    pub async fn flush_outbox(
        &self,
        flow_id: FlowId,
        seq: u64,
        outbox: Vec<OutboundMessage>,
    ) -> Result<usize, BusError> {
        if outbox.is_empty() {
            return Ok(0);
        }
        let mut sent = 0;
        for OutboundMessage { to, message } in outbox {
            let kind = message.kind();
            match self.messaging.send(&to, SESSION_TOPIC, message).await {
                Ok(_) => sent += 1,
                Err(BusError::UnknownParty(name)) => {
                    warn!(flow_id = %flow_id, to = %name, kind, "Dropping message to unknown party");
                }
                Err(e) => {
                    warn!(flow_id = %flow_id, error = %e, "Outbox flush interrupted");
                    return Err(e);
                }
            }
        }
        if let Err(e) = self.store.clear_outbox(flow_id, seq) {
            error!(flow_id = %flow_id, seq, error = %e, "Failed to mark outbox as sent");
        }
        Ok(sent)
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Start a runner for `fiber`. The slot is registered before the task
/// starts, so events routed to the flow queue up in its mailbox.
fn spawn_flow(
    core: &Arc<EngineCore>,
    fiber: Fiber,
    recovering: bool,
) -> (watch::Receiver<Option<FlowOutcome>>, broadcast::Receiver<ProgressEvent>) {
    let flow_id = fiber.flow_id;
    let (events, mailbox) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = watch::channel(None);
    let (progress_tx, progress_rx) = broadcast::channel(PROGRESS_BUFFER);

    core.register_sessions(flow_id, fiber.sessions.keys().copied());
    core.flows.lock().insert(
        flow_id,
        FlowSlot {
            events: events.clone(),
            outcome: outcome_rx.clone(),
            progress: progress_tx.clone(),
            status: if recovering {
                FlowStatus::Recovering
            } else {
                FlowStatus::Runnable
            },
        },
    );

    let runner = FlowRunner::new(
        core.clone(),
        fiber,
        mailbox,
        events,
        outcome_tx,
        progress_tx,
        core.shutdown.subscribe(),
    );
    tokio::spawn(runner.run(recovering));
    (outcome_rx, progress_rx)
}

/// Stops the engine from outside: every runner and the inbound pump return
/// at their next suspension point without writing anything further.
#[derive(Clone)]
pub struct ShutdownHandle {
    core: Arc<EngineCore>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.core.shutdown.send_replace(true);
    }
}

/// State Machine Manager
///
/// Runs flows to completion across restarts.
pub struct StateMachineManager {
    core: Arc<EngineCore>,
    inbox: Mutex<Option<Inbox>>,
}

impl StateMachineManager {
    pub fn new(deps: FlowEngineDependencies) -> Self {
        let workers = deps.config.worker_count.max(1);
        let (shutdown, _) = watch::channel(false);
        Self {
            core: Arc::new(EngineCore {
                me: deps.messaging.me().clone(),
                config: deps.config,
                registry: deps.registry,
                store: deps.store,
                messaging: deps.messaging,
                services: deps.services,
                time: deps.time_source,
                workers: Arc::new(Semaphore::new(workers)),
                flows: Mutex::new(HashMap::new()),
                sessions: Mutex::new(HashMap::new()),
                quarantined: Mutex::new(BTreeMap::new()),
                shutdown,
            }),
            inbox: Mutex::new(Some(deps.inbox)),
        }
    }

    pub fn our_identity(&self) -> &Party {
        &self.core.me
    }

    /// Recover persisted flows and begin processing inbound messages.
    pub async fn start(&self) -> Result<RecoveryReport, FlowError> {
        let Some(inbox) = self.inbox.lock().take() else {
            return Err(FlowError::AlreadyStarted);
        };
        let core = &self.core;
        let mut report = RecoveryReport::default();

        for (flow_id, outbox) in core.store.pending_outboxes()? {
            debug!(flow_id = %flow_id, seq = outbox.seq, "Re-sending committed outbox");
            match core.flush_outbox(flow_id, outbox.seq, outbox.messages).await {
                Ok(sent) => report.resent += sent,
                Err(e) => {
                    warn!(error = %e, "Recovery stopped: messaging unavailable");
                    return Err(FlowError::EngineStopped);
                }
            }
        }

        for (flow_id, checkpoint) in core.store.checkpoints()? {
            let restored = checkpoint
                .map_err(FlowError::from)
                .and_then(|cp| Fiber::restore(cp, &core.registry));
            match restored {
                Ok(fiber) => {
                    debug!(flow_id = %flow_id, protocol = fiber.root_protocol(), "Recovering flow");
                    spawn_flow(core, fiber, true);
                    report.recovered += 1;
                }
                Err(e) => {
                    error!(flow_id = %flow_id, error = %e, "Quarantining flow with unrestorable checkpoint");
                    core.quarantined.lock().insert(flow_id, e.to_string());
                    crate::metrics::record_quarantined();
                    report.quarantined += 1;
                }
            }
        }

        tokio::spawn(pump(core.clone(), inbox));
        info!(
            party = %core.me,
            recovered = report.recovered,
            quarantined = report.quarantined,
            resent = report.resent,
            "Flow engine started"
        );
        Ok(report)
    }

    /// Start `logic` as a new top-level flow.
    ///
    /// Returns once the flow's first checkpoint is durable, so the flow runs
    /// to completion even if the node restarts immediately afterwards.
    pub async fn start_flow<F: FlowType>(&self, logic: F) -> Result<FlowHandle<F::Output>, FlowError> {
        let core = &self.core;
        if core.is_stopped() {
            return Err(FlowError::EngineStopped);
        }
        if !core.registry.is_registered(F::PROTOCOL, F::VERSION) {
            return Err(FlowError::UnknownProtocol {
                name: F::PROTOCOL.to_string(),
                version: F::VERSION,
            });
        }

        let flow_id = FlowId::new();
        let mut fiber = Fiber::new(flow_id, Box::new(logic));
        let checkpoint = fiber.checkpoint()?;
        core.store.commit(StepCommit {
            flow_id,
            seq: checkpoint.seq,
            checkpoint: Some(checkpoint),
            ..StepCommit::default()
        })?;
        crate::metrics::record_flow_started();
        info!(flow_id = %flow_id, protocol = F::PROTOCOL, "Flow started");

        let (outcome, progress) = spawn_flow(core, fiber, false);
        Ok(FlowHandle::new(flow_id, outcome, Some(progress)))
    }

    /// Handle to a flow that is running, recovered or already finished.
    pub fn handle_for<T: DeserializeOwned>(&self, flow_id: FlowId) -> Result<FlowHandle<T>, FlowError> {
        if let Some(slot) = self.core.flows.lock().get(&flow_id) {
            return Ok(FlowHandle::new(
                flow_id,
                slot.outcome.clone(),
                Some(slot.progress.subscribe()),
            ));
        }
        if self.core.quarantined.lock().contains_key(&flow_id) {
            return Err(FlowError::Quarantined(flow_id));
        }
        match self.core.store.terminal(flow_id)? {
            Some(record) => {
                let (_, outcome) = watch::channel(Some(record.outcome));
                Ok(FlowHandle::new(flow_id, outcome, None))
            }
            None => Err(FlowError::UnknownFlow(flow_id)),
        }
    }

    /// Ask a live flow to stop. It terminates with [`FlowError::Killed`] at
    /// its next suspension point and its counterparties are told.
    pub fn kill_flow(&self, flow_id: FlowId) -> bool {
        match self.core.flows.lock().get(&flow_id) {
            Some(slot) => slot.events.send(FlowEvent::Kill).is_ok(),
            None => false,
        }
    }

    pub fn flow_status(&self, flow_id: FlowId) -> Option<FlowStatus> {
        if let Some(slot) = self.core.flows.lock().get(&flow_id) {
            return Some(slot.status);
        }
        if self.core.quarantined.lock().contains_key(&flow_id) {
            return Some(FlowStatus::Fatal);
        }
        let record = self.core.store.terminal(flow_id).ok().flatten()?;
        Some(match record.outcome {
            Ok(_) => FlowStatus::Completed,
            Err(FlowError::Killed) => FlowStatus::Killed,
            Err(_) => FlowStatus::Failed,
        })
    }

    pub fn live_flows(&self) -> Vec<FlowId> {
        self.core.flows.lock().keys().copied().collect()
    }

    /// Quarantined flows and the reason each could not be restored.
    pub fn quarantined_flows(&self) -> BTreeMap<FlowId, String> {
        self.core.quarantined.lock().clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            core: self.core.clone(),
        }
    }

    /// Stop all flows. Their checkpoints stay in the store for the next start.
    pub fn shutdown(&self) {
        info!(party = %self.core.me, "Flow engine shutting down");
        self.core.shutdown.send_replace(true);
    }
}

// =============================================================================
// INBOUND
// =============================================================================

async fn pump(core: Arc<EngineCore>, mut inbox: Inbox) {
    let mut shutdown = core.shutdown.subscribe();
    loop {
        if core.is_stopped() {
            return;
        }
        let envelope = tokio::select! {
            _ = shutdown.changed() => return,
            envelope = inbox.recv() => match envelope {
                Some(envelope) => envelope,
                None => return,
            },
        };
        dispatch(&core, envelope).await;
    }
}

async fn dispatch(core: &Arc<EngineCore>, envelope: Envelope) {
    if envelope.topic != SESSION_TOPIC {
        debug!(topic = %envelope.topic, from = %envelope.from, "Ignoring message on unknown topic");
        core.messaging.acknowledge(envelope.delivery_id);
        return;
    }

    if let SessionMessage::Init {
        session,
        protocol,
        version,
    } = &envelope.message
    {
        let (session, protocol, version) = (*session, protocol.clone(), *version);
        accept_session(core, envelope, session, &protocol, version).await;
        return;
    }

    let session = envelope.message.session();
    let delivery_id = envelope.delivery_id;
    let owner = core.sessions.lock().get(&session).copied();
    if let Some(flow_id) = owner {
        let sent = core
            .flows
            .lock()
            .get(&flow_id)
            .map(|slot| slot.events.send(FlowEvent::Inbound(envelope)).is_ok());
        if sent == Some(true) {
            return;
        }
    }

    // Not routable to a live flow.
    match core.store.session_owner(session) {
        Ok(Some(flow_id)) => match core.store.terminal(flow_id) {
            Ok(Some(_)) => {
                debug!(session = %session, flow_id = %flow_id, "Dropping message for finished flow");
                core.messaging.acknowledge(delivery_id);
            }
            _ => {
                debug!(session = %session, flow_id = %flow_id, "Owner not running, leaving message for redelivery");
            }
        },
        Ok(None) => {
            warn!(session = %session, "Dropping message for unknown session");
            core.messaging.acknowledge(delivery_id);
        }
        Err(e) => {
            error!(session = %session, error = %e, "Session lookup failed");
        }
    }
}

async fn accept_session(
    core: &Arc<EngineCore>,
    envelope: Envelope,
    session: SessionId,
    protocol: &str,
    version: u32,
) {
    let from = envelope.from;
    let delivery_id = envelope.delivery_id;

    let known = core.sessions.lock().contains_key(&session);
    match core.store.session_owner(session) {
        Ok(owner) if known || owner.is_some() => {
            debug!(session = %session, "Ignoring duplicate session init");
            core.messaging.acknowledge(delivery_id);
            return;
        }
        Ok(_) => {}
        Err(e) => {
            error!(session = %session, error = %e, "Session lookup failed");
            return;
        }
    }

    let factory = match core.registry.responder(protocol, version) {
        Ok(factory) => factory,
        Err(reason) => {
            warn!(session = %session, from = %from, protocol, version, reason = %reason, "Rejecting session");
            let reject = SessionMessage::Reject { session, reason };
            match core.messaging.send(&from, SESSION_TOPIC, reject).await {
                Ok(_) | Err(BusError::UnknownParty(_)) => core.messaging.acknowledge(delivery_id),
                Err(e) => warn!(session = %session, error = %e, "Failed to send reject"),
            }
            return;
        }
    };

    let flow_id = FlowId::new();
    let logic = factory(session, from.clone());
    let responder = logic.protocol();
    let mut fiber = Fiber::new(flow_id, logic);
    fiber
        .sessions
        .insert(session, SessionRecord::accepted(from.clone()));
    let checkpoint = match fiber.checkpoint() {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            error!(session = %session, error = %e, "Cannot checkpoint responder");
            return;
        }
    };
    let seq = checkpoint.seq;
    let confirm = vec![OutboundMessage {
        to: from.clone(),
        message: SessionMessage::Confirm { session },
    }];
    let commit = StepCommit {
        flow_id,
        seq,
        checkpoint: Some(checkpoint),
        outbox: confirm.clone(),
        new_sessions: vec![session],
        ..StepCommit::default()
    };
    if let Err(e) = core.store.commit(commit) {
        error!(session = %session, error = %e, "Failed to persist accepted session");
        return;
    }
    crate::metrics::record_flow_started();
    info!(flow_id = %flow_id, session = %session, from = %from, protocol = responder, "Session accepted");

    // The pump is not dispatching while we wait here, so the confirm always
    // goes out ahead of anything the responder sends.
    if core.flush_outbox(flow_id, seq, confirm).await.is_ok() {
        core.messaging.acknowledge(delivery_id);
    }
    spawn_flow(core, fiber, false);
}
