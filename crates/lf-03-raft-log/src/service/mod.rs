//! Raft replica
//!
//! One member of the notary cluster. The replica elects a leader, replicates
//! commit commands and applies committed entries in index order to a
//! [`CommitLog`]. The commit log is rebuilt from the replicated log on
//! start, so only term, vote, log and commit index are durable.
//!
//! All state sits behind one `parking_lot::Mutex` that is never held across
//! an `.await`: each RPC round builds its messages under the lock, releases
//! it, awaits the transport, then re-locks to fold the responses in.

mod provider;

pub use provider::{RaftUniquenessDependencies, RaftUniquenessProvider};

use crate::domain::{
    AppendEntries, AppendResponse, EntryPayload, HardState, LogEntry, PersistentState, RaftConfig,
    RaftError, ReplicaId, RequestVote, Role, VoteResponse,
};
use crate::metrics;
use crate::ports::{RaftHandler, RaftTransport};
use async_trait::async_trait;
use futures::future::join_all;
use lf_02_uniqueness::{CommitCommand, CommitDecision, CommitLog, CommitRequest, RequestLogEntry};
use parking_lot::Mutex;
use shared_types::{InMemoryKVStore, KeyValueStore, SecureHash, StateRef, TimeSource};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

type Waiter = oneshot::Sender<Result<CommitDecision, RaftError>>;

/// Dependencies for [`RaftReplica`]
pub struct RaftDependencies<S> {
    pub id: ReplicaId,
    /// Every other member of the cluster.
    pub peers: Vec<ReplicaId>,
    pub config: RaftConfig,
    /// Durable term, vote, log and commit index.
    pub store: S,
    pub transport: Arc<dyn RaftTransport>,
    /// Leader clock used to stamp commands.
    pub time_source: Arc<dyn TimeSource>,
}

struct ReplicaState<S: KeyValueStore> {
    persistent: PersistentState<S>,
    machine: CommitLog<InMemoryKVStore>,
    role: Role,
    leader: Option<ReplicaId>,
    last_applied: u64,
    next_index: HashMap<ReplicaId, u64>,
    match_index: HashMap<ReplicaId, u64>,
    election_deadline: Instant,
    heartbeat_due: Instant,
    /// Proposals made by this replica as leader, by log index.
    waiters: HashMap<u64, Waiter>,
}

impl<S: KeyValueStore> ReplicaState<S> {
    fn fail_waiters(&mut self, error: RaftError) {
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    fn become_follower(
        &mut self,
        term: u64,
        leader: Option<ReplicaId>,
        election_timeout: Duration,
    ) -> Result<(), RaftError> {
        if term > self.persistent.current_term() {
            self.persistent.set_hard_state(HardState {
                current_term: term,
                voted_for: None,
            })?;
        }
        if self.role != Role::Follower {
            self.role = Role::Follower;
            self.fail_waiters(RaftError::NotLeader {
                leader: leader.clone(),
            });
        }
        self.leader = leader;
        self.election_deadline = Instant::now() + election_timeout;
        Ok(())
    }

    /// Commit the highest current-term index a quorum has stored.
    fn advance_commit(&mut self, quorum: usize) -> Result<(), RaftError> {
        let term = self.persistent.current_term();
        let mut index = self.persistent.last_index();
        while index > self.persistent.commit_index() {
            if self.persistent.term_at(index) == Some(term) {
                let stored = 1 + self.match_index.values().filter(|m| **m >= index).count();
                if stored >= quorum {
                    self.persistent.set_commit_index(index)?;
                    break;
                }
            }
            index -= 1;
        }
        self.apply_committed();
        Ok(())
    }

    /// Apply committed entries in order, each exactly once.
    fn apply_committed(&mut self) {
        let mut applied = 0;
        while self.last_applied < self.persistent.commit_index() {
            let index = self.last_applied + 1;
            let payload = match self.persistent.entry(index) {
                Some(entry) => entry.payload.clone(),
                None => break,
            };
            if let EntryPayload::Commit(command) = payload {
                let result = self.machine.apply(&command).map_err(RaftError::from);
                if let Err(e) = &result {
                    error!(index, error = %e, "Failed to apply committed entry");
                }
                if let Some(waiter) = self.waiters.remove(&index) {
                    let _ = waiter.send(result);
                }
            }
            self.last_applied = index;
            applied += 1;
        }
        if applied > 0 {
            metrics::record_applied(applied);
        }
    }
}

pub struct RaftReplica<S: KeyValueStore> {
    id: ReplicaId,
    peers: Vec<ReplicaId>,
    config: RaftConfig,
    transport: Arc<dyn RaftTransport>,
    time_source: Arc<dyn TimeSource>,
    state: Mutex<ReplicaState<S>>,
    shutdown: watch::Sender<bool>,
}

impl<S: KeyValueStore + 'static> RaftReplica<S> {
    /// Open the replica over its store and replay committed entries.
    pub fn open(deps: RaftDependencies<S>) -> Result<Arc<Self>, RaftError> {
        deps.config.validate()?;
        let persistent = PersistentState::open(deps.store)?;
        let machine = CommitLog::open(InMemoryKVStore::new())?;
        let now = Instant::now();
        let mut state = ReplicaState {
            persistent,
            machine,
            role: Role::Follower,
            leader: None,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            election_deadline: now + deps.config.election_timeout(),
            heartbeat_due: now,
            waiters: HashMap::new(),
        };
        state.apply_committed();
        info!(
            replica = %deps.id,
            term = state.persistent.current_term(),
            log_len = state.persistent.last_index(),
            commit_index = state.persistent.commit_index(),
            "Replica opened"
        );

        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            id: deps.id,
            peers: deps.peers,
            config: deps.config,
            transport: deps.transport,
            time_source: deps.time_source,
            state: Mutex::new(state),
            shutdown,
        }))
    }

    /// Spawn the timer loop driving elections and heartbeats.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let replica = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let tick = (self.config.heartbeat() / 2).max(Duration::from_millis(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(tick) => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                replica.tick().await;
            }
            debug!(replica = %replica.id, "Replica timer loop stopped");
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.state.lock().fail_waiters(RaftError::Shutdown);
    }

    pub fn id(&self) -> &ReplicaId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    pub fn current_term(&self) -> u64 {
        self.state.lock().persistent.current_term()
    }

    /// The leader this replica last heard from, itself included.
    pub fn leader(&self) -> Option<ReplicaId> {
        self.state.lock().leader.clone()
    }

    pub fn commit_index(&self) -> u64 {
        self.state.lock().persistent.commit_index()
    }

    pub fn last_applied(&self) -> u64 {
        self.state.lock().last_applied
    }

    pub fn log(&self) -> Vec<LogEntry> {
        self.state.lock().persistent.entries().to_vec()
    }

    /// Request log of the applied commit log.
    pub fn request_log(&self) -> Result<Vec<RequestLogEntry>, RaftError> {
        Ok(self.state.lock().machine.request_log()?)
    }

    /// The transaction the applied commit log records as consuming `state`.
    pub fn consumed_by(&self, state: &StateRef) -> Result<Option<SecureHash>, RaftError> {
        Ok(self
            .state
            .lock()
            .machine
            .consumed_by(state)?
            .map(|(_, tx_id)| tx_id))
    }

    /// Order a command through the cluster.
    ///
    /// The leader proposes it; a follower forwards it to the leader it knows.
    pub async fn submit(&self, request: CommitRequest) -> Result<CommitDecision, RaftError> {
        let leader = {
            let state = self.state.lock();
            match state.role {
                Role::Leader => None,
                _ => Some(state.leader.clone()),
            }
        };
        match leader {
            None => self.propose(request).await,
            Some(Some(leader)) => self.transport.submit(&self.id, &leader, request).await,
            Some(None) => Err(RaftError::NotLeader { leader: None }),
        }
    }

    fn quorum(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn tick(&self) {
        let now = Instant::now();
        let (elect, heartbeat) = {
            let state = self.state.lock();
            match state.role {
                Role::Leader => (false, now >= state.heartbeat_due),
                Role::Follower | Role::Candidate => (now >= state.election_deadline, false),
            }
        };
        if elect {
            if let Err(e) = self.run_election().await {
                error!(replica = %self.id, error = %e, "Election failed");
            }
        } else if heartbeat {
            self.broadcast_append().await;
        }
    }

    async fn run_election(&self) -> Result<(), RaftError> {
        let request = {
            let mut state = self.state.lock();
            let term = state.persistent.current_term() + 1;
            state.persistent.set_hard_state(HardState {
                current_term: term,
                voted_for: Some(self.id.clone()),
            })?;
            state.role = Role::Candidate;
            state.leader = None;
            state.fail_waiters(RaftError::NotLeader { leader: None });
            state.election_deadline = Instant::now() + self.config.election_timeout();
            RequestVote {
                term,
                candidate: self.id.clone(),
                last_log_index: state.persistent.last_index(),
                last_log_term: state.persistent.last_term(),
            }
        };
        let term = request.term;
        debug!(replica = %self.id, term, "Starting election");
        metrics::record_election();

        let responses = join_all(self.peers.iter().map(|peer| {
            let request = request.clone();
            async move {
                match timeout(
                    self.config.rpc_timeout(),
                    self.transport.request_vote(&self.id, peer, request),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RaftError::Unreachable(peer.clone())),
                }
            }
        }))
        .await;

        let mut votes = 1;
        for response in responses.into_iter().flatten() {
            if response.term > term {
                let mut state = self.state.lock();
                state.become_follower(response.term, None, self.config.election_timeout())?;
                return Ok(());
            }
            if response.granted {
                votes += 1;
            }
        }
        if votes >= self.quorum() && self.become_leader(term)? {
            self.broadcast_append().await;
        }
        Ok(())
    }

    /// Take leadership for `term` if still a candidate in it.
    fn become_leader(&self, term: u64) -> Result<bool, RaftError> {
        let mut state = self.state.lock();
        if state.role != Role::Candidate || state.persistent.current_term() != term {
            return Ok(false);
        }
        state.role = Role::Leader;
        state.leader = Some(self.id.clone());
        let next = state.persistent.last_index() + 1;
        state.next_index = self.peers.iter().map(|p| (p.clone(), next)).collect();
        state.match_index = self.peers.iter().map(|p| (p.clone(), 0)).collect();
        state.persistent.append(LogEntry {
            term,
            index: next,
            payload: EntryPayload::Noop,
        })?;
        state.advance_commit(self.quorum())?;
        state.heartbeat_due = Instant::now();
        info!(replica = %self.id, term, "Elected leader");
        metrics::record_leadership();
        Ok(true)
    }

    async fn broadcast_append(&self) {
        {
            let mut state = self.state.lock();
            if state.role != Role::Leader {
                return;
            }
            state.heartbeat_due = Instant::now() + self.config.heartbeat();
        }
        join_all(self.peers.iter().map(|peer| self.replicate_to(peer))).await;
    }

    async fn replicate_to(&self, peer: &ReplicaId) {
        let request = {
            let state = self.state.lock();
            if state.role != Role::Leader {
                return;
            }
            let next = state
                .next_index
                .get(peer)
                .copied()
                .unwrap_or(state.persistent.last_index() + 1);
            let prev_log_index = next - 1;
            AppendEntries {
                term: state.persistent.current_term(),
                leader: self.id.clone(),
                prev_log_index,
                prev_log_term: state.persistent.term_at(prev_log_index).unwrap_or(0),
                entries: state
                    .persistent
                    .entries_from(next, self.config.max_entries_per_append),
                leader_commit: state.persistent.commit_index(),
            }
        };
        let term = request.term;
        let sent_next = request.prev_log_index + 1;

        let response = match timeout(
            self.config.rpc_timeout(),
            self.transport.append_entries(&self.id, peer, request),
        )
        .await
        {
            Ok(Ok(response)) => response,
            _ => return,
        };

        let mut state = self.state.lock();
        let result = if response.term > state.persistent.current_term() {
            info!(replica = %self.id, term = response.term, "Stepping down: newer term seen");
            state.become_follower(response.term, None, self.config.election_timeout())
        } else if state.role != Role::Leader || state.persistent.current_term() != term {
            Ok(())
        } else if response.success {
            let matched = state.match_index.entry(peer.clone()).or_insert(0);
            *matched = (*matched).max(response.match_index);
            let next = *matched + 1;
            state.next_index.insert(peer.clone(), next);
            state.advance_commit(self.quorum())
        } else {
            let next = (response.match_index + 1).min(sent_next).max(1);
            state.next_index.insert(peer.clone(), next);
            Ok(())
        };
        if let Err(e) = result {
            error!(replica = %self.id, peer = %peer, error = %e, "Failed to record append response");
        }
    }

    async fn propose(&self, request: CommitRequest) -> Result<CommitDecision, RaftError> {
        if self.is_shut_down() {
            return Err(RaftError::Shutdown);
        }
        let (index, receiver) = {
            let mut state = self.state.lock();
            if state.role != Role::Leader {
                return Err(RaftError::NotLeader {
                    leader: state.leader.clone(),
                });
            }
            let index = state.persistent.last_index() + 1;
            let term = state.persistent.current_term();
            let command = CommitCommand {
                request,
                submitted_at: self.time_source.now(),
            };
            state.persistent.append(LogEntry {
                term,
                index,
                payload: EntryPayload::Commit(command),
            })?;
            let (sender, receiver) = oneshot::channel();
            state.waiters.insert(index, sender);
            state.advance_commit(self.quorum())?;
            (index, receiver)
        };
        debug!(replica = %self.id, index, "Proposed command");

        self.broadcast_append().await;

        match timeout(self.config.commit_timeout(), receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RaftError::NotLeader {
                leader: self.leader(),
            }),
            Err(_) => {
                self.state.lock().waiters.remove(&index);
                warn!(replica = %self.id, index, "Command not committed in time");
                Err(RaftError::NoQuorum)
            }
        }
    }

    fn on_request_vote(&self, request: RequestVote) -> Result<VoteResponse, RaftError> {
        let mut state = self.state.lock();
        if request.term > state.persistent.current_term() {
            state.become_follower(request.term, None, self.config.election_timeout())?;
        }
        let term = state.persistent.current_term();
        if request.term < term {
            return Ok(VoteResponse {
                term,
                granted: false,
            });
        }

        let up_to_date = (request.last_log_term, request.last_log_index)
            >= (state.persistent.last_term(), state.persistent.last_index());
        let free = match &state.persistent.hard_state().voted_for {
            None => true,
            Some(voted) => *voted == request.candidate,
        };
        let granted = up_to_date && free;
        if granted {
            state.persistent.set_hard_state(HardState {
                current_term: term,
                voted_for: Some(request.candidate.clone()),
            })?;
            state.election_deadline = Instant::now() + self.config.election_timeout();
            debug!(replica = %self.id, term, candidate = %request.candidate, "Vote granted");
        }
        Ok(VoteResponse { term, granted })
    }

    fn on_append_entries(&self, request: AppendEntries) -> Result<AppendResponse, RaftError> {
        let mut state = self.state.lock();
        let term = state.persistent.current_term();
        if request.term < term {
            return Ok(AppendResponse {
                term,
                success: false,
                match_index: 0,
            });
        }
        state.become_follower(
            request.term,
            Some(request.leader.clone()),
            self.config.election_timeout(),
        )?;
        let term = request.term;

        if state.persistent.term_at(request.prev_log_index) != Some(request.prev_log_term) {
            let hint = state
                .persistent
                .last_index()
                .min(request.prev_log_index.saturating_sub(1));
            return Ok(AppendResponse {
                term,
                success: false,
                match_index: hint,
            });
        }

        let matched = request.prev_log_index + request.entries.len() as u64;
        for (offset, entry) in request.entries.iter().enumerate() {
            if state.persistent.term_at(entry.index) != Some(entry.term) {
                if entry.index <= state.persistent.last_index() {
                    debug!(replica = %self.id, from = entry.index, "Truncating conflicting entries");
                }
                let rest = request.entries[offset..].to_vec();
                state.persistent.replace_from(entry.index, rest)?;
                break;
            }
        }

        if request.leader_commit > state.persistent.commit_index() {
            let commit = request.leader_commit.min(matched);
            state.persistent.set_commit_index(commit)?;
            state.apply_committed();
        }
        Ok(AppendResponse {
            term,
            success: true,
            match_index: matched,
        })
    }
}

#[async_trait]
impl<S: KeyValueStore + 'static> RaftHandler for RaftReplica<S> {
    fn replica_id(&self) -> &ReplicaId {
        &self.id
    }

    async fn handle_request_vote(&self, request: RequestVote) -> VoteResponse {
        let term = request.term;
        self.on_request_vote(request).unwrap_or_else(|e| {
            error!(replica = %self.id, error = %e, "Failed to persist vote");
            VoteResponse {
                term,
                granted: false,
            }
        })
    }

    async fn handle_append_entries(&self, request: AppendEntries) -> AppendResponse {
        let term = request.term;
        self.on_append_entries(request).unwrap_or_else(|e| {
            error!(replica = %self.id, error = %e, "Failed to persist entries");
            AppendResponse {
                term,
                success: false,
                match_index: 0,
            }
        })
    }

    async fn handle_submit(&self, request: CommitRequest) -> Result<CommitDecision, RaftError> {
        self.propose(request).await
    }
}
