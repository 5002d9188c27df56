//! Shared fixtures for the integration scenarios.

use std::sync::Arc;
use std::time::Duration;

use lf_02_uniqueness::CommitRequest;
use lf_03_raft_log::{
    InMemoryRaftTransport, RaftConfig, RaftDependencies, RaftReplica, RaftTransport,
    RaftUniquenessDependencies, RaftUniquenessProvider, ReplicaId,
};
use node_runtime::container::identity_key;
use node_runtime::NodeConfig;
use shared_crypto::Ed25519KeyPair;
use shared_types::{InMemoryKVStore, Party, SecureHash, StateRef, SystemTimeSource};
use tokio::task::JoinHandle;

/// A party and its identity key.
pub fn identity(name: &str) -> (Party, Arc<Ed25519KeyPair>) {
    let key = Arc::new(identity_key(name));
    (Party::new(name, *key.public_key().as_bytes()), key)
}

/// Output `index` of a fixed issuance transaction.
pub fn state(index: u32) -> StateRef {
    StateRef::new(SecureHash::sha256(b"integration/issue"), index)
}

pub fn request(
    caller: &(Party, Arc<Ed25519KeyPair>),
    notary: &Party,
    tx: &str,
    states: Vec<StateRef>,
) -> CommitRequest {
    CommitRequest::signed(
        caller.0.clone(),
        &caller.1,
        SecureHash::sha256(tx.as_bytes()),
        states,
        vec![],
        None,
        notary.clone(),
    )
}

/// Timings short enough for tests, with room for elections under load.
pub fn fast_raft_config() -> RaftConfig {
    RaftConfig {
        election_timeout_min_ms: 60,
        election_timeout_max_ms: 120,
        heartbeat_interval_ms: 15,
        rpc_timeout_ms: 30,
        commit_timeout_ms: 400,
        max_entries_per_append: 16,
        max_submit_attempts: 30,
        retry_backoff_ms: 20,
    }
}

pub fn fast_node_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.raft = fast_raft_config();
    config
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Replicas over in-memory stores, each with its own uniqueness provider.
pub struct ReplicaCluster {
    pub notary: Party,
    pub transport: Arc<InMemoryRaftTransport>,
    pub replicas: Vec<Arc<RaftReplica<InMemoryKVStore>>>,
    pub providers: Vec<Arc<RaftUniquenessProvider<InMemoryKVStore>>>,
    timers: Vec<JoinHandle<()>>,
}

impl ReplicaCluster {
    pub fn start(size: usize) -> Self {
        let (notary, signer) = identity("Notary");
        let transport = Arc::new(InMemoryRaftTransport::new());
        let ids: Vec<ReplicaId> = (0..size).map(|i| ReplicaId::new(format!("r{i}"))).collect();

        let mut replicas = Vec::new();
        let mut providers = Vec::new();
        for id in &ids {
            let replica = RaftReplica::open(RaftDependencies {
                id: id.clone(),
                peers: ids.iter().filter(|p| *p != id).cloned().collect(),
                config: fast_raft_config(),
                store: InMemoryKVStore::new(),
                transport: transport.clone() as Arc<dyn RaftTransport>,
                time_source: Arc::new(SystemTimeSource),
            })
            .unwrap();
            transport.register(&replica);
            providers.push(Arc::new(RaftUniquenessProvider::new(
                RaftUniquenessDependencies {
                    replica: replica.clone(),
                    signer: signer.clone(),
                    config: fast_raft_config(),
                },
            )));
            replicas.push(replica);
        }
        let timers = replicas.iter().map(|r| r.start()).collect();

        Self {
            notary,
            transport,
            replicas,
            providers,
            timers,
        }
    }

    /// Index of the reachable leader, if there is exactly one.
    pub fn leader(&self) -> Option<usize> {
        let leaders: Vec<usize> = self
            .replicas
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_leader() && !self.transport.is_down(r.id()))
            .map(|(i, _)| i)
            .collect();
        match leaders.as_slice() {
            [one] => Some(*one),
            _ => None,
        }
    }

    pub async fn wait_for_leader(&self) -> usize {
        wait_until("a leader", || self.leader().is_some()).await;
        self.leader().unwrap()
    }

    /// Every replica holds the same log and has applied all of it.
    pub fn converged(&self) -> bool {
        let first = self.replicas[0].log();
        self.replicas.iter().all(|r| {
            r.log() == first && r.last_applied() == first.len() as u64
        })
    }

    pub async fn shutdown(self) {
        for replica in &self.replicas {
            replica.shutdown();
        }
        for timer in self.timers {
            let _ = timer.await;
        }
    }
}
