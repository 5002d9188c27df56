//! # Node Container
//!
//! Assembles an in-process network from a [`NodeConfig`]: one flow engine
//! per party, and a notary whose flow engine commits through a cluster of
//! raft replicas.
//!
//! ## Initialization Order
//!
//! ```text
//! 1. Replicas: durable store, transport registration
//! 2. Notary:   gateway over the replicas, service flows, flow engine
//! 3. Parties:  client flows, flow engine
//! ```
//!
//! `start()` launches the replica timers first so an election is under way
//! before any flow asks for a commit.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lf_01_flow_engine::{
    ExternalService, FlowEngineDependencies, FlowError, FlowRegistry, KvCheckpointStore,
    RecoveryReport, StateMachineManager,
};
use lf_02_uniqueness::UniquenessProvider;
use lf_03_raft_log::{
    InMemoryRaftTransport, RaftDependencies, RaftError, RaftReplica, RaftTransport,
    RaftUniquenessDependencies, RaftUniquenessProvider, ReplicaId,
};
use lf_04_notary::{
    client_services, notarise, notary_services, register_client_flows, register_notary_service,
    NotaryClientError, TransactionVerifier,
};
use parking_lot::Mutex;
use shared_bus::InMemoryNetwork;
use shared_crypto::{DigitalSignature, Ed25519KeyPair};
use shared_types::{KVStoreError, LedgerTransaction, Party, SecureHash, SystemTimeSource};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::adapters::{ClusterGateway, NodeStore, StructuralVerifier};
use crate::container::config::{ConfigError, NodeConfig};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("storage: {0}")]
    Storage(#[from] KVStoreError),

    #[error("replica: {0}")]
    Raft(#[from] RaftError),

    #[error("flow engine: {0}")]
    Flow(#[from] FlowError),

    #[error("no replica became leader within {0:?}")]
    NoLeader(Duration),
}

/// Identity key derived from the party name, so restarts keep their keys.
pub fn identity_key(name: &str) -> Ed25519KeyPair {
    let seed = SecureHash::sha256(format!("ledger-flow/identity/{name}").as_bytes());
    Ed25519KeyPair::from_seed(*seed.as_bytes())
}

fn party_for(name: &str, key: &Ed25519KeyPair) -> Party {
    Party::new(name, *key.public_key().as_bytes())
}

fn flow_engine(
    config: &NodeConfig,
    network: &InMemoryNetwork,
    party: Party,
    registry: FlowRegistry,
    services: std::collections::HashMap<String, Arc<dyn ExternalService>>,
) -> Result<StateMachineManager, NodeError> {
    let store = NodeStore::open(&config.storage, &format!("{}/checkpoints", party.name))?;
    let (endpoint, inbox) = network.connect(party);
    Ok(StateMachineManager::new(FlowEngineDependencies {
        config: config.flow_engine.clone(),
        registry,
        store: Arc::new(KvCheckpointStore::new(store)),
        messaging: Arc::new(endpoint),
        inbox,
        services,
        time_source: Arc::new(SystemTimeSource),
    }))
}

/// A party able to run flows.
pub struct PartyNode {
    party: Party,
    engine: StateMachineManager,
}

impl PartyNode {
    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn engine(&self) -> &StateMachineManager {
        &self.engine
    }

    /// Notarise `transaction` with the notary it names.
    pub async fn notarise(
        &self,
        transaction: LedgerTransaction,
    ) -> Result<DigitalSignature, NotaryClientError> {
        notarise(&self.engine, transaction).await
    }
}

/// The notary identity and the replicas it commits through.
pub struct NotaryCluster {
    party: Party,
    engine: StateMachineManager,
    transport: Arc<InMemoryRaftTransport>,
    replicas: Vec<Arc<RaftReplica<NodeStore>>>,
}

impl NotaryCluster {
    fn assemble(config: &NodeConfig, network: &InMemoryNetwork) -> Result<Self, NodeError> {
        let signer = Arc::new(identity_key(&config.cluster.notary_name));
        let party = party_for(&config.cluster.notary_name, &signer);
        let transport = Arc::new(InMemoryRaftTransport::new());

        let ids: Vec<ReplicaId> = (0..config.cluster.replicas)
            .map(|i| ReplicaId::new(format!("{}-{i}", config.cluster.notary_name)))
            .collect();
        let mut replicas = Vec::with_capacity(ids.len());
        for id in &ids {
            let store = NodeStore::open(&config.storage, &format!("{id}/raft"))?;
            let replica = RaftReplica::open(RaftDependencies {
                id: id.clone(),
                peers: ids.iter().filter(|peer| *peer != id).cloned().collect(),
                config: config.raft.clone(),
                store,
                transport: transport.clone() as Arc<dyn RaftTransport>,
                time_source: Arc::new(SystemTimeSource),
            })?;
            transport.register(&replica);
            replicas.push(replica);
        }

        let members = replicas
            .iter()
            .map(|replica| {
                RaftUniquenessProvider::new(RaftUniquenessDependencies {
                    replica: replica.clone(),
                    signer: signer.clone(),
                    config: config.raft.clone(),
                })
            })
            .collect();
        let provider: Arc<dyn UniquenessProvider> =
            Arc::new(ClusterGateway::new(transport.clone(), members));
        let verifier: Option<Arc<dyn TransactionVerifier>> = if config.notary.validating {
            Some(Arc::new(StructuralVerifier))
        } else {
            None
        };

        let mut registry = FlowRegistry::new();
        register_notary_service(&mut registry, &config.notary);
        let engine = flow_engine(
            config,
            network,
            party.clone(),
            registry,
            notary_services(provider, verifier),
        )?;

        Ok(Self {
            party,
            engine,
            transport,
            replicas,
        })
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn engine(&self) -> &StateMachineManager {
        &self.engine
    }

    pub fn replicas(&self) -> &[Arc<RaftReplica<NodeStore>>] {
        &self.replicas
    }

    /// The reachable replica currently acting as leader, if any.
    pub fn leader(&self) -> Option<&Arc<RaftReplica<NodeStore>>> {
        self.replicas
            .iter()
            .find(|r| r.is_leader() && !self.transport.is_down(r.id()))
    }

    /// Cut `replica` off from the rest of the cluster.
    pub fn take_down(&self, replica: &ReplicaId) {
        self.transport.take_down(replica);
    }

    pub fn bring_up(&self, replica: &ReplicaId) {
        self.transport.bring_up(replica);
    }

    /// Wait until a reachable replica leads.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<ReplicaId, NodeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(leader) = self.leader() {
                return Ok(leader.id().clone());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(NodeError::NoLeader(timeout));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Every node of the in-process network.
pub struct NodeContainer {
    pub config: NodeConfig,
    network: InMemoryNetwork,
    notary: NotaryCluster,
    parties: BTreeMap<String, PartyNode>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeContainer {
    /// Build every node described by `config`. Nothing runs until `start()`.
    #[instrument(skip_all, fields(replicas = config.cluster.replicas, parties = config.cluster.parties.len()))]
    pub fn assemble(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let network = InMemoryNetwork::new();
        let notary = NotaryCluster::assemble(&config, &network)?;

        let mut parties = BTreeMap::new();
        for name in &config.cluster.parties {
            let key = Arc::new(identity_key(name));
            let party = party_for(name, &key);
            let mut registry = FlowRegistry::new();
            register_client_flows(&mut registry);
            let engine = flow_engine(&config, &network, party.clone(), registry, client_services(key))?;
            parties.insert(name.clone(), PartyNode { party, engine });
        }
        info!(notary = %notary.party, "Node container assembled");

        Ok(Self {
            config,
            network,
            notary,
            parties,
            timers: Mutex::new(Vec::new()),
        })
    }

    /// Start replica timers, then recover and start every flow engine.
    pub async fn start(&self) -> Result<(), NodeError> {
        {
            let mut timers = self.timers.lock();
            timers.extend(self.notary.replicas.iter().map(|replica| replica.start()));
        }

        let report = self.notary.engine.start().await?;
        log_recovery(&self.notary.party, &report);
        for node in self.parties.values() {
            let report = node.engine.start().await?;
            log_recovery(&node.party, &report);
        }
        Ok(())
    }

    pub fn network(&self) -> &InMemoryNetwork {
        &self.network
    }

    pub fn notary(&self) -> &NotaryCluster {
        &self.notary
    }

    pub fn party(&self, name: &str) -> Option<&PartyNode> {
        self.parties.get(name)
    }

    pub fn parties(&self) -> impl Iterator<Item = &PartyNode> {
        self.parties.values()
    }

    /// Stop scheduling flows and wait for the replica timers to exit.
    pub async fn shutdown(&self) {
        for node in self.parties.values() {
            node.engine.shutdown();
        }
        self.notary.engine.shutdown();
        for replica in &self.notary.replicas {
            replica.shutdown();
        }
        let timers: Vec<_> = self.timers.lock().drain(..).collect();
        for timer in timers {
            if let Err(e) = timer.await {
                warn!(error = %e, "Replica timer task failed");
            }
        }
        info!("Node container stopped");
    }
}

fn log_recovery(party: &Party, report: &RecoveryReport) {
    if report.quarantined > 0 {
        warn!(
            party = %party,
            quarantined = report.quarantined,
            "Checkpoints could not be restored"
        );
    }
    info!(
        party = %party,
        recovered = report.recovered,
        resent = report.resent,
        "Flow engine started"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_02_uniqueness::NotaryError;
    use lf_04_notary::NotaryRejection;
    use shared_types::StateRef;

    fn fast_config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.raft.election_timeout_min_ms = 60;
        config.raft.election_timeout_max_ms = 120;
        config.raft.heartbeat_interval_ms = 15;
        config.raft.rpc_timeout_ms = 30;
        config.raft.commit_timeout_ms = 400;
        config.raft.max_submit_attempts = 20;
        config.raft.retry_backoff_ms = 20;
        config
    }

    fn spend(notary: &Party, index: u32, output: &[u8]) -> LedgerTransaction {
        LedgerTransaction::new(
            vec![StateRef::new(SecureHash::sha256(b"genesis"), index)],
            vec![],
            vec![output.to_vec()],
            notary.clone(),
            None,
        )
    }

    #[test]
    fn test_identity_keys_are_stable_per_name() {
        let a = identity_key("Alice");
        let again = identity_key("Alice");
        let b = identity_key("Bob");
        assert_eq!(a.public_key().as_bytes(), again.public_key().as_bytes());
        assert_ne!(a.public_key().as_bytes(), b.public_key().as_bytes());
    }

    #[test]
    fn test_assemble_rejects_invalid_config() {
        let mut config = NodeConfig::default();
        config.cluster.replicas = 0;
        assert!(matches!(
            NodeContainer::assemble(config),
            Err(NodeError::Config(ConfigError::NoReplicas))
        ));
    }

    #[tokio::test]
    async fn test_party_notarises_through_cluster() {
        let node = NodeContainer::assemble(fast_config()).unwrap();
        node.start().await.unwrap();
        node.notary().wait_for_leader(Duration::from_secs(5)).await.unwrap();

        let alice = node.party("Alice").unwrap();
        let notary = node.notary().party().clone();
        let tx = spend(&notary, 0, b"to bob");
        let signature = alice.notarise(tx.clone()).await.unwrap();
        assert_eq!(signature.by, notary.owning_key);

        let err = alice.notarise(spend(&notary, 0, b"to carol")).await.unwrap_err();
        assert!(matches!(
            err,
            NotaryClientError::Rejected(NotaryRejection::Commit(NotaryError::Conflict { .. }))
        ));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_notarisation_survives_leader_loss() {
        let node = NodeContainer::assemble(fast_config()).unwrap();
        node.start().await.unwrap();
        let leader = node
            .notary()
            .wait_for_leader(Duration::from_secs(5))
            .await
            .unwrap();
        node.notary().take_down(&leader);

        let bob = node.party("Bob").unwrap();
        let notary = node.notary().party().clone();
        bob.notarise(spend(&notary, 1, b"after failover")).await.unwrap();

        let new_leader = node
            .notary()
            .wait_for_leader(Duration::from_secs(5))
            .await
            .unwrap();
        assert_ne!(new_leader, leader);
        node.shutdown().await;
    }
}
