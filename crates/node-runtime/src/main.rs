//! # Ledger-Flow Node Runtime
//!
//! Runs an in-process ledger network: a notary backed by a cluster of raft
//! replicas, and parties that notarise transactions through flows.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (defaults, then `LF_*` environment overrides)
//! 2. Initialise logging (`RUST_LOG`, else `LF_LOG_LEVEL`)
//! 3. Assemble and validate every node
//! 4. Start replica timers, then recover and start flow engines
//! 5. Run the notarisation walkthrough
//! 6. Wait for Ctrl+C and shut down

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use lf_04_notary::NotaryClientError;
use node_runtime::container::{NodeConfig, NodeContainer};
use shared_types::{LedgerTransaction, SecureHash, StateRef};

/// The node runtime driving the container.
pub struct NodeRuntime {
    container: Arc<NodeContainer>,
}

impl NodeRuntime {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let container = NodeContainer::assemble(config).context("Failed to assemble nodes")?;
        Ok(Self {
            container: Arc::new(container),
        })
    }

    pub async fn start(&self) -> Result<()> {
        info!("===========================================");
        info!("  Ledger-Flow Node Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        self.container.start().await.context("Failed to start nodes")?;
        let leader = self
            .container
            .notary()
            .wait_for_leader(self.election_grace())
            .await?;
        info!(leader = %leader, "Notary cluster ready");
        Ok(())
    }

    fn election_grace(&self) -> Duration {
        Duration::from_millis(self.container.config.raft.election_timeout_max_ms * 20)
    }

    /// Spend, double-spend, then spend again after losing the leader.
    async fn walkthrough(&self) -> Result<()> {
        let mut parties = self.container.parties();
        let (first, second) = match (parties.next(), parties.next()) {
            (Some(first), Some(second)) => (first, second),
            _ => {
                warn!("Walkthrough needs two parties, skipping");
                return Ok(());
            }
        };
        let notary = self.container.notary().party().clone();
        let genesis = SecureHash::sha256(b"ledger-flow/genesis");
        let spend = |index: u32, to: &str| {
            LedgerTransaction::new(
                vec![StateRef::new(genesis, index)],
                vec![],
                vec![format!("pay {to}").into_bytes()],
                notary.clone(),
                None,
            )
        };

        let tx = spend(0, &second.party().name);
        let signature = first.notarise(tx.clone()).await?;
        info!(
            party = %first.party(),
            tx_id = %tx.id,
            signature = %hex::encode(&signature.bytes[..8]),
            "Transaction notarised"
        );

        let double_spend = spend(0, &first.party().name);
        match second.notarise(double_spend).await {
            Err(NotaryClientError::Rejected(rejection)) => {
                info!(party = %second.party(), reason = %rejection, "Double spend refused")
            }
            Ok(_) => return Err(anyhow!("double spend was notarised")),
            Err(e) => return Err(e.into()),
        }

        let cluster = self.container.notary();
        let leader = cluster.wait_for_leader(self.election_grace()).await?;
        cluster.take_down(&leader);
        info!(replica = %leader, "Leader taken down");

        let tx = spend(1, &first.party().name);
        second.notarise(tx.clone()).await?;
        let new_leader = cluster.wait_for_leader(self.election_grace()).await?;
        info!(tx_id = %tx.id, leader = %new_leader, "Notarised after failover");

        cluster.bring_up(&leader);
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        self.container.shutdown().await;
        info!("Shutdown complete");
    }
}

fn init_tracing(config: &NodeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env().context("Invalid environment override")?;
    init_tracing(&config);
    debug!(config = %serde_json::to_string(&config)?, "Configuration loaded");

    let runtime = NodeRuntime::new(config)?;
    runtime.start().await?;
    if let Err(e) = runtime.walkthrough().await {
        warn!(error = %e, "Walkthrough failed");
    }

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
