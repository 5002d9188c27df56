//! # Node Runtime Library
//!
//! Configuration, storage adapters and node assembly used by the
//! `node-runtime` binary and by the integration tests.
//!
//! ## Architecture
//!
//! - **Container** (`container/`)
//!   - `NodeConfig`: every component's configuration plus `LF_*` overrides
//!   - `NodeContainer`: parties, the notary and its replica cluster
//!
//! - **Adapters** (`adapters/`)
//!   - `NodeStore`: in-memory or RocksDB (`rocksdb` feature) key-value store
//!   - `ClusterGateway`: the notary's uniqueness provider over the replicas
//!   - `StructuralVerifier`: contract checks for a validating notary
//!
//! ## Usage Example
//!
//! ```ignore
//! let node = NodeContainer::assemble(NodeConfig::from_env()?)?;
//! node.start().await?;
//! node.notary().wait_for_leader(Duration::from_secs(5)).await?;
//!
//! let alice = node.party("Alice").expect("configured party");
//! let signature = alice.notarise(transaction).await?;
//! ```

pub mod adapters;
pub mod container;

// Re-exports for convenience
pub use adapters::{ClusterGateway, NodeStore, StructuralVerifier};
pub use container::{ConfigError, NodeConfig, NodeContainer, NodeError, PartyNode};
