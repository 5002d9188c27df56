//! # Node Container
//!
//! Configuration and assembly of every node in the in-process network.
//!
//! - Flow engines own their checkpoint stores
//! - The notary commits through the replica cluster, never a single log
//! - Parties reach the notary only through sessions on the network

pub mod config;
pub mod nodes;

pub use config::{ClusterConfig, ConfigError, NodeConfig, StorageBackend, StorageConfig};
pub use nodes::{identity_key, NodeContainer, NodeError, NotaryCluster, PartyNode};
