//! # Adapter Implementations
//!
//! Concrete implementations of the ports the node wires together:
//!
//! - `storage`: the `KeyValueStore` behind checkpoints and raft logs
//! - `gateway`: the notary's `UniquenessProvider` over the replica cluster
//! - `verifier`: contract checks for a validating notary

pub mod gateway;
pub mod storage;
pub mod verifier;

pub use gateway::ClusterGateway;
pub use storage::NodeStore;
pub use verifier::StructuralVerifier;
