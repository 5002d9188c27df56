//! # LF-03 Raft Log
//!
//! Replicated uniqueness: every notary replica holds the same ordered log of
//! commit commands and applies it to its own commit log, so all replicas
//! reach the same decisions.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`)
//!   - `LogEntry` / `EntryPayload`: no-ops and commit commands
//!   - `RequestVote` / `AppendEntries`: replica-to-replica RPCs
//!   - `PersistentState`: term, vote, log and commit index over a `KeyValueStore`
//!   - `RaftConfig`, `RaftError`
//!
//! - **Ports Layer** (`ports/`)
//!   - `RaftHandler`: inbound RPC surface of a replica
//!   - `RaftTransport`: outbound delivery to peers
//!
//! - **Adapters Layer** (`adapters/`)
//!   - `InMemoryRaftTransport`: in-process cluster with crash simulation
//!
//! - **Service Layer** (`service/`)
//!   - `RaftReplica`: election, replication and apply loop
//!   - `RaftUniquenessProvider`: `UniquenessProvider` over the replica
//!
//! ## Invariants
//!
//! - At most one leader per term; a replica votes at most once per term.
//! - Term and vote are durable before a vote is answered.
//! - An entry is committed once a majority stores it and it belongs to the
//!   leader's term, or precedes such an entry.
//! - Committed entries are applied exactly once, in index order, on every
//!   replica.
//! - The leader stamps each command with its clock; the time window is
//!   checked against that stamp, not the applying replica's clock.
//!
//! ## Usage Example
//!
//! ```ignore
//! let transport = Arc::new(InMemoryRaftTransport::new());
//! let replica = RaftReplica::open(RaftDependencies {
//!     id: ReplicaId::new("notary-1"),
//!     peers: vec![ReplicaId::new("notary-2"), ReplicaId::new("notary-3")],
//!     config: RaftConfig::default(),
//!     store,
//!     transport: transport.clone(),
//!     time_source: Arc::new(SystemTimeSource),
//! })?;
//! transport.register(&replica);
//! replica.start();
//!
//! let provider = RaftUniquenessProvider::new(RaftUniquenessDependencies {
//!     replica,
//!     signer: notary_key,
//!     config: RaftConfig::default(),
//! });
//! let result = provider.commit(request).await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

// Re-exports for convenience
pub use adapters::InMemoryRaftTransport;
pub use domain::{
    AppendEntries, AppendResponse, EntryPayload, HardState, LogEntry, PersistentState, RaftConfig,
    RaftConfigError, RaftError, ReplicaId, RequestVote, Role, VoteResponse,
};
pub use ports::{RaftHandler, RaftTransport};
pub use service::{
    RaftDependencies, RaftReplica, RaftUniquenessDependencies, RaftUniquenessProvider,
};
