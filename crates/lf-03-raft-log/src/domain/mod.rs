//! Raft domain: entries, messages, configuration and persistent state.

pub mod config;
pub mod entities;
pub mod errors;
pub mod messages;
pub mod persistent;

pub use config::RaftConfig;
pub use entities::{EntryPayload, HardState, LogEntry, ReplicaId, Role};
pub use errors::{RaftConfigError, RaftError};
pub use messages::{AppendEntries, AppendResponse, RequestVote, VoteResponse};
pub use persistent::PersistentState;
