//! # Shared Types Crate
//!
//! This crate contains the ledger identifiers, the notarisable transaction and
//! the storage/time ports used by every other crate in the workspace.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: All cross-crate types are defined here.
//! - **Opaque Identity**: `FlowId` and `SessionId` are random and never reused.
//! - **Immutable References**: a `StateRef` never changes once created; only
//!   the uniqueness service decides whether it has been consumed.

pub mod codec;
pub mod entities;
pub mod errors;
pub mod storage;
pub mod time;

pub use codec::{decode, encode, CodecError};
pub use entities::*;
pub use errors::*;
pub use storage::{BatchOperation, InMemoryKVStore, KeyValueStore};
pub use time::{ManualClock, SystemTimeSource, TimeSource};
