//! # LF-02 Uniqueness
//!
//! Double-spend prevention: a uniqueness provider accepts at most one
//! consuming transaction for every state.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`)
//!   - `CommitRequest` / `CommitCommand` / `CommitResult`
//!   - `NotaryError`: decided rejections (conflict, time window)
//!   - `CommitLog`: deterministic state machine over a `KeyValueStore`
//!
//! - **Ports Layer** (`ports/`)
//!   - `UniquenessProvider`: the commit API
//!
//! - **Service Layer** (`service.rs`)
//!   - `SingleNodeUniquenessProvider`: one log, one lock, local clock
//!
//! ## Invariants
//!
//! - Exactly one successful commit is ever recorded for any state.
//! - Resubmitting a committed request returns success again.
//! - A rejected command records none of its states.

pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

// Re-exports for convenience
pub use domain::{
    request_signing_payload, CommitCommand, CommitDecision, CommitLog, CommitRequest,
    CommitResult, ConsumedStateType, NotaryError, RequestLogEntry, StateConsumptionDetails,
    UniquenessError,
};
pub use ports::UniquenessProvider;
pub use service::{check_request, SingleNodeUniquenessProvider, UniquenessDependencies};
