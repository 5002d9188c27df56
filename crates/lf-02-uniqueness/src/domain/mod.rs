//! Domain layer for the uniqueness service
//!
//! Commit requests and results, notary errors, and the deterministic commit
//! log every provider applies commands to.

pub mod commit_log;
pub mod errors;
pub mod request;

pub use commit_log::{CommitLog, RequestLogEntry};
pub use errors::{ConsumedStateType, NotaryError, StateConsumptionDetails, UniquenessError};
pub use request::{
    request_signing_payload, CommitCommand, CommitDecision, CommitRequest, CommitResult,
};
