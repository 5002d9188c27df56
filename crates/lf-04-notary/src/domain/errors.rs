//! Notary error types

use lf_01_flow_engine::FlowError;
use lf_02_uniqueness::NotaryError;
use serde::{Deserialize, Serialize};
use shared_types::Party;
use thiserror::Error;

/// Why a notary refused a transaction. Sent to the requesting party.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NotaryRejection {
    /// Decided by the uniqueness provider: conflict or time window.
    #[error("{0}")]
    Commit(NotaryError),

    #[error("Transaction is invalid: {0}")]
    TransactionInvalid(String),

    #[error("Transaction names notary {0}")]
    WrongNotary(Party),

    #[error("Request signature is invalid")]
    RequestSignatureInvalid,

    #[error("Malformed request: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotaryClientError {
    #[error("Notarisation rejected: {0}")]
    Rejected(NotaryRejection),

    #[error("Notarisation flow failed: {0}")]
    Flow(#[from] FlowError),
}
