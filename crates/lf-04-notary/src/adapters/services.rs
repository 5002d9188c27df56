//! Node services the notary flows reach through `Suspend::External`.
//!
//! Each adapter decodes the flow's payload, calls the port it wraps and
//! encodes the answer. Decided outcomes come back as `Ok`; `Err` is reserved
//! for failures where no decision was made, which fail the calling flow.

use async_trait::async_trait;
use lf_01_flow_engine::ExternalService;
use lf_02_uniqueness::{CommitRequest, CommitResult, UniquenessError, UniquenessProvider};
use shared_crypto::Ed25519KeyPair;
use shared_types::{decode, encode, LedgerTransaction};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ports::TransactionVerifier;

/// Signs bytes with the node's identity key.
pub struct SigningService {
    key: Arc<Ed25519KeyPair>,
}

impl SigningService {
    pub fn new(key: Arc<Ed25519KeyPair>) -> Self {
        Self { key }
    }
}

#[async_trait]
impl ExternalService for SigningService {
    async fn execute(&self, payload: Vec<u8>) -> Result<Vec<u8>, String> {
        let message: Vec<u8> = decode(&payload).map_err(|e| e.to_string())?;
        encode(&self.key.sign_detached(&message)).map_err(|e| e.to_string())
    }
}

/// Commits a [`CommitRequest`] and answers `Result<CommitResult, String>`,
/// where the `Err` side is a malformed-request reason.
pub struct UniquenessCommitService {
    provider: Arc<dyn UniquenessProvider>,
}

impl UniquenessCommitService {
    pub fn new(provider: Arc<dyn UniquenessProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ExternalService for UniquenessCommitService {
    async fn execute(&self, payload: Vec<u8>) -> Result<Vec<u8>, String> {
        let request: CommitRequest = decode(&payload).map_err(|e| e.to_string())?;
        let tx_id = request.tx_id;
        let outcome: Result<CommitResult, String> = match self.provider.commit(request).await {
            Ok(result) => Ok(result),
            Err(UniquenessError::Malformed(reason)) => Err(reason),
            Err(e) => {
                warn!(tx_id = %tx_id, error = %e, "Uniqueness provider unavailable");
                return Err(e.to_string());
            }
        };
        debug!(tx_id = %tx_id, success = matches!(outcome, Ok(CommitResult::Success(_))), "Commit answered");
        encode(&outcome).map_err(|e| e.to_string())
    }
}

/// Runs a [`TransactionVerifier`] and answers `Result<(), String>`.
pub struct VerifierService {
    verifier: Arc<dyn TransactionVerifier>,
}

impl VerifierService {
    pub fn new(verifier: Arc<dyn TransactionVerifier>) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl ExternalService for VerifierService {
    async fn execute(&self, payload: Vec<u8>) -> Result<Vec<u8>, String> {
        let transaction: LedgerTransaction = decode(&payload).map_err(|e| e.to_string())?;
        let verdict = self.verifier.verify(&transaction).await;
        encode(&verdict).map_err(|e| e.to_string())
    }
}
