//! Commit requests, the commands built from them and the results returned.

use crate::domain::errors::{NotaryError, UniquenessError};
use serde::{Deserialize, Serialize};
use shared_crypto::{CryptoError, DigitalSignature, Ed25519KeyPair};
use shared_types::{Party, SecureHash, StateRef, TimeWindow, Timestamp};
use std::collections::BTreeSet;

/// Bytes a caller signs to request notarisation of `tx_id`.
pub fn request_signing_payload(tx_id: &SecureHash, caller: &Party) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32 + caller.name.len());
    payload.extend_from_slice(tx_id.as_bytes());
    payload.extend_from_slice(caller.name.as_bytes());
    payload
}

/// Ask the uniqueness provider to consume `states` on behalf of `tx_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Input states to mark as consumed.
    pub states: Vec<StateRef>,
    /// States that must be unconsumed but stay unconsumed.
    pub references: Vec<StateRef>,
    pub tx_id: SecureHash,
    pub caller: Party,
    /// Caller's signature over [`request_signing_payload`].
    pub request_signature: DigitalSignature,
    pub time_window: Option<TimeWindow>,
    /// Notary the request is addressed to.
    pub notary: Party,
}

impl CommitRequest {
    /// Build and sign a request as `caller`.
    pub fn signed(
        caller: Party,
        key: &Ed25519KeyPair,
        tx_id: SecureHash,
        states: Vec<StateRef>,
        references: Vec<StateRef>,
        time_window: Option<TimeWindow>,
        notary: Party,
    ) -> Self {
        let request_signature = key.sign_detached(&request_signing_payload(&tx_id, &caller));
        Self {
            states,
            references,
            tx_id,
            caller,
            request_signature,
            time_window,
            notary,
        }
    }

    /// Structural checks made before a request reaches the log.
    pub fn validate(&self) -> Result<(), UniquenessError> {
        if self.states.is_empty() && self.references.is_empty() {
            return Err(UniquenessError::Malformed(
                "request has neither inputs nor references".into(),
            ));
        }
        let mut inputs = BTreeSet::new();
        for state in &self.states {
            if !inputs.insert(*state) {
                return Err(UniquenessError::Malformed(format!("duplicate input {state}")));
            }
        }
        let mut references = BTreeSet::new();
        for state in &self.references {
            if !references.insert(*state) {
                return Err(UniquenessError::Malformed(format!(
                    "duplicate reference {state}"
                )));
            }
            if inputs.contains(state) {
                return Err(UniquenessError::Malformed(format!(
                    "{state} is both an input and a reference"
                )));
            }
        }
        Ok(())
    }

    /// Check the request signature belongs to the caller and covers this
    /// transaction.
    pub fn verify_signature(&self) -> Result<(), CryptoError> {
        if self.request_signature.by != self.caller.owning_key {
            return Err(CryptoError::SignatureVerificationFailed);
        }
        self.request_signature
            .verify(&request_signing_payload(&self.tx_id, &self.caller))
    }
}

/// A request as ordered by the log, stamped with the clock of whoever
/// ordered it. Applying a command depends on nothing else, so every replica
/// reaches the same decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCommand {
    pub request: CommitRequest,
    pub submitted_at: Timestamp,
}

/// Decision recorded for one command.
pub type CommitDecision = Result<(), NotaryError>;

/// What the caller gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitResult {
    /// The notary's signature over the transaction id.
    Success(DigitalSignature),
    Failure(NotaryError),
}

impl CommitResult {
    /// Turn a log decision into a result, signing successes with `signer`.
    pub fn from_decision(decision: CommitDecision, tx_id: &SecureHash, signer: &Ed25519KeyPair) -> Self {
        match decision {
            Ok(()) => CommitResult::Success(signer.sign_detached(tx_id.as_bytes())),
            Err(e) => CommitResult::Failure(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommitResult::Success(_))
    }

    pub fn into_result(self) -> Result<DigitalSignature, NotaryError> {
        match self {
            CommitResult::Success(signature) => Ok(signature),
            CommitResult::Failure(e) => Err(e),
        }
    }
}
