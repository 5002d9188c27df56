//! Session payloads exchanged between a party and the notary.

use crate::domain::errors::NotaryRejection;
use serde::{Deserialize, Serialize};
use shared_crypto::DigitalSignature;
use shared_types::LedgerTransaction;

/// What a party sends to have a transaction notarised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarisationPayload {
    pub transaction: LedgerTransaction,
    /// Caller's signature over `(tx id, caller name)`.
    pub request_signature: DigitalSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotarisationResponse {
    /// Notary signature over the transaction id.
    Signed(DigitalSignature),
    Rejected(NotaryRejection),
}
