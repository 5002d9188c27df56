//! Driven ports (Outbound dependencies)

use async_trait::async_trait;
use shared_types::LedgerTransaction;

/// Checks the contents of a transaction for a validating notary.
///
/// Contract semantics live behind this port; `Err` carries the reason the
/// transaction is invalid and is reported back to the requester.
#[async_trait]
pub trait TransactionVerifier: Send + Sync {
    async fn verify(&self, transaction: &LedgerTransaction) -> Result<(), String>;
}
