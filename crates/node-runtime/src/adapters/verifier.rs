//! Contract checks run by a validating notary.

use async_trait::async_trait;
use lf_04_notary::TransactionVerifier;
use shared_types::LedgerTransaction;
use std::collections::HashSet;

/// Structural checks every transaction on this network must pass: it
/// produces something, and it does not both consume and reference a state.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralVerifier;

#[async_trait]
impl TransactionVerifier for StructuralVerifier {
    async fn verify(&self, transaction: &LedgerTransaction) -> Result<(), String> {
        if transaction.outputs.is_empty() {
            return Err("transaction has no outputs".into());
        }
        if transaction.outputs.iter().any(Vec::is_empty) {
            return Err("transaction has an empty output".into());
        }
        let inputs: HashSet<_> = transaction.inputs.iter().collect();
        if let Some(both) = transaction.references.iter().find(|r| inputs.contains(r)) {
            return Err(format!("{both} is both consumed and referenced"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Party, SecureHash, StateRef};

    fn tx(outputs: Vec<Vec<u8>>, references: Vec<StateRef>) -> LedgerTransaction {
        LedgerTransaction::new(
            vec![StateRef::new(SecureHash::sha256(b"issue"), 0)],
            references,
            outputs,
            Party::new("Notary", [9u8; 32]),
            None,
        )
    }

    #[tokio::test]
    async fn test_accepts_well_formed_transaction() {
        let verifier = StructuralVerifier;
        assert_eq!(verifier.verify(&tx(vec![b"out".to_vec()], vec![])).await, Ok(()));
    }

    #[tokio::test]
    async fn test_rejects_missing_or_empty_outputs() {
        let verifier = StructuralVerifier;
        assert!(verifier.verify(&tx(vec![], vec![])).await.is_err());
        assert!(verifier.verify(&tx(vec![vec![]], vec![])).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_state_both_consumed_and_referenced() {
        let verifier = StructuralVerifier;
        let input = StateRef::new(SecureHash::sha256(b"issue"), 0);
        assert!(verifier
            .verify(&tx(vec![b"out".to_vec()], vec![input]))
            .await
            .is_err());
    }
}
