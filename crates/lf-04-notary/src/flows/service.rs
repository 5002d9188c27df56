//! # Notary Service Flow
//!
//! Responder run by the notary for every `notary.notarise` session.
//!
//! ```text
//! receive payload ─→ check id, notary, request signature
//!                       │ (validating) ─→ notary.verify
//!                       └──────────────→ uniqueness.commit ─→ reply
//! ```
//!
//! Every refusal is answered with `NotarisationResponse::Rejected`; the flow
//! itself only fails when no decision could be made.

use crate::domain::{
    NotarisationPayload, NotarisationResponse, NotaryRejection, COMMIT_SERVICE, VERIFY_SERVICE,
};
use lf_01_flow_engine::{FlowContext, FlowError, FlowLogic, FlowType, Resume, Suspend};
use lf_02_uniqueness::{request_signing_payload, CommitRequest, CommitResult};
use serde::{Deserialize, Serialize};
use shared_types::{Party, SessionId};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Stage {
    AwaitingPayload,
    Verifying,
    Committing,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotaryServiceFlow {
    session: SessionId,
    counterparty: Party,
    validating: bool,
    stage: Stage,
    request: Option<CommitRequest>,
}

impl NotaryServiceFlow {
    pub fn new(session: SessionId, counterparty: Party, validating: bool) -> Self {
        Self {
            session,
            counterparty,
            validating,
            stage: Stage::AwaitingPayload,
            request: None,
        }
    }

    fn on_payload(
        &mut self,
        ctx: &mut FlowContext<'_>,
        payload: NotarisationPayload,
    ) -> Result<Suspend, FlowError> {
        if let Err(rejection) = check_payload(ctx.our_identity(), &self.counterparty, &payload) {
            return self.reject(ctx, rejection);
        }
        let tx = payload.transaction;
        self.request = Some(CommitRequest {
            states: tx.inputs.clone(),
            references: tx.references.clone(),
            tx_id: tx.id,
            caller: self.counterparty.clone(),
            request_signature: payload.request_signature,
            time_window: tx.time_window,
            notary: tx.notary.clone(),
        });
        if self.validating {
            self.stage = Stage::Verifying;
            ctx.step("Verifying transaction");
            Suspend::external(VERIFY_SERVICE, &tx)
        } else {
            self.commit(ctx)
        }
    }

    fn commit(&mut self, ctx: &mut FlowContext<'_>) -> Result<Suspend, FlowError> {
        let request = self
            .request
            .as_ref()
            .ok_or_else(|| FlowError::Defect("commit without a request".into()))?;
        self.stage = Stage::Committing;
        ctx.step("Committing");
        Suspend::external(COMMIT_SERVICE, request)
    }

    fn on_commit(
        &mut self,
        ctx: &mut FlowContext<'_>,
        outcome: Result<CommitResult, String>,
    ) -> Result<Suspend, FlowError> {
        match outcome {
            Ok(CommitResult::Success(signature)) => {
                info!(tx_id = ?self.tx_id(), caller = %self.counterparty, "Notarised");
                ctx.send(self.session, &NotarisationResponse::Signed(signature))?;
                Suspend::complete(&true)
            }
            Ok(CommitResult::Failure(error)) => self.reject(ctx, NotaryRejection::Commit(error)),
            Err(reason) => self.reject(ctx, NotaryRejection::Malformed(reason)),
        }
    }

    fn reject(
        &mut self,
        ctx: &mut FlowContext<'_>,
        rejection: NotaryRejection,
    ) -> Result<Suspend, FlowError> {
        warn!(caller = %self.counterparty, reason = %rejection, "Notarisation rejected");
        ctx.send(self.session, &NotarisationResponse::Rejected(rejection))?;
        Suspend::complete(&false)
    }

    fn tx_id(&self) -> Option<String> {
        self.request.as_ref().map(|r| r.tx_id.to_hex())
    }
}

/// Checks a notary runs before touching the uniqueness provider.
pub fn check_payload(
    me: &Party,
    caller: &Party,
    payload: &NotarisationPayload,
) -> Result<(), NotaryRejection> {
    let tx = &payload.transaction;
    if !tx.verify_id() {
        return Err(NotaryRejection::TransactionInvalid(
            "transaction id does not match its content".into(),
        ));
    }
    if tx.notary != *me {
        return Err(NotaryRejection::WrongNotary(tx.notary.clone()));
    }
    let signature = &payload.request_signature;
    if signature.by != caller.owning_key
        || !signature.is_valid(&request_signing_payload(&tx.id, caller))
    {
        return Err(NotaryRejection::RequestSignatureInvalid);
    }
    Ok(())
}

impl FlowLogic for NotaryServiceFlow {
    fn protocol(&self) -> &'static str {
        Self::PROTOCOL
    }

    fn resume(&mut self, ctx: &mut FlowContext<'_>, input: Resume) -> Result<Suspend, FlowError> {
        match (self.stage, input) {
            (Stage::AwaitingPayload, Resume::Start) => Ok(ctx.receive(self.session)),
            (Stage::AwaitingPayload, Resume::Received(message)) => {
                let payload = message.decode::<NotarisationPayload>()?.unwrap_with(Ok)?;
                self.on_payload(ctx, payload)
            }
            (Stage::Verifying, returned @ Resume::ExternalReturned(_)) => {
                match returned.returned::<Result<(), String>>()? {
                    Ok(()) => self.commit(ctx),
                    Err(reason) => self.reject(ctx, NotaryRejection::TransactionInvalid(reason)),
                }
            }
            (Stage::Committing, returned @ Resume::ExternalReturned(_)) => {
                let outcome = returned.returned::<Result<CommitResult, String>>()?;
                self.on_commit(ctx, outcome)
            }
            (stage, other) => Err(FlowError::Defect(format!(
                "notary service at {stage:?} resumed with {other:?}"
            ))),
        }
    }
}

impl FlowType for NotaryServiceFlow {
    const PROTOCOL: &'static str = "notary.service";
    /// Whether the transaction was notarised.
    type Output = bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::Ed25519KeyPair;
    use shared_types::{LedgerTransaction, SecureHash, StateRef};

    struct Fixture {
        notary: Party,
        alice: Party,
        alice_key: Ed25519KeyPair,
        tx: LedgerTransaction,
    }

    fn fixture() -> Fixture {
        let notary_key = Ed25519KeyPair::from_seed([9u8; 32]);
        let notary = Party::new("Notary", *notary_key.public_key().as_bytes());
        let alice_key = Ed25519KeyPair::from_seed([1u8; 32]);
        let alice = Party::new("Alice", *alice_key.public_key().as_bytes());
        let tx = LedgerTransaction::new(
            vec![StateRef::new(SecureHash::sha256(b"issue"), 0)],
            vec![],
            vec![b"output".to_vec()],
            notary.clone(),
            None,
        );
        Fixture {
            notary,
            alice,
            alice_key,
            tx,
        }
    }

    impl Fixture {
        fn payload(&self) -> NotarisationPayload {
            NotarisationPayload {
                transaction: self.tx.clone(),
                request_signature: self
                    .alice_key
                    .sign_detached(&request_signing_payload(&self.tx.id, &self.alice)),
            }
        }
    }

    #[test]
    fn test_well_formed_payload_passes() {
        let f = fixture();
        assert_eq!(check_payload(&f.notary, &f.alice, &f.payload()), Ok(()));
    }

    #[test]
    fn test_tampered_transaction_is_invalid() {
        let f = fixture();
        let mut payload = f.payload();
        payload.transaction.outputs.push(b"extra".to_vec());
        assert!(matches!(
            check_payload(&f.notary, &f.alice, &payload),
            Err(NotaryRejection::TransactionInvalid(_))
        ));
    }

    #[test]
    fn test_other_notary_is_refused() {
        let f = fixture();
        let impostor = Party::new("Impostor", [7u8; 32]);
        assert_eq!(
            check_payload(&impostor, &f.alice, &f.payload()),
            Err(NotaryRejection::WrongNotary(f.notary.clone()))
        );
    }

    #[test]
    fn test_request_signed_by_someone_else_is_refused() {
        let f = fixture();
        let mallory = Ed25519KeyPair::from_seed([6u8; 32]);
        let mut payload = f.payload();
        payload.request_signature =
            mallory.sign_detached(&request_signing_payload(&f.tx.id, &f.alice));
        assert_eq!(
            check_payload(&f.notary, &f.alice, &payload),
            Err(NotaryRejection::RequestSignatureInvalid)
        );

        // Right key, but signed for a different caller name.
        let bob = Party::new("Bob", f.alice.owning_key);
        assert_eq!(
            check_payload(&f.notary, &bob, &f.payload()),
            Err(NotaryRejection::RequestSignatureInvalid)
        );
    }
}
