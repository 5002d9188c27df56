//! Client side of notarisation.

use crate::domain::{
    NotarisationPayload, NotarisationResponse, NotaryRejection, SIGN_SERVICE,
};
use lf_01_flow_engine::{FlowContext, FlowError, FlowLogic, FlowType, Resume, Suspend};
use lf_02_uniqueness::{request_signing_payload, NotaryError};
use serde::{Deserialize, Serialize};
use shared_crypto::DigitalSignature;
use shared_types::{LedgerTransaction, SessionId};
use tracing::debug;

pub const REQUESTING: &str = "Requesting signature by notary service";
pub const VALIDATING: &str = "Validating response from notary service";

/// Asks the transaction's notary to notarise it.
///
/// Completes with the notary's signature, or the notary's rejection. A
/// response that does not check out fails the flow.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotaryClientFlow {
    transaction: LedgerTransaction,
    request_signature: Option<DigitalSignature>,
    session: Option<SessionId>,
}

impl NotaryClientFlow {
    pub fn new(transaction: LedgerTransaction) -> Self {
        Self {
            transaction,
            request_signature: None,
            session: None,
        }
    }
}

impl FlowLogic for NotaryClientFlow {
    fn protocol(&self) -> &'static str {
        Self::PROTOCOL
    }

    fn resume(&mut self, ctx: &mut FlowContext<'_>, input: Resume) -> Result<Suspend, FlowError> {
        match input {
            Resume::Start => {
                if !self.transaction.verify_id() {
                    return Err(FlowError::exception(
                        "transaction id does not match its content",
                    ));
                }
                let payload = request_signing_payload(&self.transaction.id, ctx.our_identity());
                Suspend::external(SIGN_SERVICE, &payload)
            }
            returned @ Resume::ExternalReturned(_) => {
                let signature: DigitalSignature = returned.returned()?;
                self.request_signature = Some(signature);
                ctx.step(REQUESTING);
                let session = ctx.initiate_flow(&self.transaction.notary);
                self.session = Some(session);
                debug!(
                    tx_id = %self.transaction.id,
                    notary = %self.transaction.notary,
                    "Requesting notarisation"
                );
                ctx.send_and_receive(
                    session,
                    &NotarisationPayload {
                        transaction: self.transaction.clone(),
                        request_signature: signature,
                    },
                )
            }
            Resume::Received(message) => {
                ctx.step(VALIDATING);
                let outcome = message
                    .decode::<NotarisationResponse>()?
                    .unwrap_with(|response| self.validate(response))?;
                Suspend::complete(&outcome)
            }
            other => Err(FlowError::Defect(format!(
                "notary client resumed with {other:?}"
            ))),
        }
    }
}

impl NotaryClientFlow {
    fn validate(
        &self,
        response: NotarisationResponse,
    ) -> Result<Result<DigitalSignature, NotaryRejection>, FlowError> {
        let tx = &self.transaction;
        match response {
            NotarisationResponse::Signed(signature) => {
                if signature.by != tx.notary.owning_key || !signature.is_valid(tx.id.as_bytes()) {
                    return Err(FlowError::exception(format!(
                        "signature from {} does not verify",
                        tx.notary
                    )));
                }
                Ok(Ok(signature))
            }
            NotarisationResponse::Rejected(NotaryRejection::Commit(NotaryError::Conflict {
                tx_id,
                ..
            })) if tx_id != tx.id => Err(FlowError::exception(format!(
                "notary reported a conflict for {tx_id}, expected {}",
                tx.id
            ))),
            NotarisationResponse::Rejected(rejection) => Ok(Err(rejection)),
        }
    }
}

impl FlowType for NotaryClientFlow {
    const PROTOCOL: &'static str = "notary.notarise";
    type Output = Result<DigitalSignature, NotaryRejection>;
}
