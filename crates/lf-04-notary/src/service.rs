//! Notary wiring
//!
//! Registers the notary flows with a node's flow registry, builds the node
//! services they call, and offers [`notarise`] as the RPC-style entry point.

use crate::adapters::{SigningService, UniquenessCommitService, VerifierService};
use crate::domain::{NotaryClientError, NotaryConfig, COMMIT_SERVICE, SIGN_SERVICE, VERIFY_SERVICE};
use crate::flows::{NotaryClientFlow, NotaryServiceFlow};
use crate::ports::TransactionVerifier;
use lf_01_flow_engine::{ExternalService, FlowRegistry, StateMachineManager};
use lf_02_uniqueness::UniquenessProvider;
use shared_crypto::{DigitalSignature, Ed25519KeyPair};
use shared_types::LedgerTransaction;
use std::collections::HashMap;
use std::sync::Arc;

/// Flows every party needs to request notarisation.
pub fn register_client_flows(registry: &mut FlowRegistry) -> &mut FlowRegistry {
    registry.register::<NotaryClientFlow>()
}

/// The responder a notary runs for inbound notarisation sessions.
pub fn register_notary_service<'a>(registry: &'a mut FlowRegistry, config: &NotaryConfig) -> &'a mut FlowRegistry {
    let validating = config.validating;
    registry.register_responder::<NotaryClientFlow, NotaryServiceFlow>(move |session, counterparty| {
        NotaryServiceFlow::new(session, counterparty, validating)
    })
}

/// Services a party's flows call: signing with its identity key.
pub fn client_services(identity: Arc<Ed25519KeyPair>) -> HashMap<String, Arc<dyn ExternalService>> {
    let mut services: HashMap<String, Arc<dyn ExternalService>> = HashMap::new();
    services.insert(SIGN_SERVICE.to_string(), Arc::new(SigningService::new(identity)));
    services
}

/// Services the notary flow calls. A verifier is required in validating mode.
pub fn notary_services(
    provider: Arc<dyn UniquenessProvider>,
    verifier: Option<Arc<dyn TransactionVerifier>>,
) -> HashMap<String, Arc<dyn ExternalService>> {
    let mut services: HashMap<String, Arc<dyn ExternalService>> = HashMap::new();
    services.insert(
        COMMIT_SERVICE.to_string(),
        Arc::new(UniquenessCommitService::new(provider)),
    );
    if let Some(verifier) = verifier {
        services.insert(VERIFY_SERVICE.to_string(), Arc::new(VerifierService::new(verifier)));
    }
    services
}

/// Notarise `transaction` and wait for the notary's signature.
pub async fn notarise(
    engine: &StateMachineManager,
    transaction: LedgerTransaction,
) -> Result<DigitalSignature, NotaryClientError> {
    let handle = engine.start_flow(NotaryClientFlow::new(transaction)).await?;
    handle.result().await?.map_err(NotaryClientError::Rejected)
}
