//! # LF-04 Notary
//!
//! Notarisation as a two-party flow: a party asks the notary named in its
//! transaction to commit the transaction's inputs, and the notary answers
//! with its signature or a typed rejection.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`)
//!   - `NotarisationPayload` / `NotarisationResponse`: session payloads
//!   - `NotaryRejection`, `NotaryClientError`, `NotaryConfig`
//!
//! - **Ports Layer** (`ports/`)
//!   - `TransactionVerifier`: contract checks for validating notaries
//!
//! - **Adapters Layer** (`adapters/`)
//!   - Node services over the signing key, the uniqueness provider and the
//!     verifier, reached by flows through `Suspend::External`
//!
//! - **Flows** (`flows/`)
//!   - `NotaryClientFlow` (`notary.notarise`) and its responder
//!     `NotaryServiceFlow`
//!
//! - **Service Layer** (`service.rs`)
//!   - Registration helpers and the `notarise` entry point
//!
//! ## Usage Example
//!
//! ```ignore
//! let mut registry = FlowRegistry::new();
//! register_client_flows(&mut registry);
//! let engine = StateMachineManager::new(FlowEngineDependencies {
//!     registry,
//!     services: client_services(identity_key),
//!     ..
//! });
//! engine.start().await?;
//!
//! let signature = notarise(&engine, transaction).await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod flows;
pub mod ports;
pub mod service;

// Re-exports for convenience
pub use adapters::{SigningService, UniquenessCommitService, VerifierService};
pub use domain::{
    NotarisationPayload, NotarisationResponse, NotaryClientError, NotaryConfig, NotaryRejection,
    COMMIT_SERVICE, SIGN_SERVICE, VERIFY_SERVICE,
};
pub use flows::{check_payload, NotaryClientFlow, NotaryServiceFlow};
pub use ports::TransactionVerifier;
pub use service::{
    client_services, notarise, notary_services, register_client_flows, register_notary_service,
};
