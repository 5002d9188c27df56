//! Notary domain: wire payloads, rejections and configuration.

pub mod config;
pub mod errors;
pub mod messages;

pub use config::NotaryConfig;
pub use errors::{NotaryClientError, NotaryRejection};
pub use messages::{NotarisationPayload, NotarisationResponse};

/// Node service that signs bytes with the node's identity key.
pub const SIGN_SERVICE: &str = "identity.sign";
/// Node service that commits a request through the uniqueness provider.
pub const COMMIT_SERVICE: &str = "uniqueness.commit";
/// Node service that checks a transaction's contents.
pub const VERIFY_SERVICE: &str = "notary.verify";
