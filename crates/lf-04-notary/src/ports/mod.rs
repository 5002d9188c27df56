//! Ports for the notary.

pub mod outbound;

pub use outbound::TransactionVerifier;
