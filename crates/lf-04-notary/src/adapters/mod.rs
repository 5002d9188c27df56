//! Node service adapters for the notary flows.

pub mod services;

pub use services::{SigningService, UniquenessCommitService, VerifierService};
