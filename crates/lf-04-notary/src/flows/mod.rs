//! The two halves of the notarisation protocol.

pub mod client;
pub mod service;


pub use client::NotaryClientFlow;
pub use service::{check_payload, NotaryServiceFlow};
