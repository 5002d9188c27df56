//! Ports for the replicated log.

pub mod inbound;
pub mod outbound;

pub use inbound::RaftHandler;
pub use outbound::RaftTransport;
