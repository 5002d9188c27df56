//! Ports layer (hexagonal architecture)

pub mod outbound;

pub use outbound::{CheckpointStore, ExternalService};
pub use shared_bus::MessagingService;
