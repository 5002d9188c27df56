//! Ports layer: the API a uniqueness provider exposes.

pub mod inbound;

pub use inbound::UniquenessProvider;
