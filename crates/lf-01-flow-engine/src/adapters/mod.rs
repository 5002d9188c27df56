//! Adapters layer (hexagonal architecture)

pub mod kv_store;

pub use kv_store::KvCheckpointStore;
