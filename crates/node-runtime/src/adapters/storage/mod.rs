//! # Storage Adapters
//!
//! `NodeStore` is the key-value store handed to every checkpoint store and
//! raft replica the node assembles. It is in-memory unless the node was built
//! with the `rocksdb` feature and configured for it:
//!
//! ```toml
//! node-runtime = { path = "...", features = ["rocksdb"] }
//! ```
//!
//! Each party and each replica gets its own database under `data_dir`.

#[cfg(feature = "rocksdb")]
pub mod rocksdb_adapter;

#[cfg(feature = "rocksdb")]
pub use rocksdb_adapter::{RocksDbConfig, RocksDbStore};

use crate::container::config::{StorageBackend, StorageConfig};
use shared_types::{BatchOperation, InMemoryKVStore, KVStoreError, KeyValueStore};

/// Store selected by `StorageConfig::backend`.
pub enum NodeStore {
    Memory(InMemoryKVStore),
    #[cfg(feature = "rocksdb")]
    RocksDb(RocksDbStore),
}

impl NodeStore {
    /// Open the store named `name` (e.g. `alice/checkpoints`).
    pub fn open(config: &StorageConfig, name: &str) -> Result<Self, KVStoreError> {
        match config.backend {
            StorageBackend::Memory => Ok(Self::Memory(InMemoryKVStore::new())),
            #[cfg(feature = "rocksdb")]
            StorageBackend::RocksDb => Ok(Self::RocksDb(RocksDbStore::open(RocksDbConfig {
                path: config.data_dir.join(name),
                ..Default::default()
            })?)),
            #[cfg(not(feature = "rocksdb"))]
            StorageBackend::RocksDb => Err(KVStoreError::IOError {
                message: format!("cannot open {name}: built without the `rocksdb` feature"),
            }),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            NodeStore::Memory($store) => $call,
            #[cfg(feature = "rocksdb")]
            NodeStore::RocksDb($store) => $call,
        }
    };
}

impl KeyValueStore for NodeStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        delegate!(self, store => store.get(key))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        delegate!(self, store => store.put(key, value))
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        delegate!(self, store => store.delete(key))
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        delegate!(self, store => store.atomic_batch_write(operations))
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        delegate!(self, store => store.exists(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        delegate!(self, store => store.prefix_scan(prefix))
    }
}
