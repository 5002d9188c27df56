//! # Node Configuration
//!
//! Unified configuration for the flow engine, the notary cluster and the
//! runtime around them.
//!
//! Every value has a default. `LF_*` environment variables override the
//! defaults, and `validate()` must pass before a node is assembled.
//!
//! | Variable         | Field                         |
//! |------------------|-------------------------------|
//! | `LF_LOG_LEVEL`   | `log_level`                   |
//! | `LF_WORKERS`     | `flow_engine.worker_count`    |
//! | `LF_VALIDATING`  | `notary.validating`           |
//! | `LF_REPLICAS`    | `cluster.replicas`            |
//! | `LF_PARTIES`     | `cluster.parties` (comma separated) |
//! | `LF_STORAGE`     | `storage.backend` (`memory` or `rocksdb`) |
//! | `LF_DATA_DIR`    | `storage.data_dir`            |

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use lf_01_flow_engine::{FlowConfigError, FlowEngineConfig};
use lf_03_raft_log::{RaftConfig, RaftConfigError};
use lf_04_notary::NotaryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
    pub flow_engine: FlowEngineConfig,
    pub raft: RaftConfig,
    pub notary: NotaryConfig,
    pub cluster: ClusterConfig,
    pub storage: StorageConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            flow_engine: FlowEngineConfig::default(),
            raft: RaftConfig::default(),
            notary: NotaryConfig::default(),
            cluster: ClusterConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Shape of the in-process network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Name of the notary identity shared by every replica.
    pub notary_name: String,
    /// Raft replicas backing the notary.
    pub replicas: usize,
    /// Parties able to run flows and request notarisation.
    pub parties: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            notary_name: "Notary".to_string(),
            replicas: 3,
            parties: vec!["Alice".to_string(), "Bob".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    Memory,
    RocksDb,
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" => Ok(Self::RocksDb),
            _ => Err(()),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory; every node and replica gets its own database below it.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}={value} could not be parsed")]
    InvalidOverride { var: &'static str, value: String },

    #[error("flow engine: {0}")]
    FlowEngine(#[from] FlowConfigError),

    #[error("raft: {0}")]
    Raft(#[from] RaftConfigError),

    #[error("the notary needs at least one replica")]
    NoReplicas,

    #[error("party name must not be empty")]
    EmptyPartyName,

    #[error("party name {0} is used more than once")]
    DuplicateParty(String),

    #[error("RocksDB storage requested but the node was built without the `rocksdb` feature")]
    RocksDbUnavailable,
}

impl NodeConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply `LF_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(level) = lookup("LF_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(value) = lookup("LF_WORKERS") {
            self.flow_engine.worker_count = parse("LF_WORKERS", value)?;
        }
        if let Some(value) = lookup("LF_VALIDATING") {
            self.notary.validating = parse("LF_VALIDATING", value)?;
        }
        if let Some(value) = lookup("LF_REPLICAS") {
            self.cluster.replicas = parse("LF_REPLICAS", value)?;
        }
        if let Some(value) = lookup("LF_PARTIES") {
            self.cluster.parties = value
                .split(',')
                .map(|name| name.trim().to_string())
                .collect();
        }
        if let Some(value) = lookup("LF_STORAGE") {
            self.storage.backend = parse("LF_STORAGE", value)?;
        }
        if let Some(dir) = lookup("LF_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Check the configuration can be assembled into a node.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.flow_engine.validate()?;
        self.raft.validate()?;
        if self.cluster.replicas == 0 {
            return Err(ConfigError::NoReplicas);
        }

        let mut seen = HashSet::new();
        let names = std::iter::once(&self.cluster.notary_name).chain(&self.cluster.parties);
        for name in names {
            if name.is_empty() {
                return Err(ConfigError::EmptyPartyName);
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateParty(name.clone()));
            }
        }

        if self.storage.backend == StorageBackend::RocksDb && !cfg!(feature = "rocksdb") {
            return Err(ConfigError::RocksDbUnavailable);
        }
        Ok(())
    }
}

fn parse<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        assert_eq!(config.cluster.replicas, 3);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(!config.notary.validating);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_env_overrides_are_applied() {
        let mut config = NodeConfig::default();
        config
            .apply_overrides(overrides(&[
                ("LF_LOG_LEVEL", "debug"),
                ("LF_WORKERS", "2"),
                ("LF_VALIDATING", "true"),
                ("LF_REPLICAS", "5"),
                ("LF_PARTIES", "Alice, Bob ,Carol"),
                ("LF_DATA_DIR", "/tmp/lf"),
            ]))
            .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.flow_engine.worker_count, 2);
        assert!(config.notary.validating);
        assert_eq!(config.cluster.replicas, 5);
        assert_eq!(config.cluster.parties, vec!["Alice", "Bob", "Carol"]);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/lf"));
    }

    #[test]
    fn test_unparseable_override_is_reported() {
        let mut config = NodeConfig::default();
        let err = config
            .apply_overrides(overrides(&[("LF_REPLICAS", "three")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidOverride {
                var: "LF_REPLICAS",
                value: "three".into()
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let mut config = NodeConfig::default();
        config.cluster.replicas = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoReplicas));

        let mut config = NodeConfig::default();
        config.cluster.parties.push("Notary".into());
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateParty("Notary".into()))
        );

        let mut config = NodeConfig::default();
        config.flow_engine.worker_count = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::FlowEngine(FlowConfigError::NoWorkers))
        );
    }

    #[cfg(not(feature = "rocksdb"))]
    #[test]
    fn test_rocksdb_backend_needs_the_feature() {
        let mut config = NodeConfig::default();
        config
            .apply_overrides(overrides(&[("LF_STORAGE", "rocksdb")]))
            .unwrap();
        assert_eq!(config.validate(), Err(ConfigError::RocksDbUnavailable));
    }
}
