//! Flow engine configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flow engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEngineConfig {
    /// Flows executing at the same time. Parked flows do not count.
    pub worker_count: usize,
    /// Re-send `Init` for sessions still waiting on a `Confirm` when a flow
    /// is restored from its checkpoint.
    pub reinitiate_on_recovery: bool,
}

impl Default for FlowEngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            reinitiate_on_recovery: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowConfigError {
    #[error("worker_count must be at least 1")]
    NoWorkers,
}

impl FlowEngineConfig {
    pub fn validate(&self) -> Result<(), FlowConfigError> {
        if self.worker_count == 0 {
            return Err(FlowConfigError::NoWorkers);
        }
        Ok(())
    }
}
