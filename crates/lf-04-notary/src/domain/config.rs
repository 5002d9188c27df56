//! Notary configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotaryConfig {
    /// Run the transaction verifier before committing.
    pub validating: bool,
}
