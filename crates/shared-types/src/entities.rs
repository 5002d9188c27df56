//! # Core Ledger Entities
//!
//! Defines the ledger entities shared by all crates.
//!
//! ## Clusters
//!
//! - **Identity**: `Party`, `PublicKey`, `Signature`
//! - **Ledger**: `SecureHash`, `StateRef`, `TimeWindow`, `LedgerTransaction`
//! - **Execution**: `FlowId`, `SessionId`

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// CLUSTER A: IDENTITY
// =============================================================================

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// A named network participant and the key it signs with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    /// Legal name, unique on the network.
    pub name: String,
    /// Ed25519 verification key.
    pub owning_key: PublicKey,
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: PublicKey) -> Self {
        Self {
            name: name.into(),
            owning_key,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// CLUSTER B: LEDGER
// =============================================================================

/// A SHA-256 digest. Used as the transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SecureHash(pub [u8; 32]);

impl SecureHash {
    /// Hash arbitrary bytes.
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureHash({}..)", &self.to_hex()[..12])
    }
}

/// Reference to one output of a previously recorded transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    /// Id of the transaction that created the state.
    pub txhash: SecureHash,
    /// Position of the state in that transaction's outputs.
    pub index: u32,
}

impl StateRef {
    pub fn new(txhash: SecureHash, index: u32) -> Self {
        Self { txhash, index }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:x}", self.txhash, self.index)
    }
}

/// Validity interval of a transaction.
///
/// `from_time` is inclusive, `until_time` is exclusive. At least one bound
/// should be present; an unbounded window contains every instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from_time: Option<Timestamp>,
    pub until_time: Option<Timestamp>,
}

impl TimeWindow {
    pub fn between(from_time: Timestamp, until_time: Timestamp) -> Self {
        Self {
            from_time: Some(from_time),
            until_time: Some(until_time),
        }
    }

    pub fn from_only(from_time: Timestamp) -> Self {
        Self {
            from_time: Some(from_time),
            until_time: None,
        }
    }

    pub fn until_only(until_time: Timestamp) -> Self {
        Self {
            from_time: None,
            until_time: Some(until_time),
        }
    }

    /// True if `now` falls inside the window.
    #[must_use]
    pub fn contains(&self, now: Timestamp) -> bool {
        let after_start = self.from_time.map_or(true, |from| now >= from);
        let before_end = self.until_time.map_or(true, |until| now < until);
        after_start && before_end
    }
}

/// A transaction as seen by the notary.
///
/// Output states are opaque bytes; contract semantics are out of scope and
/// only checked through a pluggable verifier by validating notaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Content hash, see [`LedgerTransaction::compute_id`].
    pub id: SecureHash,
    /// States consumed by this transaction.
    pub inputs: Vec<StateRef>,
    /// States read but not consumed.
    pub references: Vec<StateRef>,
    /// Serialized output states.
    pub outputs: Vec<Vec<u8>>,
    /// Notary responsible for the inputs.
    pub notary: Party,
    pub time_window: Option<TimeWindow>,
}

impl LedgerTransaction {
    /// Build a transaction and derive its id from the content.
    pub fn new(
        inputs: Vec<StateRef>,
        references: Vec<StateRef>,
        outputs: Vec<Vec<u8>>,
        notary: Party,
        time_window: Option<TimeWindow>,
    ) -> Self {
        let mut tx = Self {
            id: SecureHash::default(),
            inputs,
            references,
            outputs,
            notary,
            time_window,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Hash of every field except the id itself.
    #[must_use]
    pub fn compute_id(&self) -> SecureHash {
        let content = (
            &self.inputs,
            &self.references,
            &self.outputs,
            &self.notary,
            &self.time_window,
        );
        let bytes = bincode::serialize(&content).unwrap_or_default();
        SecureHash::sha256(&bytes)
    }

    /// True if the stored id matches the content.
    #[must_use]
    pub fn verify_id(&self) -> bool {
        self.id == self.compute_id()
    }

    /// Reference to the output at `index`.
    #[must_use]
    pub fn out_ref(&self, index: u32) -> StateRef {
        StateRef::new(self.id, index)
    }
}

// =============================================================================
// CLUSTER C: EXECUTION
// =============================================================================

/// Identifier of one running flow instance. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(pub Uuid);

impl FlowId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw 16-byte form, used in storage keys.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Inverse of [`as_bytes`](Self::as_bytes).
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a point-to-point conversation between two flows.
///
/// Chosen by the initiating side and shared by both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw 16-byte form, used in storage keys.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Inverse of [`as_bytes`](Self::as_bytes).
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
