//! # Commit Log
//!
//! The deterministic state machine behind every uniqueness provider. It
//! turns an ordered sequence of [`CommitCommand`]s into decisions and keeps
//! the consumed-state index they are made against.
//!
//! ## Rules
//!
//! 1. Look up every input and reference in the consumed-state index.
//! 2. Conflicts all caused by the same transaction: idempotent success.
//! 3. No inputs and the transaction was notarised before: success.
//! 4. Any other conflict: `Conflict`, nothing recorded.
//! 5. Time window checked against the command's timestamp.
//! 6. Otherwise all inputs are recorded as consumed in one batch.
//!
//! Every command, accepted or not, is appended to the request log.
//!
//! ## Key Layout
//!
//! | Prefix | Key suffix | Value |
//! |--------|-----------|-------|
//! | `rl/` | seq (big-endian) | [`RequestLogEntry`] |
//! | `ix/` | state ref | `(seq, consuming tx)` |
//! | `tx/` | tx id | seq |
//! | `meta/next_seq` | | next sequence number |

use crate::domain::errors::{
    ConsumedStateType, NotaryError, StateConsumptionDetails, UniquenessError,
};
use crate::domain::request::{CommitCommand, CommitDecision};
use serde::{Deserialize, Serialize};
use shared_crypto::DigitalSignature;
use shared_types::{
    decode, encode, BatchOperation, KeyValueStore, Party, SecureHash, StateRef, TimeWindow,
    Timestamp,
};
use std::collections::BTreeMap;
use tracing::debug;

const REQUEST_LOG: &[u8] = b"rl/";
const STATE_INDEX: &[u8] = b"ix/";
const COMMITTED_TX: &[u8] = b"tx/";
const NEXT_SEQ: &[u8] = b"meta/next_seq";

/// One line of the request log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub seq: u64,
    pub states: Vec<StateRef>,
    pub references: Vec<StateRef>,
    pub tx_id: SecureHash,
    pub caller: Party,
    pub request_signature: DigitalSignature,
    pub time_window: Option<TimeWindow>,
    pub submitted_at: Timestamp,
    pub decision: CommitDecision,
}

fn state_key(state: &StateRef) -> Vec<u8> {
    let mut key = Vec::with_capacity(STATE_INDEX.len() + 36);
    key.extend_from_slice(STATE_INDEX);
    key.extend_from_slice(state.txhash.as_bytes());
    key.extend_from_slice(&state.index.to_be_bytes());
    key
}

fn tx_key(tx_id: &SecureHash) -> Vec<u8> {
    let mut key = COMMITTED_TX.to_vec();
    key.extend_from_slice(tx_id.as_bytes());
    key
}

fn log_key(seq: u64) -> Vec<u8> {
    let mut key = REQUEST_LOG.to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Consumed-state index and request log over a key-value store.
pub struct CommitLog<S: KeyValueStore> {
    kv: S,
    next_seq: u64,
}

impl<S: KeyValueStore> CommitLog<S> {
    /// Open the log, continuing from whatever the store already holds.
    pub fn open(kv: S) -> Result<Self, UniquenessError> {
        let next_seq = match kv.get(NEXT_SEQ)? {
            Some(bytes) => decode(&bytes)?,
            None => 0,
        };
        Ok(Self { kv, next_seq })
    }

    /// Number of commands applied so far.
    pub fn len(&self) -> u64 {
        self.next_seq
    }

    pub fn is_empty(&self) -> bool {
        self.next_seq == 0
    }

    /// The transaction that consumed `state`, and the log position it did so at.
    pub fn consumed_by(&self, state: &StateRef) -> Result<Option<(u64, SecureHash)>, UniquenessError> {
        match self.kv.get(&state_key(state))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn is_notarised(&self, tx_id: &SecureHash) -> Result<bool, UniquenessError> {
        Ok(self.kv.exists(&tx_key(tx_id))?)
    }

    /// The full request log, in order.
    pub fn request_log(&self) -> Result<Vec<RequestLogEntry>, UniquenessError> {
        self.kv
            .prefix_scan(REQUEST_LOG)?
            .into_iter()
            .map(|(_, v)| Ok(decode(&v)?))
            .collect()
    }

    /// Decide `command` and record the outcome.
    pub fn apply(&mut self, command: &CommitCommand) -> Result<CommitDecision, UniquenessError> {
        let request = &command.request;
        let seq = self.next_seq;

        let mut conflicts = BTreeMap::new();
        for (states, kind) in [
            (&request.states, ConsumedStateType::Input),
            (&request.references, ConsumedStateType::Reference),
        ] {
            for state in states {
                if let Some((_, consuming_tx)) = self.consumed_by(state)? {
                    conflicts.insert(*state, StateConsumptionDetails { consuming_tx, kind });
                }
            }
        }

        let mut ops = Vec::new();
        let decision = if !conflicts.is_empty() {
            if conflicts.values().all(|d| d.consuming_tx == request.tx_id) {
                Ok(())
            } else if request.states.is_empty() && self.is_notarised(&request.tx_id)? {
                Ok(())
            } else {
                Err(NotaryError::Conflict {
                    tx_id: request.tx_id,
                    consumed: conflicts,
                })
            }
        } else if request.states.is_empty() && self.is_notarised(&request.tx_id)? {
            Ok(())
        } else {
            match request.time_window {
                Some(window) if !window.contains(command.submitted_at) => {
                    Err(NotaryError::TimeWindowInvalid {
                        current_time: command.submitted_at,
                        window,
                    })
                }
                _ => {
                    let index = encode(&(seq, request.tx_id))?;
                    for state in &request.states {
                        ops.push(BatchOperation::put(state_key(state), index.clone()));
                    }
                    ops.push(BatchOperation::put(tx_key(&request.tx_id), encode(&seq)?));
                    Ok(())
                }
            }
        };

        let entry = RequestLogEntry {
            seq,
            states: request.states.clone(),
            references: request.references.clone(),
            tx_id: request.tx_id,
            caller: request.caller.clone(),
            request_signature: request.request_signature,
            time_window: request.time_window,
            submitted_at: command.submitted_at,
            decision: decision.clone(),
        };
        ops.push(BatchOperation::put(log_key(seq), encode(&entry)?));
        ops.push(BatchOperation::put(NEXT_SEQ.to_vec(), encode(&(seq + 1))?));
        self.kv.atomic_batch_write(ops)?;
        self.next_seq = seq + 1;

        debug!(
            tx_id = %request.tx_id,
            seq,
            inputs = request.states.len(),
            references = request.references.len(),
            accepted = decision.is_ok(),
            "Applied commit command"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::CommitRequest;
    use shared_crypto::Ed25519KeyPair;
    use shared_types::InMemoryKVStore;

    fn state(n: u8, index: u32) -> StateRef {
        StateRef::new(SecureHash::sha256(&[n]), index)
    }

    fn command(
        tx: &[u8],
        states: Vec<StateRef>,
        references: Vec<StateRef>,
        time_window: Option<TimeWindow>,
        submitted_at: Timestamp,
    ) -> CommitCommand {
        let key = Ed25519KeyPair::from_seed([3u8; 32]);
        let caller = Party::new("Alice", *key.public_key().as_bytes());
        CommitCommand {
            request: CommitRequest::signed(
                caller,
                &key,
                SecureHash::sha256(tx),
                states,
                references,
                time_window,
                Party::new("Notary", [0u8; 32]),
            ),
            submitted_at,
        }
    }

    fn open() -> CommitLog<InMemoryKVStore> {
        CommitLog::open(InMemoryKVStore::new()).unwrap()
    }

    #[test]
    fn test_first_commit_wins() {
        let mut log = open();
        let s = state(1, 0);

        assert_eq!(log.apply(&command(b"a", vec![s], vec![], None, 0)).unwrap(), Ok(()));
        let decision = log.apply(&command(b"b", vec![s], vec![], None, 0)).unwrap();

        match decision {
            Err(NotaryError::Conflict { tx_id, consumed }) => {
                assert_eq!(tx_id, SecureHash::sha256(b"b"));
                assert_eq!(
                    consumed.get(&s),
                    Some(&StateConsumptionDetails {
                        consuming_tx: SecureHash::sha256(b"a"),
                        kind: ConsumedStateType::Input,
                    })
                );
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(log.consumed_by(&s).unwrap(), Some((0, SecureHash::sha256(b"a"))));
    }

    #[test]
    fn test_retry_of_committed_tx_is_idempotent() {
        let mut log = open();
        let cmd = command(b"a", vec![state(1, 0), state(1, 1)], vec![], None, 0);

        assert_eq!(log.apply(&cmd).unwrap(), Ok(()));
        assert_eq!(log.apply(&cmd).unwrap(), Ok(()));
        assert_eq!(log.len(), 2);
        assert_eq!(log.consumed_by(&state(1, 1)).unwrap(), Some((0, SecureHash::sha256(b"a"))));
    }

    #[test]
    fn test_conflict_records_nothing() {
        let mut log = open();
        let taken = state(1, 0);
        let free = state(2, 0);
        log.apply(&command(b"a", vec![taken], vec![], None, 0)).unwrap().unwrap();

        let decision = log
            .apply(&command(b"b", vec![free, taken], vec![], None, 0))
            .unwrap();
        assert!(decision.is_err());
        assert_eq!(log.consumed_by(&free).unwrap(), None);
        assert!(!log.is_notarised(&SecureHash::sha256(b"b")).unwrap());
    }

    #[test]
    fn test_consumed_reference_conflicts() {
        let mut log = open();
        let s = state(1, 0);
        log.apply(&command(b"a", vec![s], vec![], None, 0)).unwrap().unwrap();

        let decision = log
            .apply(&command(b"b", vec![state(2, 0)], vec![s], None, 0))
            .unwrap();
        match decision {
            Err(NotaryError::Conflict { consumed, .. }) => {
                assert_eq!(consumed[&s].kind, ConsumedStateType::Reference);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_only_retry_after_commit() {
        let mut log = open();
        let r = state(1, 0);
        let cmd = command(b"a", vec![], vec![r], None, 0);

        assert_eq!(log.apply(&cmd).unwrap(), Ok(()));
        assert!(log.is_notarised(&SecureHash::sha256(b"a")).unwrap());
        assert_eq!(log.consumed_by(&r).unwrap(), None);

        // The reference has since been consumed; the retry still succeeds.
        log.apply(&command(b"b", vec![r], vec![], None, 0)).unwrap().unwrap();
        assert_eq!(log.apply(&cmd).unwrap(), Ok(()));
    }

    #[test]
    fn test_time_window_checked_against_command_time() {
        let mut log = open();
        let window = TimeWindow::between(100, 200);

        let late = log
            .apply(&command(b"a", vec![state(1, 0)], vec![], Some(window), 200))
            .unwrap();
        assert_eq!(
            late,
            Err(NotaryError::TimeWindowInvalid {
                current_time: 200,
                window
            })
        );
        assert_eq!(log.consumed_by(&state(1, 0)).unwrap(), None);

        let on_time = log
            .apply(&command(b"a", vec![state(1, 0)], vec![], Some(window), 150))
            .unwrap();
        assert_eq!(on_time, Ok(()));
    }

    #[test]
    fn test_log_survives_reopen() {
        let kv = InMemoryKVStore::new();
        let mut log = CommitLog::open(kv.clone()).unwrap();
        log.apply(&command(b"a", vec![state(1, 0)], vec![], None, 0)).unwrap().unwrap();
        log.apply(&command(b"b", vec![state(1, 0)], vec![], None, 0)).unwrap().unwrap_err();

        let reopened = CommitLog::open(kv).unwrap();
        assert_eq!(reopened.len(), 2);
        let entries = reopened.request_log().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].decision.is_ok());
        assert!(entries[1].decision.is_err());
        assert_eq!(entries[1].seq, 1);
    }
}
