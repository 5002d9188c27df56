//! # Persistent Replica State
//!
//! Term, vote, log and commit index of one replica, written through a
//! [`KeyValueStore`] before the replica acts on them. The log is mirrored in
//! memory for term lookups.
//!
//! ## Key Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `raft/hard` | [`HardState`] |
//! | `raft/commit` | commit index |
//! | `raft/log/` + index (big-endian) | [`LogEntry`] |
//!
//! Indexes start at 1. Index 0 is the empty prefix with term 0.

use crate::domain::entities::{HardState, LogEntry};
use crate::domain::errors::RaftError;
use shared_types::{decode, encode, BatchOperation, KeyValueStore};

const HARD_STATE: &[u8] = b"raft/hard";
const COMMIT_INDEX: &[u8] = b"raft/commit";
const LOG_PREFIX: &[u8] = b"raft/log/";

fn log_key(index: u64) -> Vec<u8> {
    let mut key = LOG_PREFIX.to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub struct PersistentState<S: KeyValueStore> {
    kv: S,
    hard: HardState,
    commit_index: u64,
    log: Vec<LogEntry>,
}

impl<S: KeyValueStore> PersistentState<S> {
    /// Load whatever a previous incarnation left in `kv`.
    pub fn open(kv: S) -> Result<Self, RaftError> {
        let hard = match kv.get(HARD_STATE)? {
            Some(bytes) => decode(&bytes)?,
            None => HardState::default(),
        };
        let commit_index = match kv.get(COMMIT_INDEX)? {
            Some(bytes) => decode(&bytes)?,
            None => 0,
        };
        let mut log = Vec::new();
        for (_, value) in kv.prefix_scan(LOG_PREFIX)? {
            let entry: LogEntry = decode(&value)?;
            log.push(entry);
        }
        Ok(Self {
            kv,
            hard,
            commit_index,
            log,
        })
    }

    pub fn hard_state(&self) -> &HardState {
        &self.hard
    }

    pub fn current_term(&self) -> u64 {
        self.hard.current_term
    }

    pub fn set_hard_state(&mut self, hard: HardState) -> Result<(), RaftError> {
        if hard != self.hard {
            self.kv.put(HARD_STATE, &encode(&hard)?)?;
            self.hard = hard;
        }
        Ok(())
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn set_commit_index(&mut self, index: u64) -> Result<(), RaftError> {
        if index > self.commit_index {
            self.kv.put(COMMIT_INDEX, &encode(&index)?)?;
            self.commit_index = index;
        }
        Ok(())
    }

    pub fn last_index(&self) -> u64 {
        self.log.len() as u64
    }

    pub fn last_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    /// Term of the entry at `index`; `Some(0)` for index 0, `None` past the end.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.entry(index).map(|e| e.term)
    }

    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.log.get((index - 1) as usize)
    }

    /// Up to `max` entries starting at `from`.
    pub fn entries_from(&self, from: u64, max: usize) -> Vec<LogEntry> {
        let start = from.max(1) as usize - 1;
        self.log.iter().skip(start).take(max).cloned().collect()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.log
    }

    /// Drop every entry at or after `from` and append `entries`, in one batch.
    ///
    /// Committed entries are never truncated.
    pub fn replace_from(&mut self, from: u64, entries: Vec<LogEntry>) -> Result<(), RaftError> {
        debug_assert!(from > self.commit_index);
        let mut ops = Vec::new();
        for index in from..=self.last_index() {
            ops.push(BatchOperation::delete(log_key(index)));
        }
        for entry in &entries {
            ops.push(BatchOperation::put(log_key(entry.index), encode(entry)?));
        }
        if ops.is_empty() {
            return Ok(());
        }
        self.kv.atomic_batch_write(ops)?;
        self.log.truncate((from - 1) as usize);
        self.log.extend(entries);
        Ok(())
    }

    /// Append one entry at the end of the log.
    pub fn append(&mut self, entry: LogEntry) -> Result<(), RaftError> {
        debug_assert_eq!(entry.index, self.last_index() + 1);
        self.kv.put(&log_key(entry.index), &encode(&entry)?)?;
        self.log.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{EntryPayload, ReplicaId};
    use shared_types::InMemoryKVStore;

    fn noop(term: u64, index: u64) -> LogEntry {
        LogEntry {
            term,
            index,
            payload: EntryPayload::Noop,
        }
    }

    #[test]
    fn test_state_survives_reopen() {
        let kv = InMemoryKVStore::new();
        {
            let mut state = PersistentState::open(kv.clone()).unwrap();
            state
                .set_hard_state(HardState {
                    current_term: 3,
                    voted_for: Some(ReplicaId::new("a")),
                })
                .unwrap();
            state.append(noop(1, 1)).unwrap();
            state.append(noop(3, 2)).unwrap();
            state.set_commit_index(1).unwrap();
        }

        let state = PersistentState::open(kv).unwrap();
        assert_eq!(state.current_term(), 3);
        assert_eq!(state.hard_state().voted_for, Some(ReplicaId::new("a")));
        assert_eq!(state.last_index(), 2);
        assert_eq!(state.last_term(), 3);
        assert_eq!(state.commit_index(), 1);
    }

    #[test]
    fn test_replace_from_truncates_conflicting_suffix() {
        let mut state = PersistentState::open(InMemoryKVStore::new()).unwrap();
        for i in 1..=4 {
            state.append(noop(1, i)).unwrap();
        }

        state.replace_from(3, vec![noop(2, 3)]).unwrap();

        assert_eq!(state.last_index(), 3);
        assert_eq!(state.term_at(3), Some(2));
        assert_eq!(state.term_at(4), None);
    }

    #[test]
    fn test_term_at_zero_is_empty_prefix() {
        let state = PersistentState::open(InMemoryKVStore::new()).unwrap();
        assert_eq!(state.term_at(0), Some(0));
        assert_eq!(state.last_term(), 0);
        assert!(state.entries_from(1, 10).is_empty());
    }
}
