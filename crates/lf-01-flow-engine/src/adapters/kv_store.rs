//! # Key-Value Checkpoint Store
//!
//! Maps the checkpoint store port onto any [`KeyValueStore`].
//!
//! ## Key Layout
//!
//! | Prefix | Key suffix | Value |
//! |--------|-----------|-------|
//! | `cp/` | flow id | [`Checkpoint`] |
//! | `ob/` | flow id | [`OutboxRecord`] |
//! | `tr/` | flow id | [`TerminalRecord`] |
//! | `ss/` | session id | owning flow id |
//! | `lg/` | application key | application value |

use crate::domain::{
    Checkpoint, CheckpointError, OutboxRecord, StepCommit, TerminalRecord,
};
use crate::ports::CheckpointStore;
use parking_lot::Mutex;
use shared_types::{decode, encode, BatchOperation, FlowId, KeyValueStore, SessionId};
use tracing::warn;

const CHECKPOINT: &[u8] = b"cp/";
const OUTBOX: &[u8] = b"ob/";
const TERMINAL: &[u8] = b"tr/";
const SESSION: &[u8] = b"ss/";
const LEDGER: &[u8] = b"lg/";

fn key(prefix: &[u8], id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + id.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(id);
    key
}

/// Checkpoint store over a key-value database.
pub struct KvCheckpointStore<S: KeyValueStore> {
    kv: Mutex<S>,
}

impl<S: KeyValueStore> KvCheckpointStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv: Mutex::new(kv) }
    }

    fn current_seq(kv: &S, flow_id: FlowId) -> Result<Option<u64>, CheckpointError> {
        let Some(bytes) = kv.get(&key(CHECKPOINT, flow_id.as_bytes()))? else {
            return Ok(None);
        };
        // The codec lays fields out in declaration order, so the leading
        // (flow_id, seq) pair can be read without decoding the whole stack.
        let (_, seq): (FlowId, u64) = decode(&bytes)?;
        Ok(Some(seq))
    }
}

impl<S: KeyValueStore> CheckpointStore for KvCheckpointStore<S> {
    fn commit(&self, step: StepCommit) -> Result<(), CheckpointError> {
        let mut kv = self.kv.lock();
        let checkpoint_key = key(CHECKPOINT, step.flow_id.as_bytes());

        if let Some(current) = Self::current_seq(&kv, step.flow_id)? {
            if current >= step.seq {
                return Err(CheckpointError::StaleSequence {
                    flow_id: step.flow_id,
                    current,
                    proposed: step.seq,
                });
            }
        }

        let mut ops = Vec::new();
        if let Some(checkpoint) = &step.checkpoint {
            ops.push(BatchOperation::put(checkpoint_key.clone(), encode(checkpoint)?));
        }
        if let Some(terminal) = &step.terminal {
            ops.push(BatchOperation::delete(checkpoint_key));
            ops.push(BatchOperation::put(
                key(TERMINAL, step.flow_id.as_bytes()),
                encode(terminal)?,
            ));
        }
        if !step.outbox.is_empty() {
            let record = OutboxRecord {
                seq: step.seq,
                messages: step.outbox,
            };
            ops.push(BatchOperation::put(
                key(OUTBOX, step.flow_id.as_bytes()),
                encode(&record)?,
            ));
        }
        for (k, v) in step.ledger_writes {
            ops.push(BatchOperation::put(key(LEDGER, &k), v));
        }
        for session in step.new_sessions {
            ops.push(BatchOperation::put(
                key(SESSION, session.as_bytes()),
                encode(&step.flow_id)?,
            ));
        }

        kv.atomic_batch_write(ops)?;
        Ok(())
    }

    fn get_checkpoint(&self, flow_id: FlowId) -> Result<Option<Checkpoint>, CheckpointError> {
        let kv = self.kv.lock();
        match kv.get(&key(CHECKPOINT, flow_id.as_bytes()))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn checkpoints(
        &self,
    ) -> Result<Vec<(FlowId, Result<Checkpoint, CheckpointError>)>, CheckpointError> {
        let entries = self.kv.lock().prefix_scan(CHECKPOINT)?;
        let mut out = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            let Some(flow_id) = FlowId::from_slice(&k[CHECKPOINT.len()..]) else {
                warn!(key = ?k, "Skipping checkpoint with malformed key");
                continue;
            };
            let checkpoint = decode::<Checkpoint>(&v).map_err(CheckpointError::from);
            out.push((flow_id, checkpoint));
        }
        Ok(out)
    }

    fn terminal(&self, flow_id: FlowId) -> Result<Option<TerminalRecord>, CheckpointError> {
        let kv = self.kv.lock();
        match kv.get(&key(TERMINAL, flow_id.as_bytes()))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn pending_outboxes(&self) -> Result<Vec<(FlowId, OutboxRecord)>, CheckpointError> {
        let entries = self.kv.lock().prefix_scan(OUTBOX)?;
        let mut out = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            let Some(flow_id) = FlowId::from_slice(&k[OUTBOX.len()..]) else {
                continue;
            };
            out.push((flow_id, decode(&v)?));
        }
        Ok(out)
    }

    fn clear_outbox(&self, flow_id: FlowId, seq: u64) -> Result<(), CheckpointError> {
        let mut kv = self.kv.lock();
        let outbox_key = key(OUTBOX, flow_id.as_bytes());
        let Some(bytes) = kv.get(&outbox_key)? else {
            return Ok(());
        };
        let record: OutboxRecord = decode(&bytes)?;
        if record.seq == seq {
            kv.delete(&outbox_key)?;
        }
        Ok(())
    }

    fn session_owner(&self, session: SessionId) -> Result<Option<FlowId>, CheckpointError> {
        let kv = self.kv.lock();
        match kv.get(&key(SESSION, session.as_bytes()))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_ledger(&self, k: &[u8]) -> Result<Option<Vec<u8>>, CheckpointError> {
        Ok(self.kv.lock().get(&key(LEDGER, k))?)
    }
}
