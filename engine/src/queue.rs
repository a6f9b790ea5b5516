//! Durable pending-change queues.
//!
//! Four ordered queues survive restarts: local changes not yet sent, local
//! deletions not yet sent, remote objects not yet applied and remote deletions
//! not yet applied. The queues never deduplicate; callers do. Every write is
//! committed to the backend immediately.

use crate::{error::Result, Error, RecordId, SyncState, TransferObject};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

pub const TRANSFER_LOCAL_KEY: &str = "transferLocal";
pub const DELETE_LOCAL_KEY: &str = "deleteLocal";
pub const SAVE_REMOTE_KEY: &str = "saveRemote";
pub const DELETE_REMOTE_KEY: &str = "deleteRemote";
pub const SYNC_STATE_KEY: &str = "syncState";

/// Key/value storage for the queues. Implementations must make `commit` and
/// `remove` durable before returning.
pub trait QueueBackend {
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn commit(&mut self, key: &str, value: Value) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// In-memory backend. Clones share the same entries, so a clone kept by a
/// test outlives the engine that wrote to it.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Backend("memory backend poisoned".to_string()))
    }

    /// Raw value stored under a key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().ok()?.get(key).cloned()
    }
}

impl QueueBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn commit(&mut self, key: &str, value: Value) -> Result<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// The queues holding record identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdQueue {
    TransferLocal,
    DeleteLocal,
    DeleteRemote,
}

impl IdQueue {
    pub fn key(self) -> &'static str {
        match self {
            IdQueue::TransferLocal => TRANSFER_LOCAL_KEY,
            IdQueue::DeleteLocal => DELETE_LOCAL_KEY,
            IdQueue::DeleteRemote => DELETE_REMOTE_KEY,
        }
    }
}

/// Queue lengths, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub transfer_local: usize,
    pub delete_local: usize,
    pub save_remote: usize,
    pub delete_remote: usize,
}

/// Typed access to the queues and the sync state over a backend.
#[derive(Debug, Clone)]
pub struct PendingQueues<B: QueueBackend> {
    backend: B,
}

impl<B: QueueBackend> PendingQueues<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    fn load_array(&self, key: &str) -> Vec<Value> {
        match self.backend.load(key) {
            Ok(Some(Value::Array(items))) => items,
            Ok(Some(_)) => {
                tracing::warn!(key, "Ignoring queue that is not an array");
                Vec::new()
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to load queue");
                Vec::new()
            }
        }
    }

    pub fn load_ids(&self, queue: IdQueue) -> Vec<RecordId> {
        self.load_array(queue.key())
            .iter()
            .filter_map(|item| {
                let id = RecordId::decode(item);
                if id.is_none() {
                    tracing::warn!(key = queue.key(), "Dropping malformed queued identifier");
                }
                id
            })
            .collect()
    }

    pub fn replace_ids(&mut self, queue: IdQueue, ids: &[RecordId]) -> Result<()> {
        let value = Value::Array(ids.iter().map(RecordId::encode).collect());
        self.backend.commit(queue.key(), value)
    }

    pub fn clear_ids(&mut self, queue: IdQueue) -> Result<()> {
        self.backend.remove(queue.key())
    }

    pub fn load_remote_saves(&self) -> Vec<TransferObject> {
        TransferObject::decode_batch(&Value::Array(self.load_array(SAVE_REMOTE_KEY)))
    }

    pub fn replace_remote_saves(&mut self, objects: &[TransferObject]) -> Result<()> {
        let value = Value::Array(TransferObject::encode_batch(objects));
        self.backend.commit(SAVE_REMOTE_KEY, value)
    }

    pub fn clear_remote_saves(&mut self) -> Result<()> {
        self.backend.remove(SAVE_REMOTE_KEY)
    }

    /// Load the sync state. Missing or unreadable state starts fresh.
    pub fn load_state(&self) -> SyncState {
        match self.backend.load(SYNC_STATE_KEY) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Discarding unreadable sync state");
                SyncState::default()
            }),
            Ok(None) => SyncState::default(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load sync state");
                SyncState::default()
            }
        }
    }

    pub fn save_state(&mut self, state: &SyncState) -> Result<()> {
        let value = serde_json::to_value(state)?;
        self.backend.commit(SYNC_STATE_KEY, value)
    }

    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            transfer_local: self.load_array(TRANSFER_LOCAL_KEY).len(),
            delete_local: self.load_array(DELETE_LOCAL_KEY).len(),
            save_remote: self.load_array(SAVE_REMOTE_KEY).len(),
            delete_remote: self.load_array(DELETE_REMOTE_KEY).len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityKind, FieldValue};
    use serde_json::json;

    fn rid(kind: EntityKind, id: &str) -> RecordId {
        RecordId::new(kind, id).unwrap()
    }

    #[test]
    fn ids_keep_order_and_duplicates() {
        let mut queues = PendingQueues::new(MemoryBackend::new());
        let ids = vec![
            rid(EntityKind::Set, "s-1"),
            rid(EntityKind::Workout, "w-1"),
            rid(EntityKind::Set, "s-1"),
        ];
        queues.replace_ids(IdQueue::TransferLocal, &ids).unwrap();

        assert_eq!(queues.load_ids(IdQueue::TransferLocal), ids);
        assert!(queues.load_ids(IdQueue::DeleteLocal).is_empty());

        queues.clear_ids(IdQueue::TransferLocal).unwrap();
        assert!(queues.load_ids(IdQueue::TransferLocal).is_empty());
    }

    #[test]
    fn queues_survive_restart() {
        let backend = MemoryBackend::new();
        {
            let mut queues = PendingQueues::new(backend.clone());
            let mut obj = TransferObject::new(rid(EntityKind::Workout, "w-1"));
            obj.set("name", FieldValue::from("Legs"));
            queues.replace_remote_saves(&[obj]).unwrap();
            queues
                .replace_ids(IdQueue::DeleteRemote, &[rid(EntityKind::Exercise, "e-1")])
                .unwrap();
        }

        let queues = PendingQueues::new(backend);
        assert_eq!(queues.load_remote_saves().len(), 1);
        assert_eq!(queues.load_ids(IdQueue::DeleteRemote).len(), 1);
        assert_eq!(
            queues.counts(),
            QueueCounts {
                save_remote: 1,
                delete_remote: 1,
                ..QueueCounts::default()
            }
        );
    }

    #[test]
    fn malformed_entries_are_dropped() {
        let mut backend = MemoryBackend::new();
        backend
            .commit(
                DELETE_LOCAL_KEY,
                json!([["Workout", "w-1"], ["Workout"], "junk", ["Routine", "r-1"]]),
            )
            .unwrap();
        backend.commit(TRANSFER_LOCAL_KEY, json!({"not": "an array"})).unwrap();

        let queues = PendingQueues::new(backend);
        assert_eq!(
            queues.load_ids(IdQueue::DeleteLocal),
            vec![rid(EntityKind::Workout, "w-1")]
        );
        assert!(queues.load_ids(IdQueue::TransferLocal).is_empty());
    }

    #[test]
    fn sync_state_round_trip() {
        let mut queues = PendingQueues::new(MemoryBackend::new());
        assert_eq!(queues.load_state(), SyncState::default());

        let state = SyncState {
            initial_sync_done: true,
            pending_wipe: true,
            ..SyncState::default()
        };
        queues.save_state(&state).unwrap();
        assert_eq!(queues.load_state(), state);
    }

    #[test]
    fn unreadable_state_starts_fresh() {
        let mut backend = MemoryBackend::new();
        backend.commit(SYNC_STATE_KEY, json!("garbage")).unwrap();
        let queues = PendingQueues::new(backend);
        assert_eq!(queues.load_state(), SyncState::default());
    }
}
