//! File-backed persistence for the peer.
//!
//! Everything lives as JSON documents in the data directory: one file per
//! queue key, plus the store snapshot. Writes go to a temporary file that is
//! synced and renamed over the target, so a crash leaves either the old or
//! the new document.

use repsync_engine::{Error as EngineError, QueueBackend, Store, StoreSnapshot};
use serde_json::Value;
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

const SNAPSHOT_FILE: &str = "store.json";

/// Queue backend storing each key as `<dir>/<key>.json`.
///
/// Commits are synchronous; the engine relies on a queue write being durable
/// once `commit` returns.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open a backend rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl QueueBackend for FileBackend {
    fn load(&self, key: &str) -> repsync_engine::error::Result<Option<Value>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(backend_error(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| EngineError::Backend(format!("{}: {}", path.display(), e)))
    }

    fn commit(&mut self, key: &str, value: Value) -> repsync_engine::error::Result<()> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec(&value)?;
        write_atomic(&path, &bytes).map_err(|e| backend_error(&path, e))
    }

    fn remove(&mut self, key: &str) -> repsync_engine::error::Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend_error(&path, e)),
        }
    }
}

fn backend_error(path: &Path, e: io::Error) -> EngineError {
    EngineError::Backend(format!("{}: {}", path.display(), e))
}

/// Replace `path` with `bytes` through a synced temporary file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

/// Load the store snapshot from `dir`. A missing snapshot yields an empty
/// store.
pub fn load_store(dir: &Path) -> crate::error::Result<Store> {
    let path = dir.join(SNAPSHOT_FILE);
    let json = match fs::read_to_string(&path) {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No store snapshot, starting empty");
            return Ok(Store::new());
        }
        Err(e) => return Err(e.into()),
    };

    let snapshot = StoreSnapshot::from_json(&json)?;
    let mut store = Store::new();
    store.import_state(snapshot)?;
    tracing::info!(
        path = %path.display(),
        entities = store.len(),
        "Store snapshot loaded"
    );
    Ok(store)
}

/// Write the store snapshot to `dir`.
pub fn save_store(dir: &Path, store: &Store) -> crate::error::Result<()> {
    let json = store.export_state().to_json()?;
    write_atomic(&dir.join(SNAPSHOT_FILE), json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use repsync_engine::{IdQueue, PendingQueues, RecordId, EntityKind};
    use serde_json::json;

    #[test]
    fn commit_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = FileBackend::open(dir.path()).unwrap();

        assert_eq!(backend.load("transferLocal").unwrap(), None);
        backend.commit("transferLocal", json!([["Workout", "w-1"]])).unwrap();
        assert_eq!(
            backend.load("transferLocal").unwrap(),
            Some(json!([["Workout", "w-1"]]))
        );

        backend.remove("transferLocal").unwrap();
        backend.remove("transferLocal").unwrap();
        assert_eq!(backend.load("transferLocal").unwrap(), None);
    }

    #[test]
    fn queues_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = RecordId::new(EntityKind::Workout, "w-1").unwrap();

        let mut queues = PendingQueues::new(FileBackend::open(dir.path()).unwrap());
        queues.replace_ids(IdQueue::DeleteLocal, &[id.clone()]).unwrap();
        drop(queues);

        let queues = PendingQueues::new(FileBackend::open(dir.path()).unwrap());
        assert_eq!(queues.load_ids(IdQueue::DeleteLocal), vec![id]);
    }

    #[test]
    fn corrupt_file_is_a_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("syncState.json"), b"{not json").unwrap();

        let backend = FileBackend::open(dir.path()).unwrap();
        assert!(matches!(
            backend.load("syncState"),
            Err(EngineError::Backend(_))
        ));
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_store(dir.path()).unwrap().is_empty());

        let mut store = Store::new();
        let w = store.create_workout("Legs");
        store.add_exercise(&w, "Squat").unwrap();
        store.save(1000);
        save_store(dir.path(), &store).unwrap();

        let loaded = load_store(dir.path()).unwrap();
        assert_eq!(loaded.export_state(), store.export_state());
        assert!(!dir.path().join("store.json.tmp").exists());
    }
}
