//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory Store and persistent storage.
//! They hold saved entities only; unsaved local changes are not part of a
//! snapshot.

use crate::{entity::Entity, error::Result, EntityId, Error, Exercise, RecordId, Set, Workout};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the object graph.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    pub workouts: BTreeMap<EntityId, Workout>,
    pub exercises: BTreeMap<EntityId, Exercise>,
    pub sets: BTreeMap<EntityId, Set>,
    /// Deleted entities, so late children of a deleted parent can be dropped
    #[serde(default)]
    pub tombstones: BTreeSet<RecordId>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            workouts: BTreeMap::new(),
            exercises: BTreeMap::new(),
            sets: BTreeMap::new(),
            tombstones: BTreeSet::new(),
        }
    }
}

impl StoreSnapshot {
    /// Count entities of every kind.
    pub fn entity_count(&self) -> usize {
        self.workouts.len() + self.exercises.len() + self.sets.len()
    }

    /// Check keys against entity ids and every child against its parent.
    pub fn validate(&self) -> Result<()> {
        fn check_keys<T: Entity>(table: &BTreeMap<EntityId, T>) -> Result<()> {
            for (key, entity) in table {
                if key != entity.id() {
                    return Err(Error::InvalidSnapshot(format!(
                        "key {} holds {}",
                        key,
                        entity.record_id()
                    )));
                }
            }
            Ok(())
        }

        check_keys(&self.workouts)?;
        check_keys(&self.exercises)?;
        check_keys(&self.sets)?;

        for exercise in self.exercises.values() {
            match exercise.workout_id() {
                Some(parent) if self.workouts.contains_key(parent) => {}
                _ => {
                    return Err(Error::InvalidSnapshot(format!(
                        "orphaned exercise: {}",
                        exercise.record_id()
                    )))
                }
            }
        }

        for set in self.sets.values() {
            match set.exercise_id() {
                Some(parent) if self.exercises.contains_key(parent) => {}
                _ => {
                    return Err(Error::InvalidSnapshot(format!(
                        "orphaned set: {}",
                        set.record_id()
                    )))
                }
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    fn sample_store() -> Store {
        let mut store = Store::new();
        let workout = store.create_workout("Legs");
        let squat = store.add_exercise(&workout, "Squat").unwrap();
        store.add_rest(&workout, 120.0).unwrap();
        store.add_set(&squat, 5, 140.0).unwrap();
        store.save(1000);
        store
    }

    #[test]
    fn export_import_preserves_graph() {
        let store = sample_store();
        let json = store.export_state().to_json().unwrap();

        let mut restored = Store::new();
        restored
            .import_state(StoreSnapshot::from_json(&json).unwrap())
            .unwrap();

        assert_eq!(restored.graph_ids(), store.graph_ids());
        assert_eq!(restored.export_state(), store.export_state());
    }

    #[test]
    fn deterministic_serialization() {
        let store = sample_store();
        let first = store.export_state().to_json().unwrap();
        let second = store.clone().export_state().to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn orphaned_set_is_rejected() {
        let mut snapshot = sample_store().export_state();
        snapshot.exercises.clear();

        assert!(matches!(
            snapshot.validate(),
            Err(Error::InvalidSnapshot(_))
        ));
        let mut store = Store::new();
        assert!(store.import_state(snapshot).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "workouts": {},
            "exercises": {},
            "sets": {}
        }"#;

        let result = StoreSnapshot::from_json(json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = StoreSnapshot::default();
        assert_eq!(snapshot.entity_count(), 0);
        assert!(snapshot.validate().is_ok());
    }
}
