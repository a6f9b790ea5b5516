//! Store - the in-memory object graph.
//!
//! The Store holds every workout, exercise and set of one device. Local
//! mutations are recorded in a [`ChangeSet`] until [`Store::save`] stamps them;
//! writes coming from the peer go through the `*_synced` methods and are never
//! recorded, so they are not echoed back.

use crate::{
    entity::{self, AnyEntity, Entity, EntityRef},
    error::Result,
    snapshot::StoreSnapshot,
    EntityId, EntityKind, Error, Exercise, RecordId, Set, Timestamp, Workout,
};
use std::collections::{BTreeMap, BTreeSet};

/// Local changes not yet saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Inserted or updated entities, in first-touched order
    pub changed: Vec<RecordId>,
    /// Deleted entities, in deletion order
    pub deleted: Vec<RecordId>,
}

impl ChangeSet {
    fn touch(&mut self, id: RecordId) {
        if !self.changed.contains(&id) && !self.deleted.contains(&id) {
            self.changed.push(id);
        }
    }

    fn delete(&mut self, id: RecordId) {
        self.changed.retain(|changed| *changed != id);
        if !self.deleted.contains(&id) {
            self.deleted.push(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// What [`Store::compact_workout`] removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompactReport {
    /// Rest steps trimmed from the start
    pub start: Vec<Exercise>,
    /// Rest steps trimmed from the end
    pub end: Vec<Exercise>,
    /// Interior rest steps that followed another rest, with their order
    /// before removal
    pub middle: Vec<(i32, Exercise)>,
}

impl CompactReport {
    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.end.is_empty() && self.middle.is_empty()
    }
}

/// State restored by [`Store::rollback`].
#[derive(Debug, Clone)]
struct Checkpoint {
    workouts: BTreeMap<EntityId, Workout>,
    exercises: BTreeMap<EntityId, Exercise>,
    sets: BTreeMap<EntityId, Set>,
    tombstones: BTreeSet<RecordId>,
    changes: ChangeSet,
}

/// Ordered children of a parent entity.
trait Child: Entity {
    fn parent_id(&self) -> Option<&str>;
    fn position(&self) -> i32;
    fn set_position(&mut self, order: i32);
}

impl Child for Exercise {
    fn parent_id(&self) -> Option<&str> {
        self.workout.as_deref()
    }

    fn position(&self) -> i32 {
        self.order
    }

    fn set_position(&mut self, order: i32) {
        self.order = order;
    }
}

impl Child for Set {
    fn parent_id(&self) -> Option<&str> {
        self.exercise.as_deref()
    }

    fn position(&self) -> i32 {
        self.order
    }

    fn set_position(&mut self, order: i32) {
        self.order = order;
    }
}

/// Children of `parent` sorted by `(order, id)`.
fn ordered_children<T: Child>(table: &BTreeMap<EntityId, T>, parent: &str) -> Vec<EntityId> {
    let mut children: Vec<(i32, &EntityId)> = table
        .iter()
        .filter(|(_, child)| child.parent_id() == Some(parent))
        .map(|(id, child)| (child.position(), id))
        .collect();
    children.sort();
    children.into_iter().map(|(_, id)| id.clone()).collect()
}

/// Assign `0..N-1` following `ids`. Returns the children whose order moved.
fn assign_orders<T: Child>(table: &mut BTreeMap<EntityId, T>, ids: &[EntityId]) -> Vec<RecordId> {
    let mut moved = Vec::new();
    for (index, id) in ids.iter().enumerate() {
        if let Some(child) = table.get_mut(id) {
            let order = index as i32;
            if child.position() != order {
                child.set_position(order);
                moved.push(child.record_id());
            }
        }
    }
    moved
}

/// The object graph of one device.
#[derive(Debug, Clone, Default)]
pub struct Store {
    pub(crate) workouts: BTreeMap<EntityId, Workout>,
    pub(crate) exercises: BTreeMap<EntityId, Exercise>,
    pub(crate) sets: BTreeMap<EntityId, Set>,
    /// Every entity deleted from this store since the last wipe
    tombstones: BTreeSet<RecordId>,
    /// Local changes since the last save
    changes: ChangeSet,
    /// Open transaction, if any
    checkpoint: Option<Box<Checkpoint>>,
    /// Bumped on every mutation
    revision: u64,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    /// Counter bumped on every mutation, for callers that persist the store.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Local changes recorded since the last save.
    pub fn pending_changes(&self) -> &ChangeSet {
        &self.changes
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn workout(&self, id: &str) -> Option<&Workout> {
        self.workouts.get(id)
    }

    pub fn exercise(&self, id: &str) -> Option<&Exercise> {
        self.exercises.get(id)
    }

    pub fn set(&self, id: &str) -> Option<&Set> {
        self.sets.get(id)
    }

    /// Resolve an identifier to a live entity.
    pub fn resolve(&self, id: &RecordId) -> Option<EntityRef<'_>> {
        entity::resolve(id, self)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.resolve(id).is_some()
    }

    /// Whether the entity existed here once and has been deleted.
    pub fn is_deleted(&self, id: &RecordId) -> bool {
        self.tombstones.contains(id)
    }

    /// All workouts, ordered by id.
    pub fn workouts(&self) -> impl Iterator<Item = &Workout> {
        self.workouts.values()
    }

    /// Workouts matching a predicate.
    pub fn find_workouts<F>(&self, predicate: F) -> Vec<&Workout>
    where
        F: Fn(&Workout) -> bool,
    {
        self.workouts.values().filter(|w| predicate(w)).collect()
    }

    /// Exercises of a workout, in order.
    pub fn exercises_of(&self, workout_id: &str) -> Vec<&Exercise> {
        ordered_children(&self.exercises, workout_id)
            .iter()
            .filter_map(|id| self.exercises.get(id))
            .collect()
    }

    /// Sets of an exercise, in order.
    pub fn sets_of(&self, exercise_id: &str) -> Vec<&Set> {
        ordered_children(&self.sets, exercise_id)
            .iter()
            .filter_map(|id| self.sets.get(id))
            .collect()
    }

    /// Total number of entities.
    pub fn len(&self) -> usize {
        self.workouts.len() + self.exercises.len() + self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole graph: every workout, then their exercises, then their sets.
    pub fn graph_ids(&self) -> Vec<RecordId> {
        let workouts: Vec<&Workout> = self.workouts.values().collect();
        let exercises: Vec<&Exercise> = workouts
            .iter()
            .flat_map(|w| self.exercises_of(&w.id))
            .collect();
        let sets: Vec<&Set> = exercises
            .iter()
            .flat_map(|e| self.sets_of(&e.id))
            .collect();

        workouts
            .iter()
            .map(|w| w.record_id())
            .chain(exercises.iter().map(|e| e.record_id()))
            .chain(sets.iter().map(|s| s.record_id()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Local mutations
    // ------------------------------------------------------------------

    fn new_id() -> EntityId {
        uuid::Uuid::new_v4().to_string()
    }

    /// Create a workout. It is unstamped until the next save.
    pub fn create_workout(&mut self, name: impl Into<String>) -> EntityId {
        let workout = Workout::new(Self::new_id(), name.into());
        let id = workout.id.clone();
        self.changes.touch(workout.record_id());
        self.workouts.insert(id.clone(), workout);
        self.bump();
        id
    }

    fn append_exercise(&mut self, workout_id: &str, build: impl FnOnce(&mut Exercise)) -> Result<EntityId> {
        if !self.workouts.contains_key(workout_id) {
            return Err(Error::EntityNotFound(RecordId::from_store(
                EntityKind::Workout,
                workout_id,
            )));
        }

        let order = ordered_children(&self.exercises, workout_id).len() as i32;
        let mut exercise = Exercise::new(Self::new_id(), workout_id.to_string(), order);
        build(&mut exercise);
        exercise.normalize();

        let id = exercise.id.clone();
        self.changes.touch(exercise.record_id());
        self.exercises.insert(id.clone(), exercise);
        self.bump();
        Ok(id)
    }

    /// Append a lifted exercise to a workout.
    pub fn add_exercise(&mut self, workout_id: &str, name: impl Into<String>) -> Result<EntityId> {
        let name = name.into();
        self.append_exercise(workout_id, |exercise| exercise.name = Some(name))
    }

    /// Append a rest step to a workout.
    pub fn add_rest(&mut self, workout_id: &str, seconds: f64) -> Result<EntityId> {
        self.append_exercise(workout_id, |exercise| {
            exercise.is_rest = true;
            exercise.rest = Some(seconds);
        })
    }

    /// Append a set to an exercise.
    pub fn add_set(&mut self, exercise_id: &str, reps: i32, weight: f64) -> Result<EntityId> {
        if !self.exercises.contains_key(exercise_id) {
            return Err(Error::EntityNotFound(RecordId::from_store(
                EntityKind::Exercise,
                exercise_id,
            )));
        }

        let order = ordered_children(&self.sets, exercise_id).len() as i32;
        let set = Set::new(Self::new_id(), exercise_id.to_string(), order, reps, weight);
        let id = set.id.clone();
        self.changes.touch(set.record_id());
        self.sets.insert(id.clone(), set);
        self.bump();
        Ok(id)
    }

    pub fn edit_workout(&mut self, id: &str, edit: impl FnOnce(&mut Workout)) -> Result<()> {
        let workout = self
            .workouts
            .get_mut(id)
            .ok_or_else(|| Error::EntityNotFound(RecordId::from_store(EntityKind::Workout, id)))?;
        edit(workout);
        let record_id = workout.record_id();
        self.changes.touch(record_id);
        self.bump();
        Ok(())
    }

    pub fn edit_exercise(&mut self, id: &str, edit: impl FnOnce(&mut Exercise)) -> Result<()> {
        let exercise = self
            .exercises
            .get_mut(id)
            .ok_or_else(|| Error::EntityNotFound(RecordId::from_store(EntityKind::Exercise, id)))?;
        edit(exercise);
        exercise.normalize();
        let record_id = exercise.record_id();
        self.changes.touch(record_id);
        self.bump();
        Ok(())
    }

    pub fn edit_set(&mut self, id: &str, edit: impl FnOnce(&mut Set)) -> Result<()> {
        let set = self
            .sets
            .get_mut(id)
            .ok_or_else(|| Error::EntityNotFound(RecordId::from_store(EntityKind::Set, id)))?;
        edit(set);
        let record_id = set.record_id();
        self.changes.touch(record_id);
        self.bump();
        Ok(())
    }

    /// Move the exercise at position `from` to position `to`.
    pub fn move_exercise(&mut self, workout_id: &str, from: usize, to: usize) -> Result<()> {
        let mut ids = ordered_children(&self.exercises, workout_id);
        Self::reorder(&mut ids, from, to)?;
        for moved in assign_orders(&mut self.exercises, &ids) {
            self.changes.touch(moved);
        }
        self.bump();
        Ok(())
    }

    /// Move the set at position `from` to position `to`.
    pub fn move_set(&mut self, exercise_id: &str, from: usize, to: usize) -> Result<()> {
        let mut ids = ordered_children(&self.sets, exercise_id);
        Self::reorder(&mut ids, from, to)?;
        for moved in assign_orders(&mut self.sets, &ids) {
            self.changes.touch(moved);
        }
        self.bump();
        Ok(())
    }

    fn reorder(ids: &mut Vec<EntityId>, from: usize, to: usize) -> Result<()> {
        if from >= ids.len() || to >= ids.len() {
            return Err(Error::InvalidOperation(format!(
                "cannot move position {} to {} among {} siblings",
                from,
                to,
                ids.len()
            )));
        }
        let id = ids.remove(from);
        ids.insert(to, id);
        Ok(())
    }

    /// Remove an exercise and its sets, then renumber its siblings.
    pub fn remove_exercise(&mut self, exercise_id: &str) -> Result<()> {
        let exercise = self.exercises.get(exercise_id).ok_or_else(|| {
            Error::EntityNotFound(RecordId::from_store(EntityKind::Exercise, exercise_id))
        })?;
        let workout_id = exercise.workout.clone();

        for removed in self.remove_exercise_tree(exercise_id) {
            self.changes.delete(removed);
        }
        if let Some(workout_id) = workout_id {
            self.renumber_exercises(&workout_id);
        }
        self.bump();
        Ok(())
    }

    /// Remove a set, then renumber its siblings.
    pub fn remove_set(&mut self, set_id: &str) -> Result<()> {
        let exercise_id = self
            .sets
            .get(set_id)
            .ok_or_else(|| Error::EntityNotFound(RecordId::from_store(EntityKind::Set, set_id)))?
            .exercise
            .clone();

        if let Some(removed) = self.remove_set_entry(set_id) {
            self.changes.delete(removed);
        }
        if let Some(exercise_id) = exercise_id {
            self.renumber_sets(&exercise_id);
        }
        self.bump();
        Ok(())
    }

    /// Delete a workout with all of its exercises and sets.
    pub fn delete_workout(&mut self, workout_id: &str) -> Result<()> {
        if !self.workouts.contains_key(workout_id) {
            return Err(Error::EntityNotFound(RecordId::from_store(
                EntityKind::Workout,
                workout_id,
            )));
        }

        for removed in self.remove_workout_tree(workout_id) {
            self.changes.delete(removed);
        }
        self.bump();
        Ok(())
    }

    /// Reassign `0..N-1` to a workout's exercises in current order.
    pub fn renumber_exercises(&mut self, workout_id: &str) {
        let ids = ordered_children(&self.exercises, workout_id);
        for moved in assign_orders(&mut self.exercises, &ids) {
            self.changes.touch(moved);
        }
    }

    /// Reassign `0..N-1` to an exercise's sets in current order.
    pub fn renumber_sets(&mut self, exercise_id: &str) {
        let ids = ordered_children(&self.sets, exercise_id);
        for moved in assign_orders(&mut self.sets, &ids) {
            self.changes.touch(moved);
        }
    }

    /// Trim leading and trailing rest steps and drop every rest step that
    /// directly follows another one.
    pub fn compact_workout(&mut self, workout_id: &str) -> Result<CompactReport> {
        if !self.workouts.contains_key(workout_id) {
            return Err(Error::EntityNotFound(RecordId::from_store(
                EntityKind::Workout,
                workout_id,
            )));
        }

        let ids = ordered_children(&self.exercises, workout_id);
        let is_rest = |id: &EntityId| self.exercises.get(id).map(|e| e.is_rest).unwrap_or(false);

        let leading = ids.iter().take_while(|id| is_rest(id)).count();
        let trailing = ids[leading..].iter().rev().take_while(|id| is_rest(id)).count();
        let interior_end = ids.len() - trailing;

        let mut start = Vec::new();
        let mut end = Vec::new();
        let mut middle = Vec::new();
        let mut removed = Vec::new();

        for (index, id) in ids.iter().enumerate() {
            let Some(exercise) = self.exercises.get(id) else {
                continue;
            };
            if index < leading {
                start.push(exercise.clone());
            } else if index >= interior_end {
                end.push(exercise.clone());
            } else if index > leading && exercise.is_rest && is_rest(&ids[index - 1]) {
                middle.push((exercise.order, exercise.clone()));
            } else {
                continue;
            }
            removed.push(id.clone());
        }

        for id in &removed {
            for gone in self.remove_exercise_tree(id) {
                self.changes.delete(gone);
            }
        }
        self.renumber_exercises(workout_id);
        self.bump();

        Ok(CompactReport { start, end, middle })
    }

    /// Stamp every changed entity and hand back what changed.
    pub fn save(&mut self, now: Timestamp) -> ChangeSet {
        let pending = std::mem::take(&mut self.changes);
        let mut saved = ChangeSet::default();

        for id in pending.changed {
            let stamped = match id.kind() {
                EntityKind::Workout => self.workouts.get_mut(id.id()).map(|e| e.stamps.stamp(now)),
                EntityKind::Exercise => self.exercises.get_mut(id.id()).map(|e| e.stamps.stamp(now)),
                EntityKind::Set => self.sets.get_mut(id.id()).map(|e| e.stamps.stamp(now)),
            };
            if stamped.is_some() {
                saved.changed.push(id);
            }
        }
        saved.deleted = pending.deleted;

        self.bump();
        saved
    }

    // ------------------------------------------------------------------
    // Writes from the peer
    // ------------------------------------------------------------------

    /// Insert or replace an entity received from the peer.
    pub fn insert_synced(&mut self, entity: impl Into<AnyEntity>) {
        let entity = entity.into();
        self.tombstones.remove(&entity.record_id());
        match entity {
            AnyEntity::Workout(w) => {
                self.workouts.insert(w.id.clone(), w);
            }
            AnyEntity::Exercise(e) => {
                self.exercises.insert(e.id.clone(), e);
            }
            AnyEntity::Set(s) => {
                self.sets.insert(s.id.clone(), s);
            }
        }
        self.bump();
    }

    /// Delete an entity (and its children) on the peer's behalf. Returns
    /// `false` when it was already gone.
    pub fn delete_synced(&mut self, id: &RecordId) -> bool {
        let removed = match id.kind() {
            EntityKind::Workout => self.remove_workout_tree(id.id()),
            EntityKind::Exercise => {
                let parent = self.exercises.get(id.id()).and_then(|e| e.workout.clone());
                let removed = self.remove_exercise_tree(id.id());
                if let Some(parent) = parent {
                    let ids = ordered_children(&self.exercises, &parent);
                    assign_orders(&mut self.exercises, &ids);
                }
                removed
            }
            EntityKind::Set => {
                let parent = self.sets.get(id.id()).and_then(|s| s.exercise.clone());
                let removed = self.remove_set_entry(id.id());
                if let Some(parent) = parent {
                    let ids = ordered_children(&self.sets, &parent);
                    assign_orders(&mut self.sets, &ids);
                }
                removed.into_iter().collect()
            }
        };

        self.bump();
        !removed.is_empty()
    }

    /// Parent of an exercise or set, if it has one.
    pub fn parent_of(&self, id: &RecordId) -> Option<RecordId> {
        match id.kind() {
            EntityKind::Workout => None,
            EntityKind::Exercise => self
                .exercises
                .get(id.id())
                .and_then(|e| e.workout.as_deref())
                .map(|parent| RecordId::from_store(EntityKind::Workout, parent)),
            EntityKind::Set => self
                .sets
                .get(id.id())
                .and_then(|s| s.exercise.as_deref())
                .map(|parent| RecordId::from_store(EntityKind::Exercise, parent)),
        }
    }

    /// Renumber the children of `parent` on the peer's behalf. Nothing is
    /// recorded, so both devices settle on the same `(order, id)` sequence
    /// without echoing it back.
    pub fn renumber_synced(&mut self, parent: &RecordId) {
        let moved = match parent.kind() {
            EntityKind::Workout => {
                let ids = ordered_children(&self.exercises, parent.id());
                assign_orders(&mut self.exercises, &ids)
            }
            EntityKind::Exercise => {
                let ids = ordered_children(&self.sets, parent.id());
                assign_orders(&mut self.sets, &ids)
            }
            EntityKind::Set => Vec::new(),
        };
        if !moved.is_empty() {
            self.bump();
        }
    }

    /// Remove everything, including unsaved local changes.
    pub fn wipe(&mut self) {
        self.workouts.clear();
        self.exercises.clear();
        self.sets.clear();
        self.tombstones.clear();
        self.changes = ChangeSet::default();
        self.bump();
    }

    fn remove_set_entry(&mut self, set_id: &str) -> Option<RecordId> {
        let set = self.sets.remove(set_id)?;
        let id = set.record_id();
        self.tombstones.insert(id.clone());
        Some(id)
    }

    fn remove_exercise_tree(&mut self, exercise_id: &str) -> Vec<RecordId> {
        let mut removed = Vec::new();
        if let Some(exercise) = self.exercises.remove(exercise_id) {
            removed.push(exercise.record_id());
            self.tombstones.insert(exercise.record_id());
            for set_id in ordered_children(&self.sets, exercise_id) {
                removed.extend(self.remove_set_entry(&set_id));
            }
        }
        removed
    }

    fn remove_workout_tree(&mut self, workout_id: &str) -> Vec<RecordId> {
        let mut removed = Vec::new();
        if let Some(workout) = self.workouts.remove(workout_id) {
            removed.push(workout.record_id());
            self.tombstones.insert(workout.record_id());
            for exercise_id in ordered_children(&self.exercises, workout_id) {
                removed.extend(self.remove_exercise_tree(&exercise_id));
            }
        }
        removed
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Open a transaction. Everything up to [`Store::commit`] can be undone
    /// with [`Store::rollback`].
    pub fn begin(&mut self) -> Result<()> {
        if self.checkpoint.is_some() {
            return Err(Error::TransactionOpen);
        }
        self.checkpoint = Some(Box::new(Checkpoint {
            workouts: self.workouts.clone(),
            exercises: self.exercises.clone(),
            sets: self.sets.clone(),
            tombstones: self.tombstones.clone(),
            changes: self.changes.clone(),
        }));
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.checkpoint.take().ok_or(Error::NoTransaction)?;
        self.bump();
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        let checkpoint = self.checkpoint.take().ok_or(Error::NoTransaction)?;
        self.workouts = checkpoint.workouts;
        self.exercises = checkpoint.exercises;
        self.sets = checkpoint.sets;
        self.tombstones = checkpoint.tombstones;
        self.changes = checkpoint.changes;
        self.bump();
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.checkpoint.is_some()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Export the saved graph as a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        StoreSnapshot {
            format_version: crate::snapshot::SNAPSHOT_FORMAT_VERSION,
            workouts: self.workouts.clone(),
            exercises: self.exercises.clone(),
            sets: self.sets.clone(),
            tombstones: self.tombstones.clone(),
        }
    }

    /// Replace the graph with a snapshot. Unsaved changes are discarded.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        if self.checkpoint.is_some() {
            return Err(Error::TransactionOpen);
        }
        snapshot.validate()?;

        self.workouts = snapshot.workouts;
        self.exercises = snapshot.exercises;
        self.sets = snapshot.sets;
        self.tombstones = snapshot.tombstones;
        self.changes = ChangeSet::default();
        self.bump();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders(store: &Store, workout_id: &str) -> Vec<i32> {
        store.exercises_of(workout_id).iter().map(|e| e.order).collect()
    }

    fn names(store: &Store, workout_id: &str) -> Vec<String> {
        store
            .exercises_of(workout_id)
            .iter()
            .map(|e| {
                if e.is_rest {
                    "rest".to_string()
                } else {
                    e.name.clone().unwrap_or_default()
                }
            })
            .collect()
    }

    #[test]
    fn create_and_save_stamps() {
        let mut store = Store::new();
        let workout = store.create_workout("Push");
        assert!(!store.workout(&workout).unwrap().stamps.is_saved());

        let saved = store.save(1000);
        assert_eq!(saved.changed.len(), 1);
        assert!(saved.deleted.is_empty());

        let stamps = store.workout(&workout).unwrap().stamps;
        assert_eq!(stamps.created, Some(1000));
        assert_eq!(stamps.modified, Some(1000));
        assert!(store.pending_changes().is_empty());
    }

    #[test]
    fn update_keeps_created() {
        let mut store = Store::new();
        let workout = store.create_workout("Push");
        store.save(1000);

        store.edit_workout(&workout, |w| w.name = "Push A".into()).unwrap();
        store.save(2000);

        let w = store.workout(&workout).unwrap();
        assert_eq!(w.stamps.created, Some(1000));
        assert_eq!(w.stamps.modified, Some(2000));
        assert_eq!(w.name, "Push A");
    }

    #[test]
    fn edit_exercise_keeps_rest_flags_clear() {
        let mut store = Store::new();
        let workout = store.create_workout("Intervals");
        let rest = store.add_rest(&workout, 45.0).unwrap();
        store.save(1000);

        store
            .edit_exercise(&rest, |e| {
                e.is_circuit = true;
                e.has_circuit_rest = true;
            })
            .unwrap();

        let exercise = store.exercise(&rest).unwrap();
        assert!(exercise.is_rest());
        assert!(!exercise.is_circuit);
        assert!(!exercise.has_circuit_rest);
        assert_eq!(
            store.pending_changes().changed,
            vec![RecordId::from_store(EntityKind::Exercise, &rest)]
        );
    }

    #[test]
    fn edit_set_is_recorded() {
        let mut store = Store::new();
        let workout = store.create_workout("Legs");
        let exercise = store.add_exercise(&workout, "Squat").unwrap();
        let set = store.add_set(&exercise, 5, 100.0).unwrap();
        store.save(1000);

        store.edit_set(&set, |s| s.weight = 105.0).unwrap();
        assert_eq!(
            store.pending_changes().changed,
            vec![RecordId::from_store(EntityKind::Set, &set)]
        );

        store.save(2000);
        let saved = store.set(&set).unwrap();
        assert_eq!(saved.weight, 105.0);
        assert_eq!(saved.stamps.modified, Some(2000));

        assert!(matches!(
            store.edit_set("nope", |s| s.reps = 1),
            Err(Error::EntityNotFound(_))
        ));
    }

    #[test]
    fn find_workouts_filters() {
        let mut store = Store::new();
        let kept = store.create_workout("Push");
        let archived = store.create_workout("Old push");
        store.edit_workout(&archived, |w| w.archived = true).unwrap();

        let active = store.find_workouts(|w| !w.archived);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kept);
        assert_eq!(store.find_workouts(|w| w.name.contains("push")).len(), 1);
    }

    #[test]
    fn synced_renumber_breaks_ties_by_id() {
        let mut store = Store::new();
        let workout = store.create_workout("Pull");
        let first = store.add_exercise(&workout, "Row").unwrap();
        let second = store.add_exercise(&workout, "Curl").unwrap();
        store.save(1000);
        if let Some(e) = store.exercises.get_mut(&second) {
            e.order = 0;
        }

        let parent = RecordId::from_store(EntityKind::Workout, &workout);
        store.renumber_synced(&parent);

        assert_eq!(orders(&store, &workout), vec![0, 1]);
        let mut expected = vec![first.clone(), second.clone()];
        expected.sort();
        let ids: Vec<EntityId> = store
            .exercises_of(&workout)
            .iter()
            .map(|e| e.id.clone())
            .collect();
        assert_eq!(ids, expected);
        assert!(store.pending_changes().is_empty());
        assert_eq!(
            store.parent_of(&RecordId::from_store(EntityKind::Exercise, &first)),
            Some(parent)
        );
    }

    #[test]
    fn add_exercise_to_missing_workout() {
        let mut store = Store::new();
        let result = store.add_exercise("nope", "Squat");
        assert!(matches!(result, Err(Error::EntityNotFound(_))));
    }

    #[test]
    fn appended_exercises_are_contiguous() {
        let mut store = Store::new();
        let workout = store.create_workout("Push");
        store.add_exercise(&workout, "Bench").unwrap();
        store.add_rest(&workout, 60.0).unwrap();
        store.add_exercise(&workout, "Dips").unwrap();

        assert_eq!(orders(&store, &workout), vec![0, 1, 2]);
        assert_eq!(names(&store, &workout), vec!["Bench", "rest", "Dips"]);
    }

    #[test]
    fn move_exercise_renumbers() {
        let mut store = Store::new();
        let workout = store.create_workout("Push");
        store.add_exercise(&workout, "A").unwrap();
        store.add_exercise(&workout, "B").unwrap();
        store.add_exercise(&workout, "C").unwrap();
        store.save(1000);

        store.move_exercise(&workout, 0, 2).unwrap();
        assert_eq!(names(&store, &workout), vec!["B", "C", "A"]);
        assert_eq!(orders(&store, &workout), vec![0, 1, 2]);
        assert_eq!(store.pending_changes().changed.len(), 3);

        assert!(matches!(
            store.move_exercise(&workout, 0, 3),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn remove_exercise_cascades_and_renumbers() {
        let mut store = Store::new();
        let workout = store.create_workout("Push");
        let a = store.add_exercise(&workout, "A").unwrap();
        store.add_exercise(&workout, "B").unwrap();
        let set = store.add_set(&a, 5, 100.0).unwrap();
        store.save(1000);

        store.remove_exercise(&a).unwrap();
        assert!(store.set(&set).is_none());
        assert_eq!(orders(&store, &workout), vec![0]);

        let saved = store.save(2000);
        assert_eq!(saved.deleted.len(), 2);
        assert_eq!(saved.changed.len(), 1);
    }

    #[test]
    fn delete_workout_cascades() {
        let mut store = Store::new();
        let workout = store.create_workout("Legs");
        let squat = store.add_exercise(&workout, "Squat").unwrap();
        store.add_set(&squat, 5, 140.0).unwrap();
        store.save(1000);

        store.delete_workout(&workout).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.pending_changes().deleted.len(), 3);
    }

    #[test]
    fn deleting_unsaved_entity_drops_it_from_changed() {
        let mut store = Store::new();
        let workout = store.create_workout("Temp");
        store.delete_workout(&workout).unwrap();

        let saved = store.save(1000);
        assert!(saved.changed.is_empty());
        assert_eq!(saved.deleted.len(), 1);
    }

    #[test]
    fn compact_partitions_removed_rests() {
        let mut store = Store::new();
        let workout = store.create_workout("Circuit");
        store.add_rest(&workout, 30.0).unwrap(); // 0 start
        store.add_rest(&workout, 30.0).unwrap(); // 1 start
        store.add_exercise(&workout, "A").unwrap(); // 2
        store.add_rest(&workout, 60.0).unwrap(); // 3 kept
        store.add_rest(&workout, 60.0).unwrap(); // 4 middle
        store.add_rest(&workout, 60.0).unwrap(); // 5 middle
        store.add_exercise(&workout, "B").unwrap(); // 6
        store.add_rest(&workout, 90.0).unwrap(); // 7 end
        store.save(1000);

        let report = store.compact_workout(&workout).unwrap();
        assert_eq!(report.start.len(), 2);
        assert_eq!(report.end.len(), 1);
        let middle_orders: Vec<i32> = report.middle.iter().map(|(order, _)| *order).collect();
        assert_eq!(middle_orders, vec![4, 5]);

        assert_eq!(names(&store, &workout), vec!["A", "rest", "B"]);
        assert_eq!(orders(&store, &workout), vec![0, 1, 2]);
        assert_eq!(store.pending_changes().deleted.len(), 5);
    }

    #[test]
    fn compact_all_rests() {
        let mut store = Store::new();
        let workout = store.create_workout("Nothing");
        store.add_rest(&workout, 30.0).unwrap();
        store.add_rest(&workout, 30.0).unwrap();

        let report = store.compact_workout(&workout).unwrap();
        assert_eq!(report.start.len(), 2);
        assert!(report.end.is_empty());
        assert!(store.exercises_of(&workout).is_empty());
    }

    #[test]
    fn compact_clean_workout_is_noop() {
        let mut store = Store::new();
        let workout = store.create_workout("Clean");
        store.add_exercise(&workout, "A").unwrap();
        store.add_rest(&workout, 30.0).unwrap();
        store.add_exercise(&workout, "B").unwrap();

        assert!(store.compact_workout(&workout).unwrap().is_empty());
        assert_eq!(orders(&store, &workout), vec![0, 1, 2]);
    }

    #[test]
    fn rollback_restores_graph() {
        let mut store = Store::new();
        let workout = store.create_workout("Keep");
        store.save(1000);

        store.begin().unwrap();
        store.wipe();
        store.create_workout("Gone");
        assert!(store.workout(&workout).is_none());
        store.rollback().unwrap();

        assert!(store.workout(&workout).is_some());
        assert_eq!(store.len(), 1);
        assert!(store.pending_changes().is_empty());
        assert_eq!(store.rollback(), Err(Error::NoTransaction));
    }

    #[test]
    fn nested_begin_rejected() {
        let mut store = Store::new();
        store.begin().unwrap();
        assert_eq!(store.begin(), Err(Error::TransactionOpen));
        store.commit().unwrap();
        assert_eq!(store.commit(), Err(Error::NoTransaction));
    }

    #[test]
    fn synced_writes_are_not_recorded() {
        let mut store = Store::new();
        let mut workout = Workout::materialize("w-remote".into());
        workout.name = "From watch".into();
        workout.stamps.stamp(1000);
        store.insert_synced(workout);

        assert!(store.workout("w-remote").is_some());
        assert!(store.pending_changes().is_empty());

        let id = RecordId::new(EntityKind::Workout, "w-remote").unwrap();
        assert!(store.delete_synced(&id));
        assert!(!store.delete_synced(&id));
        assert!(store.pending_changes().is_empty());
    }

    #[test]
    fn deletions_leave_tombstones() {
        let mut store = Store::new();
        let workout = store.create_workout("Legs");
        let squat = store.add_exercise(&workout, "Squat").unwrap();
        let set = store.add_set(&squat, 5, 100.0).unwrap();
        store.save(1000);

        store.delete_workout(&workout).unwrap();
        let set_id = RecordId::new(EntityKind::Set, set).unwrap();
        assert!(store.is_deleted(&set_id));
        assert!(!store.contains(&set_id));

        store.wipe();
        assert!(!store.is_deleted(&set_id));
    }

    #[test]
    fn synced_delete_renumbers_siblings() {
        let mut store = Store::new();
        let workout = store.create_workout("Push");
        let a = store.add_exercise(&workout, "A").unwrap();
        store.add_exercise(&workout, "B").unwrap();
        store.save(1000);

        let id = RecordId::new(EntityKind::Exercise, a).unwrap();
        store.delete_synced(&id);
        assert_eq!(orders(&store, &workout), vec![0]);
        assert!(store.pending_changes().is_empty());
    }

    #[test]
    fn graph_ids_groups_by_kind() {
        let mut store = Store::new();
        let w1 = store.create_workout("A");
        let w2 = store.create_workout("B");
        let e1 = store.add_exercise(&w1, "x").unwrap();
        store.add_exercise(&w2, "y").unwrap();
        store.add_set(&e1, 5, 50.0).unwrap();

        let kinds: Vec<EntityKind> = store.graph_ids().iter().map(|id| id.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EntityKind::Workout,
                EntityKind::Workout,
                EntityKind::Exercise,
                EntityKind::Exercise,
                EntityKind::Set
            ]
        );
    }

    #[test]
    fn resolve_dispatches_by_kind() {
        let mut store = Store::new();
        let workout = store.create_workout("A");
        let exercise = store.add_exercise(&workout, "x").unwrap();

        let id = RecordId::new(EntityKind::Exercise, exercise.clone()).unwrap();
        assert!(matches!(store.resolve(&id), Some(EntityRef::Exercise(_))));

        let wrong_kind = RecordId::new(EntityKind::Set, exercise).unwrap();
        assert!(store.resolve(&wrong_kind).is_none());
    }
}
