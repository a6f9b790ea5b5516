//! The replicated entity hierarchy: workouts own exercises, exercises own sets.
//!
//! Every entity can export itself to a [`TransferObject`] and merge one back in
//! under last-writer-wins: the incoming object is applied only when its
//! `modified` stamp is strictly newer than the local one.

mod exercise;
mod set;
mod workout;

pub use exercise::Exercise;
pub use set::Set;
pub use workout::Workout;

use crate::{
    error::Result,
    transfer::{CREATED_KEY, MODIFIED_KEY},
    EntityId, EntityKind, Error, FieldValue, RecordId, Store, Timestamp, TransferObject,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Creation and modification stamps.
///
/// Both are `None` until the first save and are set together then.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamps {
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
}

impl Stamps {
    /// Stamp a save at `now`. `modified` never moves backwards, so a local
    /// edit always supersedes whatever was last merged in.
    pub fn stamp(&mut self, now: Timestamp) {
        match self.modified {
            None => {
                self.created = Some(now);
                self.modified = Some(now);
            }
            Some(previous) => {
                self.created.get_or_insert(now);
                self.modified = Some(now.max(previous.saturating_add(1)));
            }
        }
    }

    pub fn is_saved(&self) -> bool {
        self.created.is_some() && self.modified.is_some()
    }

    /// Saved and never updated since.
    pub fn is_new(&self) -> bool {
        self.is_saved() && self.created == self.modified
    }

    fn pair(&self) -> Option<(Timestamp, Timestamp)> {
        Some((self.created?, self.modified?))
    }
}

/// Result of merging a transfer object into an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Incoming state was newer and has been written.
    Applied,
    /// Same `modified` stamp; local copy kept.
    Unchanged,
    /// Local copy is strictly newer; incoming state rejected.
    Stale,
}

impl MergeOutcome {
    /// Whether the local entity now reflects the incoming object.
    pub fn is_accepted(self) -> bool {
        !matches!(self, MergeOutcome::Stale)
    }
}

/// Behaviour shared by every replicated entity.
pub trait Entity: Clone + fmt::Debug + Into<AnyEntity> {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn stamps(&self) -> &Stamps;

    fn record_id(&self) -> RecordId {
        RecordId::from_store(Self::KIND, self.id())
    }

    /// Point lookup by store-local id.
    fn load_by_id<'a>(id: &str, store: &'a Store) -> Option<&'a Self>;

    /// Unsaved shell for an entity first seen from the peer.
    fn materialize(id: EntityId) -> Self;

    /// Type-specific fields of the export.
    fn export_fields(&self, obj: &mut TransferObject);

    /// Merge an incoming transfer object. See [`MergeOutcome`].
    fn merge_from(&mut self, obj: &TransferObject, store: &Store) -> Result<MergeOutcome>;

    /// Snapshot for the wire; `None` until the entity has been saved.
    fn export(&self) -> Option<TransferObject> {
        let (created, modified) = self.stamps().pair()?;
        let mut obj = TransferObject::new(self.record_id());
        obj.set(CREATED_KEY, FieldValue::Date(created));
        obj.set(MODIFIED_KEY, FieldValue::Date(modified));
        self.export_fields(&mut obj);
        Some(obj)
    }
}

/// An owned entity of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyEntity {
    Workout(Workout),
    Exercise(Exercise),
    Set(Set),
}

impl AnyEntity {
    pub fn record_id(&self) -> RecordId {
        match self {
            AnyEntity::Workout(w) => w.record_id(),
            AnyEntity::Exercise(e) => e.record_id(),
            AnyEntity::Set(s) => s.record_id(),
        }
    }
}

impl From<Workout> for AnyEntity {
    fn from(value: Workout) -> Self {
        AnyEntity::Workout(value)
    }
}

impl From<Exercise> for AnyEntity {
    fn from(value: Exercise) -> Self {
        AnyEntity::Exercise(value)
    }
}

impl From<Set> for AnyEntity {
    fn from(value: Set) -> Self {
        AnyEntity::Set(value)
    }
}

/// A borrowed entity of any kind, as returned by [`Store::resolve`].
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Workout(&'a Workout),
    Exercise(&'a Exercise),
    Set(&'a Set),
}

impl EntityRef<'_> {
    pub fn record_id(&self) -> RecordId {
        match self {
            EntityRef::Workout(w) => w.record_id(),
            EntityRef::Exercise(e) => e.record_id(),
            EntityRef::Set(s) => s.record_id(),
        }
    }

    pub fn stamps(&self) -> &Stamps {
        match self {
            EntityRef::Workout(w) => w.stamps(),
            EntityRef::Exercise(e) => e.stamps(),
            EntityRef::Set(s) => s.stamps(),
        }
    }

    pub fn export(&self) -> Option<TransferObject> {
        match self {
            EntityRef::Workout(w) => w.export(),
            EntityRef::Exercise(e) => e.export(),
            EntityRef::Set(s) => s.export(),
        }
    }
}

/// Loader signature used by the resolve table.
type Loader = for<'a> fn(&str, &'a Store) -> Option<EntityRef<'a>>;

fn load_workout<'a>(id: &str, store: &'a Store) -> Option<EntityRef<'a>> {
    Workout::load_by_id(id, store).map(EntityRef::Workout)
}

fn load_exercise<'a>(id: &str, store: &'a Store) -> Option<EntityRef<'a>> {
    Exercise::load_by_id(id, store).map(EntityRef::Exercise)
}

fn load_set<'a>(id: &str, store: &'a Store) -> Option<EntityRef<'a>> {
    Set::load_by_id(id, store).map(EntityRef::Set)
}

/// Static dispatch table from entity kind to typed loader.
const LOADERS: [(EntityKind, Loader); 3] = [
    (EntityKind::Workout, load_workout),
    (EntityKind::Exercise, load_exercise),
    (EntityKind::Set, load_set),
];

/// Resolve an identifier to a live entity.
pub(crate) fn resolve<'a>(id: &RecordId, store: &'a Store) -> Option<EntityRef<'a>> {
    let (_, loader) = LOADERS.iter().find(|(kind, _)| *kind == id.kind())?;
    loader(id.id(), store)
}

// ---------------------------------------------------------------------------
// Merge helpers
// ---------------------------------------------------------------------------

/// Whether a merge should go on to parse fields.
pub(crate) enum MergeGate {
    Proceed(Stamps),
    Skip(MergeOutcome),
}

/// Identity check, reserved stamps, and the last-writer-wins comparison.
pub(crate) fn gate(local_id: &RecordId, local: &Stamps, obj: &TransferObject) -> Result<MergeGate> {
    if obj.id() != local_id {
        return Err(Error::IdentityMismatch {
            expected: local_id.clone(),
            actual: obj.id().clone(),
        });
    }

    let created = date_field(obj, CREATED_KEY)?;
    let modified = date_field(obj, MODIFIED_KEY)?;

    match local.modified {
        Some(current) if current > modified => Ok(MergeGate::Skip(MergeOutcome::Stale)),
        Some(current) if current == modified => Ok(MergeGate::Skip(MergeOutcome::Unchanged)),
        _ => Ok(MergeGate::Proceed(Stamps {
            created: Some(created),
            modified: Some(modified),
        })),
    }
}

fn field<'a>(obj: &'a TransferObject, key: &str) -> Result<&'a FieldValue> {
    obj.get(key)
        .ok_or_else(|| Error::MissingField(key.to_string()))
}

fn mismatch(key: &str, expected: &str) -> Error {
    Error::TypeMismatch {
        field: key.to_string(),
        expected: expected.to_string(),
    }
}

pub(crate) fn date_field(obj: &TransferObject, key: &str) -> Result<Timestamp> {
    field(obj, key)?.as_date().ok_or_else(|| mismatch(key, "Date"))
}

pub(crate) fn string_field(obj: &TransferObject, key: &str) -> Result<String> {
    field(obj, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| mismatch(key, "String"))
}

pub(crate) fn int_field(obj: &TransferObject, key: &str) -> Result<i32> {
    field(obj, key)?
        .as_i64()
        .and_then(|value| i32::try_from(value).ok())
        .ok_or_else(|| mismatch(key, "Int"))
}

pub(crate) fn float_field(obj: &TransferObject, key: &str) -> Result<f64> {
    field(obj, key)?.as_f64().ok_or_else(|| mismatch(key, "Float"))
}

pub(crate) fn bool_field(obj: &TransferObject, key: &str) -> Result<bool> {
    field(obj, key)?.as_bool().ok_or_else(|| mismatch(key, "Bool"))
}

/// Parse a field that may be absent.
pub(crate) fn optional<T>(
    obj: &TransferObject,
    key: &str,
    parse: fn(&TransferObject, &str) -> Result<T>,
) -> Result<Option<T>> {
    if obj.get(key).is_none() {
        return Ok(None);
    }
    parse(obj, key).map(Some)
}

/// Parse a parent reference and make sure the parent exists locally.
pub(crate) fn parent_field(
    obj: &TransferObject,
    key: &str,
    kind: EntityKind,
    store: &Store,
) -> Result<EntityId> {
    let parent = field(obj, key)?
        .as_reference()
        .filter(|id| id.kind() == kind)
        .ok_or_else(|| mismatch(key, kind.type_name()))?;

    if store.resolve(&parent).is_none() {
        return Err(Error::UnresolvedParent(parent));
    }
    Ok(parent.id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_stamp_sets_both() {
        let mut stamps = Stamps::default();
        assert!(!stamps.is_saved());

        stamps.stamp(1000);
        assert_eq!(stamps.created, Some(1000));
        assert_eq!(stamps.modified, Some(1000));
        assert!(stamps.is_new());

        stamps.stamp(2000);
        assert_eq!(stamps.created, Some(1000));
        assert_eq!(stamps.modified, Some(2000));
        assert!(!stamps.is_new());
    }

    #[test]
    fn modified_never_moves_backwards() {
        let mut stamps = Stamps {
            created: Some(1000),
            modified: Some(5000),
        };
        stamps.stamp(3000);
        assert_eq!(stamps.modified, Some(5001));
    }

    #[test]
    fn stamping_after_max_timestamp_saturates() {
        let mut stamps = Stamps {
            created: Some(1000),
            modified: Some(Timestamp::MAX),
        };
        stamps.stamp(3000);
        assert_eq!(stamps.modified, Some(Timestamp::MAX));
    }

    #[test]
    fn outcome_acceptance() {
        assert!(MergeOutcome::Applied.is_accepted());
        assert!(MergeOutcome::Unchanged.is_accepted());
        assert!(!MergeOutcome::Stale.is_accepted());
    }
}
