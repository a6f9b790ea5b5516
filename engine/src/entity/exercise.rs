use super::{
    bool_field, float_field, gate, int_field, optional, parent_field, string_field, Entity,
    MergeGate, MergeOutcome, Stamps,
};
use crate::{error::Result, EntityId, EntityKind, FieldValue, RecordId, Store, TransferObject};
use serde::{Deserialize, Serialize};

/// One step of a workout: either a lifted exercise or a rest period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub(crate) id: EntityId,
    pub(crate) stamps: Stamps,
    pub(crate) workout: Option<EntityId>,
    pub(crate) order: i32,
    pub name: Option<String>,
    pub(crate) is_rest: bool,
    pub is_circuit: bool,
    pub has_circuit_rest: bool,
    /// Rest interval in seconds; the whole duration for a rest step.
    pub rest: Option<f64>,
}

impl Exercise {
    pub(crate) fn new(id: EntityId, workout: EntityId, order: i32) -> Self {
        Self {
            id,
            stamps: Stamps::default(),
            workout: Some(workout),
            order,
            name: None,
            is_rest: false,
            is_circuit: false,
            has_circuit_rest: false,
            rest: None,
        }
    }

    pub fn workout_id(&self) -> Option<&str> {
        self.workout.as_deref()
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn is_rest(&self) -> bool {
        self.is_rest
    }

    /// Turn this step into a rest period (or back).
    pub fn set_rest(&mut self, is_rest: bool) {
        self.is_rest = is_rest;
        self.normalize();
    }

    /// Rest steps never take part in circuits.
    pub(crate) fn normalize(&mut self) {
        if self.is_rest {
            self.is_circuit = false;
            self.has_circuit_rest = false;
        }
    }
}

impl Entity for Exercise {
    const KIND: EntityKind = EntityKind::Exercise;

    fn id(&self) -> &str {
        &self.id
    }

    fn stamps(&self) -> &Stamps {
        &self.stamps
    }

    fn load_by_id<'a>(id: &str, store: &'a Store) -> Option<&'a Self> {
        store.exercise(id)
    }

    fn materialize(id: EntityId) -> Self {
        Self {
            id,
            stamps: Stamps::default(),
            workout: None,
            order: 0,
            name: None,
            is_rest: false,
            is_circuit: false,
            has_circuit_rest: false,
            rest: None,
        }
    }

    fn export_fields(&self, obj: &mut TransferObject) {
        if let Some(workout) = &self.workout {
            let parent = RecordId::from_store(EntityKind::Workout, workout);
            obj.set("workout", FieldValue::reference(&parent));
        }
        obj.set("order", self.order);
        obj.set("isRest", self.is_rest);
        obj.set("isCircuit", self.is_circuit);
        obj.set("hasCircuitRest", self.has_circuit_rest);
        if let Some(name) = &self.name {
            obj.set("name", name.as_str());
        }
        if let Some(rest) = self.rest {
            obj.set("rest", rest);
        }
    }

    fn merge_from(&mut self, obj: &TransferObject, store: &Store) -> Result<MergeOutcome> {
        let stamps = match gate(&self.record_id(), &self.stamps, obj)? {
            MergeGate::Proceed(stamps) => stamps,
            MergeGate::Skip(outcome) => return Ok(outcome),
        };

        let order = int_field(obj, "order")?;
        let is_rest = bool_field(obj, "isRest")?;
        let is_circuit = optional(obj, "isCircuit", bool_field)?.unwrap_or(false);
        let has_circuit_rest = optional(obj, "hasCircuitRest", bool_field)?.unwrap_or(false);
        let name = optional(obj, "name", string_field)?;
        let rest = optional(obj, "rest", float_field)?;
        let workout = parent_field(obj, "workout", EntityKind::Workout, store)?;

        self.workout = Some(workout);
        self.order = order;
        self.is_rest = is_rest;
        self.is_circuit = is_circuit;
        self.has_circuit_rest = has_circuit_rest;
        self.name = name;
        self.rest = rest;
        self.stamps = stamps;
        self.normalize();
        Ok(MergeOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{CREATED_KEY, MODIFIED_KEY};
    use crate::Error;

    fn incoming(workout: &str) -> TransferObject {
        let mut obj = TransferObject::new(RecordId::new(EntityKind::Exercise, "e-1").unwrap());
        obj.set(CREATED_KEY, FieldValue::Date(1000));
        obj.set(MODIFIED_KEY, FieldValue::Date(1000));
        obj.set(
            "workout",
            FieldValue::reference(&RecordId::new(EntityKind::Workout, workout).unwrap()),
        );
        obj.set("order", 0);
        obj.set("isRest", true);
        obj.set("isCircuit", true);
        obj.set("rest", 90);
        obj
    }

    #[test]
    fn rest_forces_circuit_flags_off() {
        let mut exercise = Exercise::new("e-1".into(), "w-1".into(), 0);
        exercise.is_circuit = true;
        exercise.has_circuit_rest = true;
        exercise.set_rest(true);

        assert!(!exercise.is_circuit);
        assert!(!exercise.has_circuit_rest);
    }

    #[test]
    fn merge_resolves_parent_and_normalizes() {
        let mut store = Store::new();
        let workout = store.create_workout("Push");
        let mut exercise = Exercise::materialize("e-1".into());

        let outcome = exercise.merge_from(&incoming(&workout), &store).unwrap();
        assert_eq!(outcome, MergeOutcome::Applied);
        assert_eq!(exercise.workout_id(), Some(workout.as_str()));
        assert!(exercise.is_rest());
        assert!(!exercise.is_circuit);
        assert_eq!(exercise.rest, Some(90.0));
        assert_eq!(exercise.stamps.created, Some(1000));
    }

    #[test]
    fn merge_fails_on_missing_parent() {
        let store = Store::new();
        let mut exercise = Exercise::materialize("e-1".into());

        assert!(matches!(
            exercise.merge_from(&incoming("w-gone"), &store),
            Err(Error::UnresolvedParent(_))
        ));
        assert!(!exercise.stamps.is_saved());
    }

    #[test]
    fn export_embeds_parent_reference() {
        let mut exercise = Exercise::new("e-1".into(), "w-1".into(), 3);
        exercise.stamps.stamp(1000);

        let obj = exercise.export().unwrap();
        let parent = obj.get("workout").and_then(FieldValue::as_reference).unwrap();
        assert_eq!(parent, RecordId::new(EntityKind::Workout, "w-1").unwrap());
        assert_eq!(obj.get("order"), Some(&FieldValue::Int(3)));
    }
}
