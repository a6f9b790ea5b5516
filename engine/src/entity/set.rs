use super::{float_field, gate, int_field, parent_field, Entity, MergeGate, MergeOutcome, Stamps};
use crate::{error::Result, EntityId, EntityKind, FieldValue, RecordId, Store, TransferObject};
use serde::{Deserialize, Serialize};

/// A single set of an exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Set {
    pub(crate) id: EntityId,
    pub(crate) stamps: Stamps,
    pub(crate) exercise: Option<EntityId>,
    pub(crate) order: i32,
    pub reps: i32,
    /// Load in kilograms.
    pub weight: f64,
}

impl Set {
    pub(crate) fn new(id: EntityId, exercise: EntityId, order: i32, reps: i32, weight: f64) -> Self {
        Self {
            id,
            stamps: Stamps::default(),
            exercise: Some(exercise),
            order,
            reps,
            weight,
        }
    }

    pub fn exercise_id(&self) -> Option<&str> {
        self.exercise.as_deref()
    }

    pub fn order(&self) -> i32 {
        self.order
    }
}

impl Entity for Set {
    const KIND: EntityKind = EntityKind::Set;

    fn id(&self) -> &str {
        &self.id
    }

    fn stamps(&self) -> &Stamps {
        &self.stamps
    }

    fn load_by_id<'a>(id: &str, store: &'a Store) -> Option<&'a Self> {
        store.set(id)
    }

    fn materialize(id: EntityId) -> Self {
        Self {
            id,
            stamps: Stamps::default(),
            exercise: None,
            order: 0,
            reps: 0,
            weight: 0.0,
        }
    }

    fn export_fields(&self, obj: &mut TransferObject) {
        if let Some(exercise) = &self.exercise {
            let parent = RecordId::from_store(EntityKind::Exercise, exercise);
            obj.set("exercise", FieldValue::reference(&parent));
        }
        obj.set("order", self.order);
        obj.set("reps", self.reps);
        obj.set("weight", self.weight);
    }

    fn merge_from(&mut self, obj: &TransferObject, store: &Store) -> Result<MergeOutcome> {
        let stamps = match gate(&self.record_id(), &self.stamps, obj)? {
            MergeGate::Proceed(stamps) => stamps,
            MergeGate::Skip(outcome) => return Ok(outcome),
        };

        let order = int_field(obj, "order")?;
        let reps = int_field(obj, "reps")?;
        let weight = float_field(obj, "weight")?;
        let exercise = parent_field(obj, "exercise", EntityKind::Exercise, store)?;

        self.exercise = Some(exercise);
        self.order = order;
        self.reps = reps;
        self.weight = weight;
        self.stamps = stamps;
        Ok(MergeOutcome::Applied)
    }
}
