use super::{bool_field, gate, optional, string_field, Entity, MergeGate, MergeOutcome, Stamps};
use crate::{error::Result, EntityId, EntityKind, Store, TransferObject};
use serde::{Deserialize, Serialize};

/// A named routine: an ordered list of exercises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workout {
    pub(crate) id: EntityId,
    pub(crate) stamps: Stamps,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
}

impl Workout {
    pub(crate) fn new(id: EntityId, name: String) -> Self {
        Self {
            id,
            stamps: Stamps::default(),
            name,
            archived: false,
        }
    }
}

impl Entity for Workout {
    const KIND: EntityKind = EntityKind::Workout;

    fn id(&self) -> &str {
        &self.id
    }

    fn stamps(&self) -> &Stamps {
        &self.stamps
    }

    fn load_by_id<'a>(id: &str, store: &'a Store) -> Option<&'a Self> {
        store.workout(id)
    }

    fn materialize(id: EntityId) -> Self {
        Self::new(id, String::new())
    }

    fn export_fields(&self, obj: &mut TransferObject) {
        obj.set("name", self.name.as_str());
        obj.set("archived", self.archived);
    }

    fn merge_from(&mut self, obj: &TransferObject, _store: &Store) -> Result<MergeOutcome> {
        let stamps = match gate(&self.record_id(), &self.stamps, obj)? {
            MergeGate::Proceed(stamps) => stamps,
            MergeGate::Skip(outcome) => return Ok(outcome),
        };

        let name = string_field(obj, "name")?;
        let archived = optional(obj, "archived", bool_field)?.unwrap_or(false);

        self.name = name;
        self.archived = archived;
        self.stamps = stamps;
        Ok(MergeOutcome::Applied)
    }
}
