//! Transfer objects: loosely typed snapshots of an entity for the wire.

use crate::{error::Result, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserved key holding the first-save timestamp.
pub const CREATED_KEY: &str = "created";
/// Reserved key holding the last-save timestamp.
pub const MODIFIED_KEY: &str = "modified";
/// Transient marker for objects shipped as part of an initial sync.
pub const INITIAL_SYNC_KEY: &str = "__initialSync";

/// A single field value.
///
/// Externally tagged on the wire so dates and integers stay distinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(Timestamp),
    Array(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Floats accept integers as well.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<Timestamp> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Encode a record identifier as a two-string array field.
    pub fn reference(id: &RecordId) -> Self {
        FieldValue::Array(vec![
            FieldValue::String(id.kind().type_name().to_string()),
            FieldValue::String(id.id().to_string()),
        ])
    }

    /// Decode a two-string array field back into a record identifier.
    pub fn as_reference(&self) -> Option<RecordId> {
        match self.as_array()? {
            [FieldValue::String(type_name), FieldValue::String(id)] => {
                RecordId::parse(type_name, id.clone()).ok()
            }
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value.into())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Serializable key/value snapshot of one entity.
///
/// The identity is fixed at construction; the field map stays mutable until
/// the object is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferObject {
    id: RecordId,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
}

impl TransferObject {
    /// Create an empty transfer object for an identifier.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.fields.remove(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn created(&self) -> Option<Timestamp> {
        self.get(CREATED_KEY).and_then(FieldValue::as_date)
    }

    pub fn modified(&self) -> Option<Timestamp> {
        self.get(MODIFIED_KEY).and_then(FieldValue::as_date)
    }

    /// Never updated since creation on the sending side.
    pub fn is_new(&self) -> bool {
        match (self.created(), self.modified()) {
            (Some(created), Some(modified)) => created == modified,
            _ => false,
        }
    }

    pub fn is_initial_sync(&self) -> bool {
        self.get(INITIAL_SYNC_KEY)
            .and_then(FieldValue::as_bool)
            .unwrap_or(false)
    }

    pub fn mark_initial_sync(&mut self) {
        self.fields
            .insert(INITIAL_SYNC_KEY.to_string(), FieldValue::Bool(true));
    }

    /// Encode to the generic wire map.
    pub fn encode(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode from the generic wire map.
    pub fn decode(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Encode many objects, skipping any that fail to encode.
    pub fn encode_batch(objects: &[TransferObject]) -> Vec<Value> {
        objects
            .iter()
            .filter_map(|obj| match obj.encode() {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(id = %obj.id, error = %e, "Dropping unencodable transfer object");
                    None
                }
            })
            .collect()
    }

    /// Decode an array of objects. Malformed elements are dropped; a
    /// non-array decodes to nothing.
    pub fn decode_batch(value: &Value) -> Vec<TransferObject> {
        let Some(items) = value.as_array() else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| {
                let decoded = Self::decode(item);
                if decoded.is_none() {
                    tracing::warn!("Dropping malformed transfer object");
                }
                decoded
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityKind;
    use serde_json::json;

    fn workout_id() -> RecordId {
        RecordId::new(EntityKind::Workout, "w-1").unwrap()
    }

    #[test]
    fn wire_shape() {
        let mut obj = TransferObject::new(workout_id());
        obj.set("name", "Push day");
        obj.set(CREATED_KEY, FieldValue::Date(1000));

        assert_eq!(
            obj.encode().unwrap(),
            json!({
                "id": ["Workout", "w-1"],
                "fields": {
                    "created": {"date": 1000},
                    "name": {"string": "Push day"}
                }
            })
        );
    }

    #[test]
    fn is_new_requires_equal_stamps() {
        let mut obj = TransferObject::new(workout_id());
        assert!(!obj.is_new());

        obj.set(CREATED_KEY, FieldValue::Date(1000));
        assert!(!obj.is_new());

        obj.set(MODIFIED_KEY, FieldValue::Date(1000));
        assert!(obj.is_new());

        obj.set(MODIFIED_KEY, FieldValue::Date(2000));
        assert!(!obj.is_new());
        assert_eq!(obj.created(), Some(1000));
        assert_eq!(obj.modified(), Some(2000));
    }

    #[test]
    fn initial_sync_marker() {
        let mut obj = TransferObject::new(workout_id());
        assert!(!obj.is_initial_sync());
        obj.mark_initial_sync();
        assert!(obj.is_initial_sync());
    }

    #[test]
    fn decode_batch_drops_malformed_elements() {
        let good = TransferObject::new(workout_id()).encode().unwrap();
        let batch = json!([
            good,
            {"id": ["Workout"], "fields": {}},
            {"id": ["Routine", "r-1"], "fields": {}},
            "not an object",
            {"fields": {}}
        ]);

        let decoded = TransferObject::decode_batch(&batch);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id(), &workout_id());

        assert!(TransferObject::decode_batch(&json!({"id": 1})).is_empty());
    }

    #[test]
    fn reference_fields() {
        let parent = RecordId::new(EntityKind::Exercise, "e-9").unwrap();
        let field = FieldValue::reference(&parent);
        assert_eq!(field.as_reference(), Some(parent));
        assert_eq!(FieldValue::from("e-9").as_reference(), None);
    }

    #[test]
    fn float_accepts_int() {
        assert_eq!(FieldValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Bool(true).as_f64(), None);
    }
}
