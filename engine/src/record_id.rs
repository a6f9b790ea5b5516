//! Cross-device record identity.
//!
//! Every persisted entity is named by a `(type, id)` pair. The type half is a
//! closed enumeration so resolving an identifier back to an entity is a static
//! dispatch rather than a lookup by type name at runtime.

use crate::{error::Result, EntityId, Error};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// The replicated entity kinds.
///
/// Declaration order is the topological apply order: parents before children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Workout,
    Exercise,
    Set,
}

impl EntityKind {
    /// All kinds, parents first.
    pub const ALL: [EntityKind; 3] = [EntityKind::Workout, EntityKind::Exercise, EntityKind::Set];

    /// Name used on the wire.
    pub fn type_name(self) -> &'static str {
        match self {
            EntityKind::Workout => "Workout",
            EntityKind::Exercise => "Exercise",
            EntityKind::Set => "Set",
        }
    }

    /// Look up a kind by its wire name.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Stable identifier of one entity, shared by both devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    kind: EntityKind,
    id: EntityId,
}

impl RecordId {
    /// Create an identifier. Fails on an empty id.
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidIdentifier(format!("empty id for {}", kind)));
        }
        Ok(Self { kind, id })
    }

    /// Create an identifier from a wire type name and id.
    pub fn parse(type_name: &str, id: impl Into<EntityId>) -> Result<Self> {
        if type_name.is_empty() {
            return Err(Error::InvalidIdentifier("empty type".to_string()));
        }
        let kind = EntityKind::from_type_name(type_name)
            .ok_or_else(|| Error::UnknownEntityKind(type_name.to_string()))?;
        Self::new(kind, id)
    }

    /// Identifier of an entity already held by a store, whose id is never empty.
    pub(crate) fn from_store(kind: EntityKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Encode as the wire pair `[type, id]`.
    pub fn encode(&self) -> Value {
        Value::Array(vec![
            Value::String(self.kind.type_name().to_string()),
            Value::String(self.id.clone()),
        ])
    }

    /// Decode the wire pair. Anything but exactly two non-empty strings naming
    /// a known kind yields `None`.
    pub fn decode(value: &Value) -> Option<Self> {
        match value.as_array()?.as_slice() {
            [Value::String(type_name), Value::String(id)] => Self::parse(type_name, id.clone()).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (self.kind.type_name(), &self.id).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (type_name, id) = <(String, String)>::deserialize(deserializer)?;
        RecordId::parse(&type_name, id).map_err(de::Error::custom)
    }
}
