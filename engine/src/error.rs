//! Error types for the RepSync engine.

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the RepSync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Identity errors
    #[error("invalid record identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("entity not found: {0}")]
    EntityNotFound(RecordId),

    // Merge errors
    #[error("identity mismatch: expected {expected}, got {actual}")]
    IdentityMismatch { expected: RecordId, actual: RecordId },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("type mismatch for field '{field}': expected {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("parent does not resolve: {0}")]
    UnresolvedParent(RecordId),

    // Store errors
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("transaction already open")]
    TransactionOpen,

    #[error("no open transaction")]
    NoTransaction,

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    // Sync errors
    #[error("editing is disabled while a workout is running")]
    EditingDisabled,

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityKind;

    #[test]
    fn error_display() {
        let err = Error::MissingField("name".into());
        assert_eq!(err.to_string(), "missing required field: name");

        let err = Error::TypeMismatch {
            field: "reps".into(),
            expected: "Int".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for field 'reps': expected Int"
        );

        let id = RecordId::new(EntityKind::Workout, "w-1").unwrap();
        let err = Error::EntityNotFound(id);
        assert_eq!(err.to_string(), "entity not found: Workout/w-1");
    }
}
