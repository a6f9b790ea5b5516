//! Payloads exchanged between the two devices.
//!
//! ```text
//! { "changes": [obj], "deletion": [[type, id]], "isInitialData": true }
//! { "curWorkout": [[type, id] | ["nil"], "phone" | "watch"] }
//! { "curWorkoutStartDate": ms }
//! { "curWorkoutProgress": [exerciseIndex, partIndex, ms] }
//! { "watchNeedsData": true }   ->   { "dataIncoming": true }
//! ```

use crate::{DeviceRole, Progress, RecordId, Timestamp, TransferObject};
use serde_json::{json, Map, Value};

const CHANGES_KEY: &str = "changes";
const DELETION_KEY: &str = "deletion";
const INITIAL_DATA_KEY: &str = "isInitialData";
const CUR_WORKOUT_KEY: &str = "curWorkout";
const START_DATE_KEY: &str = "curWorkoutStartDate";
const PROGRESS_KEY: &str = "curWorkoutProgress";
const NEEDS_DATA_KEY: &str = "watchNeedsData";
const DATA_INCOMING_KEY: &str = "dataIncoming";
const NIL: &str = "nil";

/// A batch of changes and deletions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub changes: Vec<TransferObject>,
    pub deletions: Vec<RecordId>,
    /// Full replica sent for an initial sync
    pub initial: bool,
}

impl ChangeBatch {
    pub fn len(&self) -> usize {
        self.changes.len() + self.deletions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Changes(ChangeBatch),
    /// Running-workout pointer; `None` ends the workout.
    RunningWorkout {
        workout: Option<RecordId>,
        source: DeviceRole,
    },
    WorkoutStarted(Timestamp),
    WorkoutProgress(Progress),
    NeedsData,
    DataIncoming,
}

impl Message {
    /// Whether this message belongs on the low-latency channel.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Message::RunningWorkout { .. } | Message::WorkoutStarted(_) | Message::WorkoutProgress(_)
        )
    }

    pub fn encode(&self) -> Value {
        match self {
            Message::Changes(batch) => {
                let mut map = Map::new();
                map.insert(
                    CHANGES_KEY.to_string(),
                    Value::Array(TransferObject::encode_batch(&batch.changes)),
                );
                map.insert(
                    DELETION_KEY.to_string(),
                    Value::Array(batch.deletions.iter().map(RecordId::encode).collect()),
                );
                if batch.initial {
                    map.insert(INITIAL_DATA_KEY.to_string(), Value::Bool(true));
                }
                Value::Object(map)
            }
            Message::RunningWorkout { workout, source } => {
                let pointer = match workout {
                    Some(id) => id.encode(),
                    None => json!([NIL]),
                };
                json!({ CUR_WORKOUT_KEY: [pointer, source.tag()] })
            }
            Message::WorkoutStarted(at) => json!({ START_DATE_KEY: at }),
            Message::WorkoutProgress(progress) => json!({
                PROGRESS_KEY: [progress.exercise_index, progress.part_index, progress.at]
            }),
            Message::NeedsData => json!({ NEEDS_DATA_KEY: true }),
            Message::DataIncoming => json!({ DATA_INCOMING_KEY: true }),
        }
    }

    /// Decode a payload. Unknown or malformed payloads yield `None`; inside a
    /// changes batch, malformed elements are dropped instead.
    pub fn decode(value: &Value) -> Option<Self> {
        let map = value.as_object()?;

        if map.contains_key(CHANGES_KEY) || map.contains_key(DELETION_KEY) {
            return Some(Message::Changes(decode_batch(map)));
        }

        if let Some(pointer) = map.get(CUR_WORKOUT_KEY) {
            return decode_running(pointer);
        }

        if let Some(at) = map.get(START_DATE_KEY) {
            return at.as_u64().map(Message::WorkoutStarted);
        }

        if let Some(progress) = map.get(PROGRESS_KEY) {
            return match progress.as_array()?.as_slice() {
                [exercise, part, at] => Some(Message::WorkoutProgress(Progress {
                    exercise_index: u32::try_from(exercise.as_u64()?).ok()?,
                    part_index: u32::try_from(part.as_u64()?).ok()?,
                    at: at.as_u64()?,
                })),
                _ => None,
            };
        }

        if map.get(NEEDS_DATA_KEY).and_then(Value::as_bool) == Some(true) {
            return Some(Message::NeedsData);
        }

        if map.get(DATA_INCOMING_KEY).and_then(Value::as_bool) == Some(true) {
            return Some(Message::DataIncoming);
        }

        None
    }
}

fn decode_batch(map: &Map<String, Value>) -> ChangeBatch {
    let changes = map
        .get(CHANGES_KEY)
        .map(TransferObject::decode_batch)
        .unwrap_or_default();

    let deletions = map
        .get(DELETION_KEY)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let id = RecordId::decode(item);
                    if id.is_none() {
                        tracing::warn!("Dropping malformed deletion identifier");
                    }
                    id
                })
                .collect()
        })
        .unwrap_or_default();

    let initial = map
        .get(INITIAL_DATA_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false);

    ChangeBatch {
        changes,
        deletions,
        initial,
    }
}

fn decode_running(value: &Value) -> Option<Message> {
    let [pointer, source] = value.as_array()?.as_slice() else {
        return None;
    };
    let source = DeviceRole::from_tag(source.as_str()?)?;

    let workout = match pointer.as_array()?.as_slice() {
        [nil] if nil.as_str() == Some(NIL) => None,
        _ => Some(RecordId::decode(pointer)?),
    };

    Some(Message::RunningWorkout { workout, source })
}
