//! Durable sync state owned by the engine.

use crate::{Error, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Which device this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Phone,
    Watch,
}

impl DeviceRole {
    /// Source tag used on the wire.
    pub fn tag(self) -> &'static str {
        match self {
            DeviceRole::Phone => "phone",
            DeviceRole::Watch => "watch",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "phone" => Some(DeviceRole::Phone),
            "watch" => Some(DeviceRole::Watch),
            _ => None,
        }
    }

    /// The other device of the pair.
    pub fn peer(self) -> Self {
        match self {
            DeviceRole::Phone => DeviceRole::Watch,
            DeviceRole::Watch => DeviceRole::Phone,
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DeviceRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(&s.to_ascii_lowercase())
            .ok_or_else(|| Error::InvalidOperation(format!("unknown device role: {}", s)))
    }
}

/// Position inside a running workout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub exercise_index: u32,
    pub part_index: u32,
    /// When this position was reached
    pub at: Timestamp,
}

/// The workout currently being performed, on one of the two devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningWorkout {
    pub workout: RecordId,
    /// Device that owns the claim
    pub source: DeviceRole,
    pub started_at: Option<Timestamp>,
    pub progress: Option<Progress>,
}

/// Everything the engine remembers between runs besides the queues.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncState {
    /// An initial sync has been sent (phone) or received (watch)
    pub initial_sync_done: bool,
    /// The phone has announced an initial batch that has not arrived yet
    pub awaiting_initial_data: bool,
    /// An initial batch is in the remote backlog; wipe before applying it
    pub pending_wipe: bool,
    pub running: Option<RunningWorkout>,
}
