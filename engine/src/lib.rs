//! # RepSync Engine
//!
//! Deterministic replication of a workout log between a phone and its watch.
//!
//! Both devices keep a full copy of the same object graph (workouts, their
//! exercises, their sets) and exchange changes over an intermittent
//! store-and-forward channel. This crate holds all of the sync logic and none
//! of the IO: time, transport, durable storage and timers are supplied by the
//! host through small traits.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, sockets or clocks
//! - **Deterministic**: the same calls with the same `now` values give the same result
//! - **Idempotent**: replaying a batch is harmless, so every failure is retried
//!
//! ## Core Concepts
//!
//! ### Record identity
//!
//! Every entity is named by a [`RecordId`], a `(kind, id)` pair that is the
//! same on both devices. [`EntityKind`] is a closed enum, so resolving an id
//! back to an entity is a static table lookup.
//!
//! ### Transfer objects
//!
//! Entities travel as [`TransferObject`]s: an id plus a loosely typed field
//! map carrying the `created` / `modified` stamps and the entity's fields.
//!
//! ### Last-writer-wins
//!
//! An incoming object replaces the local entity only if its `modified` stamp
//! is strictly newer. Ties keep the local copy. See [`MergeOutcome`].
//!
//! ### Pending-change queues
//!
//! Unsent local changes and unapplied remote changes are kept in durable
//! queues ([`PendingQueues`]) so nothing is lost across failures and restarts.
//!
//! ### Running workout
//!
//! While a workout runs on either device, editing and remote batch
//! application are suspended; remote batches are deferred to the backlog.
//!
//! ## Quick Start
//!
//! ```rust
//! use repsync_engine::{
//!     DeviceRole, ManualScheduler, MemoryBackend, MemoryChannel, Store, SyncConfig, SyncEngine,
//! };
//!
//! let mut phone = SyncEngine::new(
//!     SyncConfig::new(DeviceRole::Phone),
//!     Store::new(),
//!     MemoryBackend::new(),
//!     MemoryChannel::new(),
//!     ManualScheduler::new(),
//! );
//! let mut watch = SyncEngine::new(
//!     SyncConfig::new(DeviceRole::Watch),
//!     Store::new(),
//!     MemoryBackend::new(),
//!     MemoryChannel::new(),
//!     ManualScheduler::new(),
//! );
//!
//! // 1. Edit locally; the change is saved at `now` and pushed.
//! let workout = phone
//!     .edit(1_700_000_000_000, |store| {
//!         let workout = store.create_workout("Push day");
//!         store.add_exercise(&workout, "Bench press")?;
//!         Ok(workout)
//!     })
//!     .unwrap();
//!
//! // 2. Deliver what the phone sent.
//! for outgoing in phone.channel_mut().take_outbox() {
//!     watch.handle_message(&outgoing.payload);
//! }
//!
//! // 3. The watch now holds the same graph.
//! assert_eq!(watch.store().workout(&workout).unwrap().name, "Push day");
//! assert_eq!(watch.store().exercises_of(&workout).len(), 1);
//! ```
//!
//! ## Persistence
//!
//! Use [`Store::export_state`] and [`Store::import_state`] with [`StoreSnapshot`]
//! to persist the graph. Queues and sync state persist through a
//! [`QueueBackend`] on every write.

pub mod channel;
pub mod entity;
pub mod error;
pub mod message;
pub mod queue;
pub mod record_id;
pub mod running;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod sync;
pub mod transfer;

// Re-export main types at crate root
pub use channel::{Channel, MemoryChannel, Outgoing, Priority};
pub use entity::{AnyEntity, Entity, EntityRef, Exercise, MergeOutcome, Set, Stamps, Workout};
pub use error::Error;
pub use message::{ChangeBatch, Message};
pub use queue::{IdQueue, MemoryBackend, PendingQueues, QueueBackend, QueueCounts};
pub use record_id::{EntityKind, RecordId};
pub use running::Coordinator;
pub use scheduler::{ManualScheduler, RetryTask, Scheduler};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use state::{DeviceRole, Progress, RunningWorkout, SyncState};
pub use store::{ChangeSet, CompactReport, Store};
pub use sync::{SyncConfig, SyncEngine, SyncEvent, SyncPhase, SyncStatus, DEFAULT_RETRY_DELAY};
pub use transfer::{FieldValue, TransferObject};

/// Store-local entity identifier
pub type EntityId = String;
/// Milliseconds since the Unix epoch
pub type Timestamp = u64;
