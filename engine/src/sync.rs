//! Synchronization engine.
//!
//! One `SyncEngine` runs per device. It owns the store, the pending-change
//! queues, the channel handle and the retry scheduler, and is driven entirely
//! by its host: local edits, inbound payloads, channel lifecycle callbacks and
//! due retries all arrive as method calls. Nothing here blocks or reads a
//! clock.
//!
//! Push: every local save is prepended with the unsent backlog and handed to
//! the channel, or persisted back to the backlog when the peer cannot be
//! reached.
//!
//! Pull: every inbound batch is merged with the unapplied backlog and applied
//! in one store transaction, deletions first and then parents before
//! children. A failed batch is rolled back, persisted and retried after
//! `retry_delay`. While a workout is running the batch is only persisted.

use crate::{
    channel::Channel,
    entity::{Entity, MergeOutcome},
    error::Result,
    message::{ChangeBatch, Message},
    queue::{IdQueue, PendingQueues, QueueBackend, QueueCounts},
    running::Coordinator,
    scheduler::{RetryTask, Scheduler},
    store::ChangeSet,
    DeviceRole, EntityKind, Error, Exercise, Progress, RecordId, RunningWorkout, Set, Store,
    SyncState, Timestamp, TransferObject, Workout,
};
use serde::Serialize;
use serde_json::Value;
use std::{collections::BTreeSet, time::Duration};
use tracing::{debug, error, info, warn};

/// Delay before a failed flush or apply is retried.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub role: DeviceRole,
    pub retry_delay: Duration,
}

impl SyncConfig {
    pub fn new(role: DeviceRole) -> Self {
        Self {
            role,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Idle,
    /// Local changes are waiting for the peer session
    AwaitingPeerReachable,
    Flushing,
    ApplyingRemote,
    /// A flush or apply failed and will be retried
    RetryScheduled,
}

/// Notifications for whoever presents the engine's state.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    EditingDisabled,
    EditingEnabled,
    RemoteChangesApplied {
        saved: usize,
        deleted: usize,
        initial: bool,
    },
    /// A batch arrived while a workout is running and was put aside
    RemoteChangesDeferred {
        pending: usize,
    },
    RemoteChangesFailed {
        error: Error,
    },
    InitialSyncSent {
        objects: usize,
    },
    InitialSyncReceived {
        objects: usize,
    },
    /// The watch asked for a full replica
    DataRequested,
    /// The phone announced a full replica
    DataIncoming,
    RunningWorkoutChanged(Option<RunningWorkout>),
    WorkoutStarted(Timestamp),
    WorkoutProgress(Progress),
}

/// Snapshot of the engine for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub role: DeviceRole,
    pub phase: SyncPhase,
    pub editing_enabled: bool,
    pub running: Option<RunningWorkout>,
    pub initial_sync_done: bool,
    pub awaiting_initial_data: bool,
    pub queues: QueueCounts,
    pub entities: usize,
}

/// Tally of one applied batch.
#[derive(Debug, Default)]
struct ApplyReport {
    saved: usize,
    deleted: usize,
    skipped: usize,
}

pub struct SyncEngine<C: Channel, S: Scheduler, B: QueueBackend> {
    config: SyncConfig,
    store: Store,
    queues: PendingQueues<B>,
    channel: C,
    scheduler: S,
    state: SyncState,
    coordinator: Coordinator,
    phase: SyncPhase,
    retries: BTreeSet<RetryTask>,
    /// Local backlog is waiting for the peer session
    awaiting_peer: bool,
    /// A running-workout update could not be delivered
    running_unsent: bool,
    events: Vec<SyncEvent>,
}

impl<C: Channel, S: Scheduler, B: QueueBackend> SyncEngine<C, S, B> {
    /// Build an engine over an existing store and queue backend. Sync state
    /// and any running workout are restored from the backend.
    pub fn new(config: SyncConfig, store: Store, backend: B, channel: C, scheduler: S) -> Self {
        let queues = PendingQueues::new(backend);
        let mut state = queues.load_state();
        let coordinator = Coordinator::restore(config.role, state.running.take());

        info!(
            role = %config.role,
            entities = store.len(),
            initial_sync_done = state.initial_sync_done,
            running = coordinator.is_running(),
            "Sync engine started"
        );

        Self {
            config,
            store,
            queues,
            channel,
            scheduler,
            state,
            coordinator,
            phase: SyncPhase::Idle,
            retries: BTreeSet::new(),
            awaiting_peer: false,
            running_unsent: false,
            events: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// The durable state as it is persisted.
    pub fn sync_state(&self) -> SyncState {
        SyncState {
            running: self.coordinator.current().cloned(),
            ..self.state.clone()
        }
    }

    pub fn running(&self) -> Option<&RunningWorkout> {
        self.coordinator.current()
    }

    pub fn editing_enabled(&self) -> bool {
        self.coordinator.editing_enabled()
    }

    pub fn queues(&self) -> &PendingQueues<B> {
        &self.queues
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            role: self.config.role,
            phase: self.phase,
            editing_enabled: self.editing_enabled(),
            running: self.coordinator.current().cloned(),
            initial_sync_done: self.state.initial_sync_done,
            awaiting_initial_data: self.state.awaiting_initial_data,
            queues: self.queues.counts(),
            entities: self.store.len(),
        }
    }

    /// Drain the events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Local edits and the push path
    // ------------------------------------------------------------------

    /// Run a local mutation, save it at `now` and push the result.
    ///
    /// The mutation runs in a store transaction and is rolled back if it
    /// fails. Refused while a workout is running.
    pub fn edit<T, F>(&mut self, now: Timestamp, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Store) -> Result<T>,
    {
        if !self.coordinator.editing_enabled() {
            return Err(Error::EditingDisabled);
        }

        self.store.begin()?;
        let value = match mutate(&mut self.store) {
            Ok(value) => {
                self.store.commit()?;
                value
            }
            Err(e) => {
                self.store.rollback()?;
                return Err(e);
            }
        };

        let changes = self.store.save(now);
        self.push_changes(changes);
        Ok(value)
    }

    /// Queue saved local changes behind the backlog and send them if the
    /// peer can be reached.
    pub fn push_changes(&mut self, changes: ChangeSet) {
        let mut ids = self.queues.load_ids(IdQueue::TransferLocal);
        ids.extend(changes.changed);
        let mut deletions = self.queues.load_ids(IdQueue::DeleteLocal);
        deletions.extend(changes.deleted);

        self.flush(dedup(ids), dedup(deletions));
        self.settle();
    }

    fn flush_local(&mut self) {
        self.push_changes(ChangeSet::default());
    }

    fn flush(&mut self, mut ids: Vec<RecordId>, deletions: Vec<RecordId>) {
        ids.retain(|id| !deletions.contains(id));

        if ids.is_empty() && deletions.is_empty() {
            self.clear_local_backlog();
            self.awaiting_peer = false;
            return;
        }

        if !self.channel.is_paired() || !self.channel.can_communicate() {
            debug!(
                changes = ids.len(),
                deletions = deletions.len(),
                "Peer unavailable, keeping local backlog"
            );
            self.persist_local_backlog(&ids, &deletions);
            self.awaiting_peer = true;
            return;
        }

        self.phase = SyncPhase::Flushing;
        let changes: Vec<TransferObject> = ids
            .iter()
            .filter_map(|id| {
                let exported = self.store.resolve(id).and_then(|entity| entity.export());
                if exported.is_none() {
                    debug!(%id, "Skipping entity that no longer exports");
                }
                exported
            })
            .collect();

        let batch = ChangeBatch {
            changes,
            deletions: deletions.clone(),
            initial: false,
        };
        let sent = batch.changes.len();

        match self.channel.send_best_effort(Message::Changes(batch).encode()) {
            Ok(()) => {
                info!(changes = sent, deletions = deletions.len(), "Local changes sent");
                self.clear_local_backlog();
                self.awaiting_peer = false;
                self.cancel_retry(RetryTask::FlushLocal);
            }
            Err(e) => {
                warn!(error = %e, "Failed to send local changes");
                self.persist_local_backlog(&ids, &deletions);
                self.schedule_retry(RetryTask::FlushLocal);
            }
        }
    }

    fn persist_local_backlog(&mut self, ids: &[RecordId], deletions: &[RecordId]) {
        if let Err(e) = self.queues.replace_ids(IdQueue::TransferLocal, ids) {
            error!(error = %e, "Failed to persist local change backlog");
        }
        if let Err(e) = self.queues.replace_ids(IdQueue::DeleteLocal, deletions) {
            error!(error = %e, "Failed to persist local deletion backlog");
        }
    }

    fn clear_local_backlog(&mut self) {
        if let Err(e) = self.queues.clear_ids(IdQueue::TransferLocal) {
            error!(error = %e, "Failed to clear local change backlog");
        }
        if let Err(e) = self.queues.clear_ids(IdQueue::DeleteLocal) {
            error!(error = %e, "Failed to clear local deletion backlog");
        }
    }

    // ------------------------------------------------------------------
    // Initial sync
    // ------------------------------------------------------------------

    /// Send the whole graph as one batch flagged initial. The receiver wipes
    /// its store before applying it.
    fn send_initial_sync(&mut self) -> bool {
        if !self.channel.is_paired() || !self.channel.can_communicate() {
            debug!("Peer unavailable, initial sync postponed");
            return false;
        }

        let changes: Vec<TransferObject> = self
            .store
            .graph_ids()
            .iter()
            .filter_map(|id| self.store.resolve(id)?.export())
            .map(|mut obj| {
                obj.mark_initial_sync();
                obj
            })
            .collect();
        let objects = changes.len();

        let batch = ChangeBatch {
            changes,
            deletions: Vec::new(),
            initial: true,
        };

        match self.channel.send_best_effort(Message::Changes(batch).encode()) {
            Ok(()) => {
                info!(objects, "Initial sync sent");
                self.state.initial_sync_done = true;
                self.persist_state();
                // The replica supersedes anything still queued.
                self.clear_local_backlog();
                self.awaiting_peer = false;
                self.cancel_retry(RetryTask::FlushLocal);
                self.events.push(SyncEvent::InitialSyncSent { objects });
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to send initial sync");
                false
            }
        }
    }

    fn initial_handshake(&mut self) {
        if self.state.initial_sync_done || !self.channel.is_paired() {
            return;
        }

        match self.config.role {
            DeviceRole::Phone => {
                self.send_initial_sync();
            }
            DeviceRole::Watch => {
                if self.state.awaiting_initial_data || !self.channel.is_reachable() {
                    return;
                }
                match self.channel.send_immediate(Message::NeedsData.encode()) {
                    Ok(()) => info!("Requested initial data from the phone"),
                    Err(e) => warn!(error = %e, "Failed to request initial data"),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound payloads and the pull path
    // ------------------------------------------------------------------

    /// Handle a payload from the peer. Returns the reply for payloads that
    /// arrived on the immediate channel and expect one.
    pub fn handle_message(&mut self, payload: &Value) -> Option<Value> {
        let Some(message) = Message::decode(payload) else {
            warn!("Ignoring unrecognized payload");
            return None;
        };

        let reply = match message {
            Message::Changes(batch) => {
                self.receive_batch(batch);
                None
            }
            Message::RunningWorkout { workout, source } => {
                self.receive_running(workout, source);
                None
            }
            Message::WorkoutStarted(at) => {
                if self.coordinator.record_remote_start(at) {
                    self.persist_state();
                    self.events.push(SyncEvent::WorkoutStarted(at));
                }
                None
            }
            Message::WorkoutProgress(progress) => {
                if self
                    .coordinator
                    .record_progress(self.config.role.peer(), progress)
                {
                    self.persist_state();
                    self.events.push(SyncEvent::WorkoutProgress(progress));
                }
                None
            }
            Message::NeedsData => self.receive_data_request(),
            Message::DataIncoming => {
                info!("Initial data announced");
                self.state.awaiting_initial_data = !self.state.initial_sync_done;
                self.persist_state();
                self.events.push(SyncEvent::DataIncoming);
                None
            }
        };

        self.settle();
        reply
    }

    /// An immediate message could not be delivered.
    pub fn handle_immediate_failure(&mut self, payload: &Value) {
        match Message::decode(payload) {
            Some(message) if message.is_live() => {
                warn!("Live update failed, falling back to best-effort delivery");
                let sent = self.channel.can_communicate()
                    && self.channel.send_best_effort(payload.clone()).is_ok();
                if !sent {
                    self.running_unsent = true;
                }
            }
            Some(Message::NeedsData) => {
                warn!("Data request failed; will ask again on next activation");
            }
            _ => warn!("Immediate message failed"),
        }
    }

    fn receive_data_request(&mut self) -> Option<Value> {
        self.events.push(SyncEvent::DataRequested);
        if self.config.role != DeviceRole::Phone {
            warn!("Ignoring data request on the watch");
            return None;
        }

        info!("Peer requested a full replica");
        self.state.initial_sync_done = false;
        if self.send_initial_sync() {
            Some(Message::DataIncoming.encode())
        } else {
            None
        }
    }

    fn receive_batch(&mut self, batch: ChangeBatch) {
        let ChangeBatch {
            changes,
            deletions,
            initial,
        } = batch;
        info!(
            changes = changes.len(),
            deletions = deletions.len(),
            initial,
            "Remote changes received"
        );

        let (saves, deletes) = if initial {
            // A full replica replaces whatever was still waiting.
            self.state.pending_wipe = true;
            self.persist_state();
            (changes, dedup(deletions))
        } else {
            let mut saves = self.queues.load_remote_saves();
            saves.extend(changes);
            let mut deletes = self.queues.load_ids(IdQueue::DeleteRemote);
            deletes.extend(deletions);
            (saves, dedup(deletes))
        };

        self.apply_remote(saves, deletes);
    }

    /// Re-run the pull path over the remote backlog.
    fn retry_remote(&mut self) -> bool {
        let saves = self.queues.load_remote_saves();
        let deletes = self.queues.load_ids(IdQueue::DeleteRemote);
        self.apply_remote(saves, deletes)
    }

    fn apply_remote(&mut self, mut saves: Vec<TransferObject>, deletes: Vec<RecordId>) -> bool {
        let wipe = self.state.pending_wipe;
        saves.retain(|obj| !deletes.contains(obj.id()));

        if saves.is_empty() && deletes.is_empty() && !wipe {
            self.clear_remote_backlog();
            self.cancel_retry(RetryTask::ApplyRemote);
            return true;
        }

        if self.coordinator.is_running() {
            let pending = saves.len() + deletes.len();
            info!(pending, "Workout running, deferring remote changes");
            self.persist_remote_backlog(&saves, &deletes);
            // Applied when the workout ends.
            self.cancel_retry(RetryTask::ApplyRemote);
            self.events.push(SyncEvent::RemoteChangesDeferred { pending });
            return false;
        }

        self.phase = SyncPhase::ApplyingRemote;
        self.events.push(SyncEvent::EditingDisabled);
        let result = self.apply_in_transaction(&saves, &deletes, wipe);
        self.events.push(SyncEvent::EditingEnabled);

        match result {
            Ok(report) => {
                info!(
                    saved = report.saved,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    initial = wipe,
                    "Remote changes applied"
                );
                self.clear_remote_backlog();
                self.cancel_retry(RetryTask::ApplyRemote);
                if wipe {
                    self.state.pending_wipe = false;
                    self.state.initial_sync_done = true;
                    self.state.awaiting_initial_data = false;
                    self.persist_state();
                    self.events.push(SyncEvent::InitialSyncReceived {
                        objects: report.saved,
                    });
                }
                self.events.push(SyncEvent::RemoteChangesApplied {
                    saved: report.saved,
                    deleted: report.deleted,
                    initial: wipe,
                });
                true
            }
            Err(e) => {
                warn!(error = %e, "Remote batch failed and was rolled back");
                self.persist_remote_backlog(&saves, &deletes);
                self.schedule_retry(RetryTask::ApplyRemote);
                self.events.push(SyncEvent::RemoteChangesFailed { error: e });
                false
            }
        }
    }

    fn apply_in_transaction(
        &mut self,
        saves: &[TransferObject],
        deletes: &[RecordId],
        wipe: bool,
    ) -> Result<ApplyReport> {
        self.store.begin()?;
        match self.apply_batch(saves, deletes, wipe) {
            Ok(report) => {
                self.store.commit()?;
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback) = self.store.rollback() {
                    error!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    fn apply_batch(
        &mut self,
        saves: &[TransferObject],
        deletes: &[RecordId],
        wipe: bool,
    ) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();

        if wipe {
            info!(entities = self.store.len(), "Wiping store for initial sync");
            self.store.wipe();
        }

        for id in deletes {
            if self.store.delete_synced(id) {
                report.deleted += 1;
            } else {
                debug!(%id, "Already deleted");
            }
        }

        // Objects skipped in this batch; their children are skipped with them.
        let mut skipped = BTreeSet::new();
        // Parents whose children were merged, renumbered once at the end.
        let mut touched = BTreeSet::new();

        for kind in EntityKind::ALL {
            for obj in saves.iter().filter(|obj| obj.id().kind() == kind) {
                let previous_parent = self.store.parent_of(obj.id());
                let outcome = match kind {
                    EntityKind::Workout => self.merge_object::<Workout>(obj, &mut skipped)?,
                    EntityKind::Exercise => self.merge_object::<Exercise>(obj, &mut skipped)?,
                    EntityKind::Set => self.merge_object::<Set>(obj, &mut skipped)?,
                };
                match outcome {
                    Some(MergeOutcome::Applied) => {
                        report.saved += 1;
                        touched.extend(previous_parent);
                        touched.extend(self.store.parent_of(obj.id()));
                    }
                    _ => report.skipped += 1,
                }
            }
        }

        for parent in &touched {
            self.store.renumber_synced(parent);
        }

        Ok(report)
    }

    /// Merge one object into its local entity, materializing it if it is new
    /// to this store. `None` means the object was skipped and its id is added
    /// to `skipped`.
    fn merge_object<E: Entity>(
        &mut self,
        obj: &TransferObject,
        skipped: &mut BTreeSet<RecordId>,
    ) -> Result<Option<MergeOutcome>> {
        let id = obj.id().id();
        let mut entity = match E::load_by_id(id, &self.store) {
            Some(existing) => existing.clone(),
            None if obj.is_new() || obj.is_initial_sync() => E::materialize(id.to_string()),
            None => {
                debug!(id = %obj.id(), "Skipping update for unknown entity");
                skipped.insert(obj.id().clone());
                return Ok(None);
            }
        };

        match entity.merge_from(obj, &self.store) {
            Ok(MergeOutcome::Applied) => {
                self.store.insert_synced(entity);
                Ok(Some(MergeOutcome::Applied))
            }
            Ok(outcome) => {
                debug!(id = %obj.id(), ?outcome, "Local copy kept");
                Ok(Some(outcome))
            }
            Err(Error::UnresolvedParent(parent)) if self.store.is_deleted(&parent) => {
                warn!(id = %obj.id(), %parent, "Skipping object whose parent was deleted");
                skipped.insert(obj.id().clone());
                Ok(None)
            }
            Err(Error::UnresolvedParent(parent)) if skipped.contains(&parent) => {
                warn!(id = %obj.id(), %parent, "Skipping object whose parent was skipped");
                skipped.insert(obj.id().clone());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn persist_remote_backlog(&mut self, saves: &[TransferObject], deletes: &[RecordId]) {
        if let Err(e) = self.queues.replace_remote_saves(saves) {
            error!(error = %e, "Failed to persist remote change backlog");
        }
        if let Err(e) = self.queues.replace_ids(IdQueue::DeleteRemote, deletes) {
            error!(error = %e, "Failed to persist remote deletion backlog");
        }
    }

    fn clear_remote_backlog(&mut self) {
        if let Err(e) = self.queues.clear_remote_saves() {
            error!(error = %e, "Failed to clear remote change backlog");
        }
        if let Err(e) = self.queues.clear_ids(IdQueue::DeleteRemote) {
            error!(error = %e, "Failed to clear remote deletion backlog");
        }
    }

    // ------------------------------------------------------------------
    // Running workout
    // ------------------------------------------------------------------

    /// Start running a workout on this device.
    pub fn start_workout(&mut self, workout_id: &str, now: Timestamp) -> Result<()> {
        let id = RecordId::new(EntityKind::Workout, workout_id)?;
        if !self.store.contains(&id) {
            return Err(Error::EntityNotFound(id));
        }

        let was_running = self.coordinator.is_running();
        let running = self.coordinator.claim(id.clone(), now)?.clone();
        info!(workout = %id, "Workout started");

        self.persist_state();
        if !was_running {
            self.events.push(SyncEvent::EditingDisabled);
        }
        self.events.push(SyncEvent::RunningWorkoutChanged(Some(running)));

        self.send_live(Message::RunningWorkout {
            workout: Some(id),
            source: self.config.role,
        });
        self.send_live(Message::WorkoutStarted(now));
        self.settle();
        Ok(())
    }

    /// Report progress through the workout running on this device.
    pub fn record_progress(&mut self, progress: Progress) -> Result<()> {
        if !self.coordinator.record_progress(self.config.role, progress) {
            return Err(Error::NotPermitted(
                "no workout is running on this device".to_string(),
            ));
        }
        self.persist_state();
        self.send_live(Message::WorkoutProgress(progress));
        Ok(())
    }

    /// End the running workout and apply anything deferred meanwhile.
    pub fn end_workout(&mut self) -> Result<()> {
        let Some(released) = self.coordinator.release()? else {
            return Ok(());
        };
        info!(workout = %released.workout, source = %released.source, "Workout ended");

        self.persist_state();
        self.events.push(SyncEvent::RunningWorkoutChanged(None));
        self.events.push(SyncEvent::EditingEnabled);
        self.send_live(Message::RunningWorkout {
            workout: None,
            source: self.config.role,
        });

        self.retry_remote();
        self.settle();
        Ok(())
    }

    fn receive_running(&mut self, workout: Option<RecordId>, source: DeviceRole) {
        let was_running = self.coordinator.is_running();
        match self.coordinator.apply_remote(workout, source) {
            Ok(true) => {
                self.persist_state();
                let current = self.coordinator.current().cloned();
                info!(running = current.is_some(), %source, "Running workout changed by peer");
                self.events.push(SyncEvent::RunningWorkoutChanged(current));

                let now_running = self.coordinator.is_running();
                if was_running && !now_running {
                    self.events.push(SyncEvent::EditingEnabled);
                    self.retry_remote();
                } else if !was_running && now_running {
                    self.events.push(SyncEvent::EditingDisabled);
                }
            }
            Ok(false) => debug!("Running workout unchanged"),
            Err(e) => warn!(error = %e, "Rejected running workout update"),
        }
    }

    /// Live updates go on the immediate channel when the peer is reachable,
    /// otherwise best-effort.
    fn send_live(&mut self, message: Message) {
        let payload = message.encode();

        if self.channel.is_reachable() {
            match self.channel.send_immediate(payload.clone()) {
                Ok(()) => {
                    self.running_unsent = false;
                    return;
                }
                Err(e) => warn!(error = %e, "Immediate send failed"),
            }
        }

        if self.channel.can_communicate() {
            match self.channel.send_best_effort(payload) {
                Ok(()) => {
                    self.running_unsent = false;
                    return;
                }
                Err(e) => warn!(error = %e, "Best-effort send failed"),
            }
        }

        debug!("Peer unavailable, running workout update kept for later");
        self.running_unsent = true;
    }

    /// Re-announce our side of the running-workout pointer.
    fn resend_running(&mut self) {
        let role = self.config.role;
        match self.coordinator.current().cloned() {
            Some(running) if running.source == role => {
                self.send_live(Message::RunningWorkout {
                    workout: Some(running.workout),
                    source: role,
                });
                if let Some(at) = running.started_at {
                    self.send_live(Message::WorkoutStarted(at));
                }
            }
            None if self.running_unsent => {
                self.send_live(Message::RunningWorkout {
                    workout: None,
                    source: role,
                });
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Channel lifecycle and retries
    // ------------------------------------------------------------------

    /// The channel session (re)activated.
    pub fn handle_activated(&mut self) {
        info!(
            paired = self.channel.is_paired(),
            communicating = self.channel.can_communicate(),
            reachable = self.channel.is_reachable(),
            "Channel activated"
        );
        self.catch_up();
    }

    pub fn handle_reachability_changed(&mut self) {
        let reachable = self.channel.is_reachable();
        info!(reachable, "Peer reachability changed");
        if self.channel.can_communicate() {
            self.catch_up();
        } else {
            self.settle();
        }
    }

    fn catch_up(&mut self) {
        self.flush_local();
        self.retry_remote();
        self.initial_handshake();
        self.resend_running();
        self.settle();
    }

    /// A scheduled retry came due.
    pub fn handle_retry(&mut self, task: RetryTask) {
        self.retries.remove(&task);
        debug!(?task, "Retry due");
        match task {
            RetryTask::ApplyRemote => {
                self.retry_remote();
            }
            RetryTask::FlushLocal => self.flush_local(),
        }
        self.settle();
    }

    fn schedule_retry(&mut self, task: RetryTask) {
        let delay = self.config.retry_delay;
        info!(?task, delay_ms = delay.as_millis() as u64, "Retry scheduled");
        self.scheduler.schedule(task, delay);
        self.retries.insert(task);
    }

    fn cancel_retry(&mut self, task: RetryTask) {
        if self.retries.remove(&task) {
            self.scheduler.cancel(task);
        }
    }

    fn persist_state(&mut self) {
        let state = self.sync_state();
        if let Err(e) = self.queues.save_state(&state) {
            error!(error = %e, "Failed to persist sync state");
        }
    }

    fn settle(&mut self) {
        self.phase = if !self.retries.is_empty() {
            SyncPhase::RetryScheduled
        } else if self.awaiting_peer {
            SyncPhase::AwaitingPeerReachable
        } else {
            SyncPhase::Idle
        };
    }
}

/// Drop repeated identifiers, keeping the first occurrence.
fn dedup(ids: Vec<RecordId>) -> Vec<RecordId> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBackend, MemoryChannel, ManualScheduler};

    type TestEngine = SyncEngine<MemoryChannel, ManualScheduler, MemoryBackend>;

    fn engine(role: DeviceRole, channel: MemoryChannel) -> TestEngine {
        SyncEngine::new(
            SyncConfig::new(role),
            Store::new(),
            MemoryBackend::new(),
            channel,
            ManualScheduler::new(),
        )
    }

    #[test]
    fn edit_sends_batch() {
        let mut phone = engine(DeviceRole::Phone, MemoryChannel::new());
        let id = phone.edit(1000, |s| Ok(s.create_workout("Push"))).unwrap();

        let sent = phone.channel_mut().take_outbox();
        assert_eq!(sent.len(), 1);
        let Some(Message::Changes(batch)) = Message::decode(&sent[0].payload) else {
            panic!("expected a batch");
        };
        assert_eq!(batch.changes.len(), 1);
        assert_eq!(batch.changes[0].id().id(), id);
        assert_eq!(phone.phase(), SyncPhase::Idle);
    }

    #[test]
    fn failed_edit_rolls_back() {
        let mut phone = engine(DeviceRole::Phone, MemoryChannel::new());
        let result = phone.edit(1000, |s| {
            s.create_workout("Half");
            s.add_exercise("missing", "Squat")
        });

        assert!(matches!(result, Err(Error::EntityNotFound(_))));
        assert!(phone.store().is_empty());
        assert!(phone.channel().outbox().is_empty());
    }

    #[test]
    fn offline_edits_accumulate_in_backlog() {
        let mut channel = MemoryChannel::new();
        channel.set_offline();
        let mut phone = engine(DeviceRole::Phone, channel);

        let w = phone.edit(1000, |s| Ok(s.create_workout("A"))).unwrap();
        phone.edit(2000, |s| s.add_exercise(&w, "Row")).unwrap();

        assert_eq!(phone.phase(), SyncPhase::AwaitingPeerReachable);
        assert_eq!(phone.status().queues.transfer_local, 2);
        assert!(phone.channel().outbox().is_empty());

        phone.channel_mut().set_online();
        phone.handle_reachability_changed();

        assert_eq!(phone.phase(), SyncPhase::Idle);
        assert_eq!(phone.status().queues.transfer_local, 0);
        let payloads: Vec<_> = phone.channel_mut().take_outbox();
        let Some(Message::Changes(batch)) = Message::decode(&payloads[0].payload) else {
            panic!("expected a batch");
        };
        assert_eq!(batch.changes.len(), 2);
    }

    #[test]
    fn send_failure_schedules_flush_retry() {
        let mut channel = MemoryChannel::new();
        channel.failing = true;
        let mut phone = engine(DeviceRole::Phone, channel);

        phone.edit(1000, |s| Ok(s.create_workout("A"))).unwrap();
        assert_eq!(phone.phase(), SyncPhase::RetryScheduled);
        assert_eq!(
            phone.scheduler().delay_of(RetryTask::FlushLocal),
            Some(DEFAULT_RETRY_DELAY)
        );

        phone.channel_mut().failing = false;
        for task in phone.scheduler_mut().take_due() {
            phone.handle_retry(task);
        }
        assert_eq!(phone.phase(), SyncPhase::Idle);
        assert_eq!(phone.channel().outbox().len(), 1);
    }

    #[test]
    fn editing_refused_while_running() {
        let mut phone = engine(DeviceRole::Phone, MemoryChannel::new());
        let w = phone.edit(1000, |s| Ok(s.create_workout("A"))).unwrap();
        phone.start_workout(&w, 2000).unwrap();

        assert_eq!(
            phone.edit(3000, |s| Ok(s.create_workout("B"))),
            Err(Error::EditingDisabled)
        );
        phone.end_workout().unwrap();
        assert!(phone.edit(4000, |s| Ok(s.create_workout("B"))).is_ok());
    }

    #[test]
    fn start_unknown_workout_fails() {
        let mut phone = engine(DeviceRole::Phone, MemoryChannel::new());
        assert!(matches!(
            phone.start_workout("nope", 1000),
            Err(Error::EntityNotFound(_))
        ));
        assert!(phone.editing_enabled());
    }

    #[test]
    fn live_updates_prefer_immediate_channel() {
        let mut channel = MemoryChannel::new();
        channel.reachable = false;
        let mut watch = engine(DeviceRole::Watch, channel);
        watch.state.initial_sync_done = true;

        let w = watch.edit(1000, |s| Ok(s.create_workout("A"))).unwrap();
        watch.channel_mut().take_outbox();

        watch.start_workout(&w, 2000).unwrap();
        let sent = watch.channel_mut().take_outbox();
        assert!(sent
            .iter()
            .all(|out| out.priority == crate::channel::Priority::BestEffort));

        watch.channel_mut().reachable = true;
        watch
            .record_progress(Progress {
                exercise_index: 0,
                part_index: 1,
                at: 3000,
            })
            .unwrap();
        let sent = watch.channel_mut().take_outbox();
        assert_eq!(sent[0].priority, crate::channel::Priority::Immediate);
    }

    #[test]
    fn state_survives_restart() {
        let backend = MemoryBackend::new();
        let mut watch = SyncEngine::new(
            SyncConfig::new(DeviceRole::Watch),
            Store::new(),
            backend.clone(),
            MemoryChannel::new(),
            ManualScheduler::new(),
        );
        let w = watch.edit(1000, |s| Ok(s.create_workout("A"))).unwrap();
        watch.start_workout(&w, 2000).unwrap();
        let store = watch.store().clone();
        drop(watch);

        let restarted = SyncEngine::new(
            SyncConfig::new(DeviceRole::Watch),
            store,
            backend,
            MemoryChannel::new(),
            ManualScheduler::new(),
        );
        assert!(restarted.running().is_some());
        assert!(!restarted.editing_enabled());
    }

    #[test]
    fn unrecognized_payload_is_ignored() {
        let mut phone = engine(DeviceRole::Phone, MemoryChannel::new());
        assert_eq!(phone.handle_message(&serde_json::json!({"hello": 1})), None);
        assert!(phone.take_events().is_empty());
    }
}
