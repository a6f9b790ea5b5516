//! The coordination task.
//!
//! One tokio task owns the sync engine and is the only place it is touched.
//! HTTP handlers, the link workers and retry timers talk to it through an
//! unbounded command channel; callers that need a result get it back on a
//! oneshot. After every command the store snapshot is rewritten if the store
//! changed, and the engine's events are logged.

use crate::{
    error::{AppError, Result},
    link::HttpChannel,
    scheduler::TokioScheduler,
    storage::{self, FileBackend},
};
use chrono::Utc;
use repsync_engine::{RetryTask, SyncEngine, SyncEvent, Timestamp};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

pub type PeerEngine = SyncEngine<HttpChannel, TokioScheduler, FileBackend>;

/// Work run against the engine inside the coordination task.
pub type Job = Box<dyn FnOnce(&mut PeerEngine) + Send>;

pub enum Command {
    /// Best-effort payload from the peer
    Transfer(Value),
    /// Immediate payload from the peer, answered with the reply if any
    Message {
        payload: Value,
        reply: oneshot::Sender<Option<Value>>,
    },
    /// The peer answered one of our immediate messages
    Reply(Value),
    /// One of our immediate messages could not be delivered
    ImmediateFailed(Value),
    ReachabilityChanged,
    Retry(RetryTask),
    Run(Job),
}

/// Milliseconds since the Unix epoch, for stamping local saves.
pub fn now_ms() -> Timestamp {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

pub struct Coordinator {
    engine: PeerEngine,
    data_dir: PathBuf,
    saved_revision: u64,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Coordinator {
    pub fn new(
        engine: PeerEngine,
        data_dir: PathBuf,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let saved_revision = engine.store().revision();
        Self {
            engine,
            data_dir,
            saved_revision,
            commands,
        }
    }

    /// Activate the channel session, then serve commands for the life of the
    /// process.
    pub async fn run(mut self) {
        self.engine.handle_activated();
        self.after_command();

        while let Some(command) = self.commands.recv().await {
            self.handle(command);
            self.after_command();
        }

        tracing::info!("Sync coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Transfer(payload) => {
                self.engine.handle_message(&payload);
            }
            Command::Message { payload, reply } => {
                let response = self.engine.handle_message(&payload);
                if reply.send(response).is_err() {
                    tracing::debug!("Immediate message caller went away");
                }
            }
            Command::Reply(payload) => {
                if let Some(response) = self.engine.handle_message(&payload) {
                    tracing::warn!(%response, "Dropping reply to a reply");
                }
            }
            Command::ImmediateFailed(payload) => self.engine.handle_immediate_failure(&payload),
            Command::ReachabilityChanged => self.engine.handle_reachability_changed(),
            Command::Retry(task) => self.engine.handle_retry(task),
            Command::Run(job) => job(&mut self.engine),
        }
    }

    fn after_command(&mut self) {
        let revision = self.engine.store().revision();
        if revision != self.saved_revision {
            match storage::save_store(&self.data_dir, self.engine.store()) {
                Ok(()) => self.saved_revision = revision,
                Err(e) => tracing::error!(error = %e, "Failed to write store snapshot"),
            }
        }

        for event in self.engine.take_events() {
            log_event(&event);
        }
    }
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::RemoteChangesApplied {
            saved,
            deleted,
            initial,
        } => tracing::info!(saved, deleted, initial, "Remote changes applied"),
        SyncEvent::RemoteChangesDeferred { pending } => {
            tracing::info!(pending, "Remote changes deferred")
        }
        SyncEvent::RemoteChangesFailed { error } => {
            tracing::warn!(%error, "Remote changes failed")
        }
        SyncEvent::InitialSyncSent { objects } => tracing::info!(objects, "Initial sync sent"),
        SyncEvent::InitialSyncReceived { objects } => {
            tracing::info!(objects, "Initial sync received")
        }
        SyncEvent::RunningWorkoutChanged(running) => tracing::info!(
            workout = ?running.as_ref().map(|r| r.workout.to_string()),
            source = ?running.as_ref().map(|r| r.source.tag()),
            "Running workout changed"
        ),
        other => tracing::debug!(event = ?other, "Sync event"),
    }
}

/// Cloneable handle for talking to the coordination task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    pub fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| AppError::Unavailable)
    }

    /// Hand over a best-effort payload from the peer.
    pub fn transfer(&self, payload: Value) -> Result<()> {
        self.send(Command::Transfer(payload))
    }

    /// Hand over an immediate payload from the peer and wait for the reply.
    pub async fn message(&self, payload: Value) -> Result<Option<Value>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Message { payload, reply })?;
        response.await.map_err(|_| AppError::Unavailable)
    }

    /// Run `f` against the engine and wait for its result.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PeerEngine) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.send(Command::Run(Box::new(move |engine| {
            let _ = reply.send(f(engine));
        })))?;
        response.await.map_err(|_| AppError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use repsync_engine::{DeviceRole, SyncPhase};
    use serde_json::json;

    #[tokio::test]
    async fn edits_are_snapshotted_before_the_next_command() {
        let dir = tempfile::tempdir().unwrap();
        let state = crate::start(Config::local(DeviceRole::Phone, dir.path().to_path_buf())).unwrap();

        let id = state
            .coordinator
            .run(|engine| engine.edit(now_ms(), |store| Ok(store.create_workout("Pull"))))
            .await
            .unwrap()
            .unwrap();
        let phase = state.coordinator.run(|engine| engine.phase()).await.unwrap();
        assert_eq!(phase, SyncPhase::AwaitingPeerReachable);

        let store = storage::load_store(dir.path()).unwrap();
        assert_eq!(store.workout(&id).map(|w| w.name.as_str()), Some("Pull"));
    }

    #[tokio::test]
    async fn inbound_request_is_answered() {
        let dir = tempfile::tempdir().unwrap();
        let state = crate::start(Config::local(DeviceRole::Watch, dir.path().to_path_buf())).unwrap();

        // A watch never answers a data request.
        let reply = state
            .coordinator
            .message(json!({ "watchNeedsData": true }))
            .await
            .unwrap();
        assert_eq!(reply, None);
    }
}
