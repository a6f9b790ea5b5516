//! RepSync Peer - the host process for one device of a phone/watch pair.
//!
//! The peer owns a `repsync-engine` instance inside a single coordination
//! task, persists its store and queues under the data directory, talks to
//! the other device over HTTP and exposes a small local API standing in for
//! the app's UI.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod link;
pub mod routes;
pub mod scheduler;
pub mod storage;

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::link::{HttpChannel, LinkState, Outbox};
use crate::scheduler::TokioScheduler;
use crate::storage::FileBackend;
use axum::Router;
use chrono::{DateTime, Utc};
use repsync_engine::{SyncConfig, SyncEngine};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub coordinator: CoordinatorHandle,
    pub link: Arc<LinkState>,
    pub outbox: Arc<Outbox>,
    pub started_at: DateTime<Utc>,
}

/// Restore persisted state and start the coordination task plus, when a
/// peer is configured, the delivery worker and reachability probe.
///
/// Must be called from within a tokio runtime.
pub fn start(config: Config) -> error::Result<AppState> {
    let backend = FileBackend::open(&config.data_dir)?;
    let store = storage::load_store(&config.data_dir)?;
    let outbox = Outbox::open(FileBackend::open(config.data_dir.join("link"))?)?;
    let link = Arc::new(LinkState::new(config.peer_url.clone()));
    let client = reqwest::Client::new();

    let (commands, inbox) = mpsc::unbounded_channel();
    let channel = HttpChannel::new(link.clone(), outbox.clone(), client.clone(), commands.clone());
    let scheduler = TokioScheduler::new(commands.clone());
    let engine = SyncEngine::new(
        SyncConfig::new(config.role).with_retry_delay(config.retry_delay),
        store,
        backend,
        channel,
        scheduler,
    );

    tokio::spawn(Coordinator::new(engine, config.data_dir.clone(), inbox).run());

    if link.is_paired() {
        tokio::spawn(link::run_delivery(
            outbox.clone(),
            link.clone(),
            client.clone(),
            config.retry_delay,
        ));
        tokio::spawn(link::run_probe(
            link.clone(),
            outbox.clone(),
            client,
            config.probe_interval,
            commands.clone(),
        ));
    } else {
        tracing::warn!("PEER_URL not set, running unpaired");
    }

    Ok(AppState {
        config: Arc::new(config),
        coordinator: CoordinatorHandle::new(commands),
        link,
        outbox,
        started_at: Utc::now(),
    })
}

/// Build the router with its middleware.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
