//! Durable queue of best-effort transfers and the worker that drains it.

use super::{LinkState, TRANSFER_PATH};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use repsync_engine::{error::Result, Error as EngineError, QueueBackend};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::Notify;
use uuid::Uuid;

const OUTBOX_KEY: &str = "outbox";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// One queued payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: Uuid,
    /// Delivery order
    pub seq: u64,
    pub payload: Value,
    pub queued_at: DateTime<Utc>,
}

/// Transfers waiting for the peer, persisted on every change.
///
/// Shared between the channel (enqueue), the delivery worker (drain) and the
/// health endpoint (size).
pub struct Outbox {
    pending: DashMap<u64, Transfer>,
    next_seq: AtomicU64,
    backend: Mutex<Box<dyn QueueBackend + Send>>,
    notify: Notify,
}

impl Outbox {
    /// Open the outbox, restoring whatever was still undelivered.
    pub fn open<B: QueueBackend + Send + 'static>(backend: B) -> Result<Arc<Self>> {
        let restored: Vec<Transfer> = match backend.load(OUTBOX_KEY)? {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };

        let next_seq = restored.iter().map(|t| t.seq + 1).max().unwrap_or(0);
        let pending = DashMap::new();
        for transfer in restored {
            pending.insert(transfer.seq, transfer);
        }
        if !pending.is_empty() {
            tracing::info!(transfers = pending.len(), "Restored undelivered transfers");
        }

        Ok(Arc::new(Self {
            pending,
            next_seq: AtomicU64::new(next_seq),
            backend: Mutex::new(Box::new(backend)),
            notify: Notify::new(),
        }))
    }

    /// Queue a payload. It is durable once this returns.
    pub fn enqueue(&self, payload: Value) -> Result<Uuid> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let transfer = Transfer {
            id: Uuid::new_v4(),
            seq,
            payload,
            queued_at: Utc::now(),
        };
        let id = transfer.id;
        self.pending.insert(seq, transfer);

        if let Err(e) = self.persist() {
            self.pending.remove(&seq);
            return Err(e);
        }

        tracing::debug!(transfer = %id, seq, "Transfer queued");
        self.notify.notify_one();
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The next transfer to deliver.
    pub fn front(&self) -> Option<Transfer> {
        let seq = self.pending.iter().map(|entry| *entry.key()).min()?;
        self.pending.get(&seq).map(|entry| entry.value().clone())
    }

    /// Drop a delivered transfer.
    pub fn complete(&self, seq: u64) -> Result<()> {
        if self.pending.remove(&seq).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    /// Wake the delivery worker, e.g. when the peer became reachable.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    fn persist(&self) -> Result<()> {
        let mut transfers: Vec<Transfer> = self
            .pending
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        transfers.sort_by_key(|t| t.seq);

        let mut backend = self
            .backend
            .lock()
            .map_err(|_| EngineError::Backend("outbox lock poisoned".to_string()))?;
        if transfers.is_empty() {
            backend.remove(OUTBOX_KEY)
        } else {
            backend.commit(OUTBOX_KEY, serde_json::to_value(&transfers)?)
        }
    }
}

/// Deliver queued transfers in order until the process exits. A failed
/// delivery is retried after `retry_interval` or when woken.
pub async fn run_delivery(
    outbox: Arc<Outbox>,
    link: Arc<LinkState>,
    client: reqwest::Client,
    retry_interval: Duration,
) {
    let Some(url) = link.url(TRANSFER_PATH) else {
        tracing::info!("No paired peer, delivery worker not started");
        return;
    };

    loop {
        let Some(transfer) = outbox.front() else {
            outbox.notify.notified().await;
            continue;
        };

        let result = client
            .post(&url)
            .timeout(DELIVERY_TIMEOUT)
            .json(&transfer.payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => {
                tracing::debug!(transfer = %transfer.id, seq = transfer.seq, "Transfer delivered");
                if let Err(e) = outbox.complete(transfer.seq) {
                    tracing::error!(error = %e, "Failed to persist outbox");
                }
            }
            Err(e) => {
                tracing::warn!(
                    transfer = %transfer.id,
                    pending = outbox.len(),
                    error = %e,
                    "Transfer delivery failed, will retry"
                );
                tokio::select! {
                    _ = tokio::time::sleep(retry_interval) => {}
                    _ = outbox.notify.notified() => {}
                }
            }
        }
    }
}
