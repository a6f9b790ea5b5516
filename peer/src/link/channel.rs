//! The engine's view of the HTTP link.

use super::{LinkState, Outbox, MESSAGE_PATH};
use crate::coordinator::Command;
use repsync_engine::{error::Result, Channel, Error as EngineError};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

const IMMEDIATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Channel over the peer link.
///
/// Best-effort payloads go to the durable outbox, so they are accepted
/// whenever a peer is configured. Immediate payloads are posted from a
/// spawned task; the reply, or the failure, comes back to the coordinator as
/// a command.
pub struct HttpChannel {
    link: Arc<LinkState>,
    outbox: Arc<Outbox>,
    client: reqwest::Client,
    commands: mpsc::UnboundedSender<Command>,
}

impl HttpChannel {
    pub fn new(
        link: Arc<LinkState>,
        outbox: Arc<Outbox>,
        client: reqwest::Client,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            link,
            outbox,
            client,
            commands,
        }
    }
}

impl Channel for HttpChannel {
    fn is_paired(&self) -> bool {
        self.link.is_paired()
    }

    fn can_communicate(&self) -> bool {
        self.link.is_paired()
    }

    fn is_reachable(&self) -> bool {
        self.link.is_reachable()
    }

    fn send_best_effort(&mut self, payload: Value) -> Result<()> {
        if !self.link.is_paired() {
            return Err(EngineError::Channel("no paired peer".to_string()));
        }
        self.outbox.enqueue(payload).map(|_| ())
    }

    fn send_immediate(&mut self, payload: Value) -> Result<()> {
        let url = match self.link.url(MESSAGE_PATH) {
            Some(url) if self.link.is_reachable() => url,
            _ => return Err(EngineError::Channel("peer not reachable".to_string())),
        };

        let client = self.client.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = async {
                client
                    .post(&url)
                    .timeout(IMMEDIATE_TIMEOUT)
                    .json(&payload)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<Value>()
                    .await
            }
            .await;

            let command = match result {
                Ok(Value::Null) => return,
                Ok(reply) => Command::Reply(reply),
                Err(e) => {
                    tracing::warn!(error = %e, "Immediate message failed");
                    Command::ImmediateFailed(payload)
                }
            };
            // The coordinator is gone only during shutdown.
            let _ = commands.send(command);
        });

        Ok(())
    }
}
