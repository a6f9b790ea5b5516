//! Peer reachability probe.

use super::{LinkState, Outbox, HEALTH_PATH};
use crate::coordinator::Command;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// Poll the peer's health endpoint every `interval` and report changes to
/// the coordinator. Stops when the coordinator goes away.
pub async fn run_probe(
    link: Arc<LinkState>,
    outbox: Arc<Outbox>,
    client: reqwest::Client,
    interval: Duration,
    commands: mpsc::UnboundedSender<Command>,
) {
    let Some(url) = link.url(HEALTH_PATH) else {
        return;
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let reachable = client
            .get(&url)
            .timeout(interval.max(Duration::from_millis(500)))
            .send()
            .await
            .is_ok_and(|response| response.status().is_success());

        if !link.set_reachable(reachable) {
            continue;
        }

        tracing::info!(reachable, peer = %url, "Peer reachability changed");
        if reachable {
            outbox.wake();
        }
        if commands.send(Command::ReachabilityChanged).is_err() {
            break;
        }
    }
}
