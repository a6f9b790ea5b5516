//! HTTP link to the other device of the pair.
//!
//! Two kinds of traffic cross the link:
//! - best-effort transfers, queued durably in the [`Outbox`] and delivered
//!   in order by a background worker, retried until the peer accepts them;
//! - immediate messages, posted once while the peer answers its health probe,
//!   with the reply fed back to the coordinator.

mod channel;
mod outbox;
mod probe;

pub use channel::HttpChannel;
pub use outbox::{run_delivery, Outbox, Transfer};
pub use probe::run_probe;

use std::sync::atomic::{AtomicBool, Ordering};

/// Inbound best-effort payloads.
pub const TRANSFER_PATH: &str = "/link/transfer";
/// Inbound immediate payloads; the response body is the reply.
pub const MESSAGE_PATH: &str = "/link/message";
/// Probed to decide reachability.
pub const HEALTH_PATH: &str = "/health";

/// What this process knows about the other device.
#[derive(Debug)]
pub struct LinkState {
    peer_url: Option<String>,
    reachable: AtomicBool,
}

impl LinkState {
    pub fn new(peer_url: Option<String>) -> Self {
        Self {
            peer_url,
            reachable: AtomicBool::new(false),
        }
    }

    pub fn peer_url(&self) -> Option<&str> {
        self.peer_url.as_deref()
    }

    pub fn is_paired(&self) -> bool {
        self.peer_url.is_some()
    }

    pub fn is_reachable(&self) -> bool {
        self.is_paired() && self.reachable.load(Ordering::Acquire)
    }

    /// Record a probe result. Returns whether reachability changed.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        self.reachable.swap(reachable, Ordering::AcqRel) != reachable
    }

    /// Full URL of `path` on the peer.
    pub fn url(&self, path: &str) -> Option<String> {
        self.peer_url.as_ref().map(|base| format!("{}{}", base, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpaired_link_is_never_reachable() {
        let link = LinkState::new(None);
        link.set_reachable(true);
        assert!(!link.is_paired());
        assert!(!link.is_reachable());
        assert_eq!(link.url(HEALTH_PATH), None);
    }

    #[test]
    fn reachability_changes_are_reported_once() {
        let link = LinkState::new(Some("http://watch.local:3000".into()));
        assert!(link.set_reachable(true));
        assert!(!link.set_reachable(true));
        assert!(link.is_reachable());
        assert!(link.set_reachable(false));
        assert_eq!(
            link.url(MESSAGE_PATH).as_deref(),
            Some("http://watch.local:3000/link/message")
        );
    }
}
