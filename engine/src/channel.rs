//! The message channel between the two devices.
//!
//! The engine only needs to know whether the peer exists and can be talked
//! to, and how to hand it a payload. Replies and asynchronous failures of
//! immediate messages are fed back by the host through
//! `SyncEngine::handle_message` and `SyncEngine::handle_immediate_failure`.

use crate::{error::Result, Error};
use serde_json::Value;

pub trait Channel {
    /// A peer device is paired and has the app installed.
    fn is_paired(&self) -> bool;

    /// A session with the peer is active, so best-effort transfers will be
    /// delivered eventually.
    fn can_communicate(&self) -> bool;

    /// The peer is immediately available for live messages.
    fn is_reachable(&self) -> bool;

    /// Queue a payload for delivery. Delivery order is not guaranteed.
    fn send_best_effort(&mut self, payload: Value) -> Result<()>;

    /// Send a payload right now. Only valid while reachable.
    fn send_immediate(&mut self, payload: Value) -> Result<()>;
}

/// How a payload was handed to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    BestEffort,
    Immediate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub priority: Priority,
    pub payload: Value,
}

/// In-memory channel that records what was sent.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    pub paired: bool,
    pub communicating: bool,
    pub reachable: bool,
    /// Make every send fail with a channel error
    pub failing: bool,
    outbox: Vec<Outgoing>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    /// A paired, reachable peer.
    pub fn new() -> Self {
        Self {
            paired: true,
            communicating: true,
            reachable: true,
            failing: false,
            outbox: Vec::new(),
        }
    }

    pub fn unpaired() -> Self {
        Self {
            paired: false,
            communicating: false,
            reachable: false,
            ..Self::new()
        }
    }

    /// Peer paired but out of range.
    pub fn set_offline(&mut self) {
        self.communicating = false;
        self.reachable = false;
    }

    pub fn set_online(&mut self) {
        self.paired = true;
        self.communicating = true;
        self.reachable = true;
    }

    pub fn outbox(&self) -> &[Outgoing] {
        &self.outbox
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    fn push(&mut self, priority: Priority, payload: Value) -> Result<()> {
        if self.failing {
            return Err(Error::Channel("send failed".to_string()));
        }
        self.outbox.push(Outgoing { priority, payload });
        Ok(())
    }
}

impl Channel for MemoryChannel {
    fn is_paired(&self) -> bool {
        self.paired
    }

    fn can_communicate(&self) -> bool {
        self.paired && self.communicating
    }

    fn is_reachable(&self) -> bool {
        self.can_communicate() && self.reachable
    }

    fn send_best_effort(&mut self, payload: Value) -> Result<()> {
        if !self.can_communicate() {
            return Err(Error::Channel("peer session inactive".to_string()));
        }
        self.push(Priority::BestEffort, payload)
    }

    fn send_immediate(&mut self, payload: Value) -> Result<()> {
        if !self.is_reachable() {
            return Err(Error::Channel("peer not reachable".to_string()));
        }
        self.push(Priority::Immediate, payload)
    }
}
