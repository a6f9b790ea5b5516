//! Delayed retries.

use std::{collections::BTreeMap, time::Duration};

/// Work the engine asks to have re-run later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RetryTask {
    /// Re-apply the remote backlog.
    ApplyRemote,
    /// Re-send the local backlog.
    FlushLocal,
}

/// A cancellable delayed action. When a scheduled task comes due the host
/// calls `SyncEngine::handle_retry` with it.
///
/// Scheduling a task that is already scheduled replaces the earlier schedule.
pub trait Scheduler {
    fn schedule(&mut self, task: RetryTask, delay: Duration);
    fn cancel(&mut self, task: RetryTask);
}

/// Scheduler that only records requests; tests fire tasks by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    pending: BTreeMap<RetryTask, Duration>,
    history: Vec<(RetryTask, Duration)>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scheduled(&self, task: RetryTask) -> bool {
        self.pending.contains_key(&task)
    }

    pub fn delay_of(&self, task: RetryTask) -> Option<Duration> {
        self.pending.get(&task).copied()
    }

    /// Every schedule request so far, in order.
    pub fn history(&self) -> &[(RetryTask, Duration)] {
        &self.history
    }

    /// Drain the pending tasks as if their delays had elapsed.
    pub fn take_due(&mut self) -> Vec<RetryTask> {
        std::mem::take(&mut self.pending).into_keys().collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, task: RetryTask, delay: Duration) {
        self.pending.insert(task, delay);
        self.history.push((task, delay));
    }

    fn cancel(&mut self, task: RetryTask) {
        self.pending.remove(&task);
    }
}
