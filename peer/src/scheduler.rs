//! Retry timers on the tokio runtime.

use crate::coordinator::Command;
use repsync_engine::{RetryTask, Scheduler};
use std::{collections::HashMap, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};

/// Each scheduled task is a sleeping tokio task that posts
/// [`Command::Retry`] to the coordinator when it wakes. Rescheduling or
/// cancelling aborts the sleeper.
pub struct TokioScheduler {
    commands: mpsc::UnboundedSender<Command>,
    timers: HashMap<RetryTask, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            commands,
            timers: HashMap::new(),
        }
    }

    pub fn is_scheduled(&self, task: RetryTask) -> bool {
        self.timers
            .get(&task)
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, task: RetryTask, delay: Duration) {
        let commands = self.commands.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::Retry(task));
        });

        if let Some(previous) = self.timers.insert(task, timer) {
            previous.abort();
        }
    }

    fn cancel(&mut self, task: RetryTask) {
        if let Some(timer) = self.timers.remove(&task) {
            timer.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry_of(command: Option<Command>) -> Option<RetryTask> {
        match command {
            Some(Command::Retry(task)) => Some(task),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx);

        scheduler.schedule(RetryTask::ApplyRemote, Duration::from_secs(5));
        assert!(scheduler.is_scheduled(RetryTask::ApplyRemote));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(retry_of(rx.recv().await), Some(RetryTask::ApplyRemote));
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx);

        scheduler.schedule(RetryTask::FlushLocal, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(3)).await;
        scheduler.schedule(RetryTask::FlushLocal, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(retry_of(rx.recv().await), Some(RetryTask::FlushLocal));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx);

        scheduler.schedule(RetryTask::ApplyRemote, Duration::from_secs(5));
        scheduler.cancel(RetryTask::ApplyRemote);
        assert!(!scheduler.is_scheduled(RetryTask::ApplyRemote));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
