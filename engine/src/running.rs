//! Running-workout coordination.
//!
//! At most one workout runs at a time across the pair. The device performing
//! it owns the claim; while any claim is active, structural edits and remote
//! batch application are suspended on both devices.
//!
//! Ownership rules:
//! - a device claims only for itself, and not over the other device's claim;
//! - the owner may release its claim, and the phone may release the watch's;
//! - remote updates must carry the sender's own tag.

use crate::{error::Result, DeviceRole, Error, Progress, RecordId, RunningWorkout, Timestamp};

#[derive(Debug, Clone)]
pub struct Coordinator {
    role: DeviceRole,
    current: Option<RunningWorkout>,
}

impl Coordinator {
    pub fn new(role: DeviceRole) -> Self {
        Self::restore(role, None)
    }

    /// Rebuild from persisted state.
    pub fn restore(role: DeviceRole, current: Option<RunningWorkout>) -> Self {
        Self { role, current }
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn current(&self) -> Option<&RunningWorkout> {
        self.current.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    pub fn editing_enabled(&self) -> bool {
        !self.is_running()
    }

    /// Whether this device owns the active claim.
    pub fn owns_claim(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|running| running.source == self.role)
    }

    /// Start running `workout` on this device.
    pub fn claim(&mut self, workout: RecordId, now: Timestamp) -> Result<&RunningWorkout> {
        if let Some(running) = &self.current {
            if running.source != self.role {
                return Err(Error::NotPermitted(format!(
                    "{} is running on the {}",
                    running.workout, running.source
                )));
            }
        }

        Ok(&*self.current.insert(RunningWorkout {
            workout,
            source: self.role,
            started_at: Some(now),
            progress: None,
        }))
    }

    /// End the running workout. Returns the released claim, if there was one.
    pub fn release(&mut self) -> Result<Option<RunningWorkout>> {
        match &self.current {
            None => Ok(None),
            Some(running) if running.source == self.role || self.role == DeviceRole::Phone => {
                Ok(self.current.take())
            }
            Some(running) => Err(Error::NotPermitted(format!(
                "only the {} or the phone may end {}",
                running.source, running.workout
            ))),
        }
    }

    /// Apply a pointer update from the peer. Returns whether anything changed.
    pub fn apply_remote(&mut self, workout: Option<RecordId>, source: DeviceRole) -> Result<bool> {
        let sender = self.role.peer();
        if source != sender {
            return Err(Error::NotPermitted(format!(
                "{} sent an update tagged {}",
                sender, source
            )));
        }

        match workout {
            Some(workout) => {
                if self.owns_claim() {
                    return Err(Error::NotPermitted(format!(
                        "{} cannot claim over the {}'s workout",
                        sender, self.role
                    )));
                }
                if self.current.as_ref().is_some_and(|r| r.workout == workout) {
                    return Ok(false);
                }
                self.current = Some(RunningWorkout {
                    workout,
                    source,
                    started_at: None,
                    progress: None,
                });
                Ok(true)
            }
            None => match &self.current {
                None => Ok(false),
                Some(running) if running.source == sender || sender == DeviceRole::Phone => {
                    self.current = None;
                    Ok(true)
                }
                Some(running) => Err(Error::NotPermitted(format!(
                    "{} cannot end the {}'s workout",
                    sender, running.source
                ))),
            },
        }
    }

    /// Record the start time of the workout the peer is running.
    pub fn record_remote_start(&mut self, at: Timestamp) -> bool {
        let sender = self.role.peer();
        match self.current.as_mut() {
            Some(running) if running.source == sender => {
                running.started_at = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Record progress, either our own or the peer's.
    pub fn record_progress(&mut self, source: DeviceRole, progress: Progress) -> bool {
        match self.current.as_mut() {
            Some(running) if running.source == source => {
                running.progress = Some(progress);
                true
            }
            _ => false,
        }
    }
}
