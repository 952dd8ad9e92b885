//! Test doubles for driving the loops without hardware.

use crate::registry::DeviceIndex;
use crate::traits::{Actuator, ActuatorError};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandKind {
    Position { position: f64, duration: Duration },
    Intensity { level: f64 },
}

/// One command as seen by the [`RecordingActuator`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Command {
    pub at: Instant,
    pub device: DeviceIndex,
    pub kind: CommandKind,
}

impl Command {
    pub fn position(&self) -> Option<(f64, Duration)> {
        match self.kind {
            CommandKind::Position { position, duration } => Some((position, duration)),
            CommandKind::Intensity { .. } => None,
        }
    }

    pub fn intensity(&self) -> Option<f64> {
        match self.kind {
            CommandKind::Intensity { level } => Some(level),
            CommandKind::Position { .. } => None,
        }
    }
}

/// [`Actuator`] that records every command with its (virtual) timestamp.
#[derive(Default)]
pub struct RecordingActuator {
    log: Mutex<Vec<Command>>,
    failures: Mutex<usize>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` commands with a transport error.
    pub fn fail_next(&self, n: usize) {
        *self.failures.lock().unwrap_or_else(PoisonError::into_inner) = n;
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn positions(&self) -> Vec<(f64, Duration)> {
        self.commands().iter().filter_map(Command::position).collect()
    }

    pub fn intensities(&self) -> Vec<f64> {
        self.commands().iter().filter_map(Command::intensity).collect()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record(&self, device: DeviceIndex, kind: CommandKind) -> Result<(), ActuatorError> {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if *failures > 0 {
            *failures -= 1;
            return Err(ActuatorError::Transport("injected failure".into()));
        }
        self.log.lock().unwrap_or_else(PoisonError::into_inner).push(Command {
            at: Instant::now(),
            device,
            kind,
        });
        Ok(())
    }
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn set_position(
        &self,
        device: DeviceIndex,
        position: f64,
        duration: Duration,
    ) -> Result<(), ActuatorError> {
        self.record(device, CommandKind::Position { position, duration })
    }

    async fn set_intensity(&self, device: DeviceIndex, level: f64) -> Result<(), ActuatorError> {
        self.record(device, CommandKind::Intensity { level })
    }
}
