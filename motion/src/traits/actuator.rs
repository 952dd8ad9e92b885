use crate::registry::{Capability, DeviceIndex};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("device link is down")]
    Disconnected,
    #[error("no device with index {0}")]
    UnknownDevice(DeviceIndex),
    #[error("device {device} has no {capability} actuator")]
    Unsupported {
        device: DeviceIndex,
        capability: Capability,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Command primitive of the actuator driver.
///
/// Only the control loops should invoke these. Positions and levels are
/// normalized to `[0, 1]`; implementations clamp anything outside.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Move a linear actuator to `position` over `duration`.
    async fn set_position(
        &self,
        device: DeviceIndex,
        position: f64,
        duration: Duration,
    ) -> Result<(), ActuatorError>;

    /// Drive a vibration actuator at `level`.
    async fn set_intensity(&self, device: DeviceIndex, level: f64) -> Result<(), ActuatorError>;
}

/// [`Actuator`] implementation that does nothing.
#[derive(Clone, Default)]
pub struct NoopActuator;

#[async_trait]
impl Actuator for NoopActuator {
    async fn set_position(&self, _: DeviceIndex, _: f64, _: Duration) -> Result<(), ActuatorError> {
        Ok(())
    }

    async fn set_intensity(&self, _: DeviceIndex, _: f64) -> Result<(), ActuatorError> {
        Ok(())
    }
}
