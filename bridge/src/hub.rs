//! Boundary between the supervisor and the actuator driver.

use async_trait::async_trait;
use motion::registry::DeviceInfo;
use motion::traits::{Actuator, ActuatorError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("could not reach device server: {0}")]
    Connect(String),
    #[error("unexpected message from device server: {0}")]
    Protocol(String),
    #[error("device server error {code}: {message}")]
    Server { code: i64, message: String },
    #[error("device server connection closed")]
    Closed,
    #[error("device server did not answer in time")]
    Timeout,
}

impl From<HubError> for ActuatorError {
    fn from(e: HubError) -> Self {
        match e {
            HubError::Closed => ActuatorError::Disconnected,
            other => ActuatorError::Transport(other.to_string()),
        }
    }
}

/// One live connection to a device server.
#[async_trait]
pub trait DeviceHub: Actuator {
    async fn start_scanning(&self) -> Result<(), HubError>;
    async fn stop_scanning(&self) -> Result<(), HubError>;

    /// Devices currently known to the server.
    async fn devices(&self) -> Result<Vec<DeviceInfo>, HubError>;

    /// Resolves once the connection is gone.
    async fn closed(&self);

    async fn disconnect(&self);

    fn into_actuator(self: Arc<Self>) -> Arc<dyn Actuator>;
}

/// Opens [`DeviceHub`] connections; called again after every loss.
#[async_trait]
pub trait HubConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn DeviceHub>, HubError>;
}
