//! Bridge between the game feed and an Intiface device server.

pub mod hub;
pub mod intiface;
pub mod logging;
pub mod supervisor;

pub use hub::{DeviceHub, HubConnector, HubError};
pub use intiface::{IntifaceConnector, IntifaceHub};
pub use logging::init_logging;
pub use supervisor::{Supervisor, SupervisorConfig};
