//! Motion synthesis and arbitration for game-driven haptic devices.
//!
//! The game publishes mode levels and animation progress into a shared
//! [`ControlState`]; five independent loops poll it and command actuators
//! through the [`Actuator`] trait. Priority between the loops follows from
//! mutually exclusive activity predicates: climax, then pose, then the mode
//! signals, then idle filler motion.

pub mod config;
pub mod loops;
pub mod patterns;
pub mod profiles;
pub mod registry;
pub mod settings;
pub mod state;
pub mod task_group;
pub mod testing;
pub mod traits;

pub use config::{ConfigError, ConfigStore, JsonFileStore, ModeLevel, PerModeConfig, PositionRange};
pub use loops::{ClimaxLoop, ControlLoop, IdleLoop, PistonLoop, PoseLoop, VibeLoop};
pub use patterns::Pattern;
pub use profiles::{AnimationHash, PoseProfile};
pub use registry::{Capabilities, Capability, DeviceIndex, DeviceInfo, Registry, Signal};
pub use settings::SettingsEditor;
pub use state::{AnimationState, ControlState, LinkStatus, PoseChange, PoseReceiver, PoseSender};
pub use task_group::{TaskExit, TaskGroup};
pub use traits::{Actuator, ActuatorError, NoopActuator};
