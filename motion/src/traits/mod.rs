pub mod actuator;

pub use actuator::{Actuator, ActuatorError, NoopActuator};
