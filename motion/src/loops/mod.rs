//! Motion arbitration loops.
//!
//! Each loop polls [`ControlState`] on its own cadence and decides whether it
//! owns the device this tick. Ownership is never locked: the activity
//! predicates of the loops are mutually exclusive, so at most one of them
//! commands a given device at a time.

pub mod climax;
pub mod idle;
pub mod piston;
pub mod pose;
pub mod vibe;

pub use climax::{ClimaxLoop, ClimaxPhase};
pub use idle::{IdleLoop, IdlePhase};
pub use piston::PistonLoop;
pub use pose::{PoseLoop, PosePhase};
pub use vibe::{VibeLoop, VibePhase};

use crate::config::PositionRange;
use crate::state::ControlState;
use crate::traits::ActuatorError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Re-poll interval while a loop has nothing to do.
pub const POLL: Duration = Duration::from_millis(100);
/// Pause after a failed actuator command.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Neutral stroke position.
pub const HOME: f64 = 0.5;
/// Travel time of the homing move when a stroke mode switches off.
pub const HOME_DURATION: Duration = Duration::from_millis(700);

/// One control loop: a tick decides and commands, then names its next wait.
#[async_trait]
pub trait ControlLoop: Send {
    fn name(&self) -> &'static str;

    /// Run one decision step and return how long to wait before the next.
    async fn tick(&mut self) -> Result<Duration, ActuatorError>;
}

/// Drive `control` until shutdown. Command failures are logged and retried
/// after [`ERROR_BACKOFF`]; they never end the loop.
pub async fn drive<L: ControlLoop>(mut control: L, state: &ControlState) {
    while !state.is_shutting_down() {
        let wait = match control.tick().await {
            Ok(wait) => wait.max(Duration::from_millis(1)),
            Err(e) => {
                warn!(control = control.name(), error = %e, "actuator command failed");
                ERROR_BACKOFF
            }
        };
        tokio::time::sleep(wait).await;
    }
}

/// Stroke end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum End {
    Min,
    Max,
}

impl End {
    pub fn flip(self) -> Self {
        match self {
            End::Min => End::Max,
            End::Max => End::Min,
        }
    }

    pub fn of(self, range: PositionRange) -> f64 {
        match self {
            End::Min => range.min,
            End::Max => range.max,
        }
    }
}

/// Back-and-forth stroking state shared by the piston loop and the
/// piston-emulated vibe sub-mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StrokePhase {
    #[default]
    Homed,
    Cycling {
        last: End,
    },
}

impl StrokePhase {
    /// End to travel to next: the top first, then alternating.
    pub fn next_end(&self) -> End {
        match self {
            StrokePhase::Homed => End::Max,
            StrokePhase::Cycling { last } => last.flip(),
        }
    }

    pub fn is_cycling(&self) -> bool {
        matches!(self, StrokePhase::Cycling { .. })
    }
}
