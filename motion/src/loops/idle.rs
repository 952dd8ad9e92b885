use super::{ControlLoop, POLL, drive};
use crate::state::ControlState;
use crate::traits::{Actuator, ActuatorError};
use async_trait::async_trait;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const SETTLE: Duration = Duration::from_millis(1000);
const WAVE_TICK: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdlePhase {
    #[default]
    Dormant,
    /// Following the sine wave whose zero crossing was at `since`.
    Waving { since: Instant },
    /// Low-rate devices: alternating between the range ends.
    Stepping { high: bool },
}

/// Slow filler motion while nothing else is driving the device.
pub struct IdleLoop {
    state: Arc<ControlState>,
    actuator: Arc<dyn Actuator>,
    phase: IdlePhase,
}

impl IdleLoop {
    pub fn new(state: Arc<ControlState>, actuator: Arc<dyn Actuator>) -> Self {
        Self {
            state,
            actuator,
            phase: IdlePhase::Dormant,
        }
    }

    pub fn phase(&self) -> IdlePhase {
        self.phase
    }

    pub async fn run(self) {
        let state = self.state.clone();
        drive(self, &state).await;
    }

    fn is_active(&self) -> bool {
        let s = &self.state;
        s.with_config(|c| c.idle_motion)
            && !s.idle_suspended()
            && !s.is_pose_active()
            && !s.is_climax_active()
            && !s.pose_homing()
            && s.piston_mode() == 0
            && s.vibe_mode() == 0
            && !s.device_busy()
    }
}

/// Idle wave value at `t`, `[0, 1]`; one half period is `interval`.
pub fn wave(t: Duration, interval: Duration) -> f64 {
    let interval = interval.as_secs_f64();
    if interval <= 0.0 {
        return 0.5;
    }
    ((t.as_secs_f64() * PI / interval).sin() + 1.0) / 2.0
}

#[async_trait]
impl ControlLoop for IdleLoop {
    fn name(&self) -> &'static str {
        "idle"
    }

    async fn tick(&mut self) -> Result<Duration, ActuatorError> {
        let device = self.state.with_registry(|r| r.piston_device());
        let Some(device) = device.filter(|_| self.is_active()) else {
            if self.phase != IdlePhase::Dormant {
                debug!("idle motion paused");
            }
            self.phase = IdlePhase::Dormant;
            return Ok(POLL);
        };
        let (range, interval, low_rate) = self
            .state
            .with_config(|c| (c.piston_range, c.idle_period(), c.low_rate_device));

        if low_rate {
            let high = match self.phase {
                IdlePhase::Stepping { high } => !high,
                _ => false,
            };
            let position = if high { range.max } else { range.min };
            self.actuator
                .set_position(device, position, interval)
                .await?;
            self.phase = IdlePhase::Stepping { high };
            return Ok(interval);
        }

        match self.phase {
            IdlePhase::Waving { since } => {
                let position = range.lerp(wave(since.elapsed(), interval));
                self.actuator
                    .set_position(device, position, WAVE_TICK)
                    .await?;
                Ok(WAVE_TICK)
            }
            _ => {
                debug!(device, "idle motion starting");
                self.actuator
                    .set_position(device, range.lerp(0.5), SETTLE)
                    .await?;
                self.phase = IdlePhase::Waving {
                    since: Instant::now() + SETTLE,
                };
                Ok(SETTLE)
            }
        }
    }
}
