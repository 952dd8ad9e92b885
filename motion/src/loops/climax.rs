use super::{ControlLoop, HOME, POLL, drive};
use crate::registry::DeviceIndex;
use crate::state::ControlState;
use crate::traits::{Actuator, ActuatorError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// Absolute `(position, duration in ms)` steps played on entry: compress,
/// partial release, deeper compress, partial extend, return.
pub const CHOREOGRAPHY: [(f64, u64); 5] = [
    (0.95, 150),
    (0.55, 250),
    (1.0, 200),
    (0.3, 400),
    (0.5, 600),
];

pub const RELEASE_DURATION: Duration = Duration::from_millis(500);
pub const COOLDOWN: Duration = Duration::from_millis(1500);

const REVERB_AMPLITUDE: f64 = 0.15;
const REVERB_DECAY: f64 = 0.7;
const REVERB_FLOOR: f64 = 0.02;
const REVERB_DURATION: Duration = Duration::from_millis(240);
const REVERB_SPEEDUP: f64 = 0.85;
const REVERB_MIN_DURATION: Duration = Duration::from_millis(60);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClimaxPhase {
    #[default]
    Waiting,
    /// A climax animation is playing; the entry sequence fires once per
    /// entry.
    Engaged,
}

/// Edge-triggered sequence player for climax animations.
pub struct ClimaxLoop {
    state: Arc<ControlState>,
    actuator: Arc<dyn Actuator>,
    phase: ClimaxPhase,
}

impl ClimaxLoop {
    pub fn new(state: Arc<ControlState>, actuator: Arc<dyn Actuator>) -> Self {
        Self {
            state,
            actuator,
            phase: ClimaxPhase::Waiting,
        }
    }

    pub fn phase(&self) -> ClimaxPhase {
        self.phase
    }

    pub async fn run(self) {
        let state = self.state.clone();
        drive(self, &state).await;
    }

    /// Play the entry sequence. Returns early if the climax ends midway.
    async fn play(&self, device: DeviceIndex) -> Result<(), ActuatorError> {
        for (position, ms) in CHOREOGRAPHY {
            if !self.state.is_climax_active() {
                return Ok(());
            }
            let duration = Duration::from_millis(ms);
            self.actuator
                .set_position(device, position, duration)
                .await?;
            sleep(duration).await;
        }

        if self.state.with_config(|c| c.low_rate_device) {
            return Ok(());
        }

        let mut amplitude = REVERB_AMPLITUDE;
        let mut duration = REVERB_DURATION;
        let mut sign = 1.0;
        while amplitude >= REVERB_FLOOR {
            if !self.state.is_climax_active() {
                return Ok(());
            }
            self.actuator
                .set_position(device, HOME + sign * amplitude, duration)
                .await?;
            sleep(duration).await;
            sign = -sign;
            amplitude *= REVERB_DECAY;
            duration = duration.mul_f64(REVERB_SPEEDUP).max(REVERB_MIN_DURATION);
        }
        debug!(device, "reverb finished");
        Ok(())
    }
}

#[async_trait]
impl ControlLoop for ClimaxLoop {
    fn name(&self) -> &'static str {
        "climax"
    }

    async fn tick(&mut self) -> Result<Duration, ActuatorError> {
        let active = self.state.is_climax_active();
        let device = self.state.with_registry(|r| r.piston_device());

        match (self.phase, active) {
            (ClimaxPhase::Waiting, true) => {
                let hash = self.state.animation().hash;
                info!(hash, "climax started");
                self.phase = ClimaxPhase::Engaged;
                if let Some(device) = device {
                    self.play(device).await?;
                }
            }
            (ClimaxPhase::Engaged, false) => {
                info!("climax ended, releasing");
                self.phase = ClimaxPhase::Waiting;
                self.state.start_cooldown(Instant::now() + COOLDOWN);
                if let Some(device) = device {
                    self.actuator
                        .set_position(device, HOME, RELEASE_DURATION)
                        .await?;
                }
            }
            _ => {}
        }
        Ok(POLL)
    }
}
