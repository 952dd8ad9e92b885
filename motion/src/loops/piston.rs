use super::{ControlLoop, End, HOME, HOME_DURATION, POLL, StrokePhase, drive};
use crate::state::ControlState;
use crate::traits::{Actuator, ActuatorError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Strokes the piston-bound device between the configured ends while the
/// piston mode signal is on.
///
/// Stands down while a pose or climax animation plays, while an ended pose
/// is still easing the device home, while the device is linked to the vibe
/// signal, and during the post-climax cooldown.
pub struct PistonLoop {
    state: Arc<ControlState>,
    actuator: Arc<dyn Actuator>,
    phase: StrokePhase,
}

impl PistonLoop {
    pub fn new(state: Arc<ControlState>, actuator: Arc<dyn Actuator>) -> Self {
        Self {
            state,
            actuator,
            phase: StrokePhase::Homed,
        }
    }

    pub fn phase(&self) -> StrokePhase {
        self.phase
    }

    pub async fn run(self) {
        let state = self.state.clone();
        drive(self, &state).await;
    }

    fn standing_down(&self) -> bool {
        self.state.is_pose_active()
            || self.state.is_climax_active()
            || self.state.pose_homing()
            || self.state.device_busy()
            || self.state.with_registry(|r| r.is_linked())
    }
}

#[async_trait]
impl ControlLoop for PistonLoop {
    fn name(&self) -> &'static str {
        "piston"
    }

    async fn tick(&mut self) -> Result<Duration, ActuatorError> {
        let Some(device) = self.state.with_registry(|r| r.piston_device()) else {
            self.phase = StrokePhase::Homed;
            return Ok(POLL);
        };
        let mode = self.state.piston_mode();

        if mode > 0 && !self.standing_down() {
            let (interval, range) = self
                .state
                .with_config(|c| (c.piston_interval(mode), c.piston_range));
            let end = self.phase.next_end();
            let position = end.of(range);
            debug!(device, mode, position, ?interval, "piston stroke");
            self.actuator
                .set_position(device, position, interval)
                .await?;
            if !self.phase.is_cycling() {
                info!(device, mode, "piston cycling");
            }
            self.phase = StrokePhase::Cycling { last: end };
            return Ok(interval);
        }

        if self.phase.is_cycling() {
            if mode == 0 {
                info!(device, "piston mode off, returning home");
                self.actuator
                    .set_position(device, HOME, HOME_DURATION)
                    .await?;
            } else {
                debug!(device, "piston standing down");
            }
            self.phase = StrokePhase::Homed;
        }
        Ok(POLL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Capabilities, DeviceInfo, Signal};
    use crate::testing::RecordingActuator;

    fn setup(caps: Capabilities) -> (Arc<ControlState>, Arc<RecordingActuator>, PistonLoop) {
        let state = Arc::new(ControlState::default());
        state.edit_registry(|r| {
            r.rebuild([DeviceInfo::new(3, "unit", caps)]);
            r.select(Signal::Piston, 3).unwrap();
        });
        let rec = Arc::new(RecordingActuator::new());
        let control = PistonLoop::new(state.clone(), rec.clone());
        (state, rec, control)
    }

    #[tokio::test(start_paused = true)]
    async fn first_stroke_goes_to_max() {
        let (state, rec, mut control) = setup(Capabilities::PISTON);
        state.set_piston_mode(2);
        let wait = control.tick().await.unwrap();
        assert_eq!(wait, Duration::from_millis(500));
        assert_eq!(rec.positions(), vec![(0.8, Duration::from_millis(500))]);
        assert_eq!(control.phase(), StrokePhase::Cycling { last: End::Max });
    }

    #[tokio::test(start_paused = true)]
    async fn failed_command_keeps_target() {
        let (state, rec, mut control) = setup(Capabilities::PISTON);
        state.set_piston_mode(1);
        rec.fail_next(1);
        assert!(control.tick().await.is_err());
        assert_eq!(control.phase(), StrokePhase::Homed);
        control.tick().await.unwrap();
        assert_eq!(rec.positions()[0].0, 0.8);
    }

    #[tokio::test(start_paused = true)]
    async fn vibe_only_device_is_ignored() {
        let (state, rec, mut control) = setup(Capabilities::VIBE);
        state.set_piston_mode(1);
        assert_eq!(control.tick().await.unwrap(), POLL);
        assert!(rec.commands().is_empty());
    }
}
