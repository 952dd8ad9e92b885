use super::{ControlLoop, HOME, HOME_DURATION, POLL, StrokePhase, drive};
use crate::config::ModeLevel;
use crate::registry::{DeviceIndex, VibeRoute};
use crate::state::ControlState;
use crate::traits::{Actuator, ActuatorError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Commands per linked-mode ramp; one ramp spans one piston interval.
pub const RAMP_STEPS: u32 = 10;
/// Unchanged intensities are re-sent this often, the transport may drop them.
pub const RESEND: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VibePhase {
    /// Nothing is bound to the vibe signal.
    #[default]
    Unrouted,
    /// Holding a constant intensity.
    Holding,
    /// Linked mode with both signals on: sweeping intensity in step with the
    /// piston cadence.
    Ramping { rising: bool, step: u32 },
    /// A piston-only device stroking in place of a vibrator.
    Emulating(StrokePhase),
}

/// Drives the vibe signal. The sub-mode is chosen every tick from the
/// device topology alone (see [`VibeRoute`]).
pub struct VibeLoop {
    state: Arc<ControlState>,
    actuator: Arc<dyn Actuator>,
    phase: VibePhase,
    last_sent: Option<(DeviceIndex, f64, Instant)>,
}

impl VibeLoop {
    pub fn new(state: Arc<ControlState>, actuator: Arc<dyn Actuator>) -> Self {
        Self {
            state,
            actuator,
            phase: VibePhase::Unrouted,
            last_sent: None,
        }
    }

    pub fn phase(&self) -> VibePhase {
        self.phase
    }

    pub async fn run(self) {
        let state = self.state.clone();
        drive(self, &state).await;
    }

    async fn send(&mut self, device: DeviceIndex, level: f64) -> Result<(), ActuatorError> {
        self.actuator.set_intensity(device, level).await?;
        self.last_sent = Some((device, level, Instant::now()));
        Ok(())
    }

    /// Hold `level`, re-sending only on change or after [`RESEND`].
    async fn hold(&mut self, device: DeviceIndex, level: f64) -> Result<Duration, ActuatorError> {
        let stale = match self.last_sent {
            Some((d, l, at)) => d != device || l != level || at.elapsed() >= RESEND,
            None => true,
        };
        if stale {
            debug!(device, level, "vibe hold");
            self.send(device, level).await?;
        }
        self.phase = VibePhase::Holding;
        Ok(POLL)
    }

    async fn ramp(
        &mut self,
        device: DeviceIndex,
        piston_mode: ModeLevel,
        vibe_mode: ModeLevel,
    ) -> Result<Duration, ActuatorError> {
        let (rising, step) = match self.phase {
            VibePhase::Ramping { rising, step } => (rising, step),
            _ => {
                info!(device, piston_mode, vibe_mode, "linked ramp started");
                (true, 0)
            }
        };
        let (low, high, interval) = self.state.with_config(|c| {
            (
                c.vibe_min(vibe_mode),
                c.vibe_max(vibe_mode),
                c.piston_interval(piston_mode),
            )
        });
        let t = f64::from(step) / f64::from(RAMP_STEPS - 1);
        let level = if rising {
            low + (high - low) * t
        } else {
            high - (high - low) * t
        };
        self.send(device, level).await?;
        self.phase = if step + 1 >= RAMP_STEPS {
            VibePhase::Ramping {
                rising: !rising,
                step: 0,
            }
        } else {
            VibePhase::Ramping {
                rising,
                step: step + 1,
            }
        };
        Ok(interval / RAMP_STEPS)
    }

    async fn emulate(
        &mut self,
        device: DeviceIndex,
        vibe_mode: ModeLevel,
    ) -> Result<Duration, ActuatorError> {
        let stroke = match self.phase {
            VibePhase::Emulating(stroke) => stroke,
            _ => StrokePhase::Homed,
        };
        let standing_down = self.state.is_pose_active()
            || self.state.is_climax_active()
            || self.state.pose_homing()
            || self.state.device_busy();

        if vibe_mode > 0 && !standing_down {
            let (interval, range) = self.state.with_config(|c| {
                (c.vibe_as_piston_interval(vibe_mode), c.vibe_as_piston_range)
            });
            let end = stroke.next_end();
            self.actuator
                .set_position(device, end.of(range), interval)
                .await?;
            self.phase = VibePhase::Emulating(StrokePhase::Cycling { last: end });
            return Ok(interval);
        }

        if stroke.is_cycling() && vibe_mode == 0 {
            info!(device, "emulated vibe off, returning home");
            self.actuator
                .set_position(device, HOME, HOME_DURATION)
                .await?;
        }
        self.phase = VibePhase::Emulating(StrokePhase::Homed);
        Ok(POLL)
    }
}

#[async_trait]
impl ControlLoop for VibeLoop {
    fn name(&self) -> &'static str {
        "vibe"
    }

    async fn tick(&mut self) -> Result<Duration, ActuatorError> {
        let route = self.state.with_registry(|r| r.vibe_route());
        let piston_mode = self.state.piston_mode();
        let vibe_mode = self.state.vibe_mode();

        match route {
            None => {
                self.phase = VibePhase::Unrouted;
                self.last_sent = None;
                Ok(POLL)
            }
            Some(VibeRoute::Linked(device)) if piston_mode > 0 && vibe_mode > 0 => {
                self.ramp(device, piston_mode, vibe_mode).await
            }
            Some(VibeRoute::Linked(device)) | Some(VibeRoute::Intensity(device)) => {
                let level = self.state.with_config(|c| c.vibe_max(vibe_mode));
                self.hold(device, level).await
            }
            Some(VibeRoute::Emulated(device)) => self.emulate(device, vibe_mode).await,
        }
    }
}
