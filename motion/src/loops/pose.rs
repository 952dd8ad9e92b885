use super::{ControlLoop, HOME, POLL, drive};
use crate::config::PositionRange;
use crate::patterns::{circular_ease, clock_phase, ease};
use crate::profiles::{self, AnimationHash, Cadence, PoseProfile};
use crate::registry::DeviceIndex;
use crate::state::{ControlState, PoseReceiver};
use crate::traits::{Actuator, ActuatorError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const TRANSITION_TICKS: u32 = 25;
const TRANSITION_SMOOTHING: f64 = 0.2;
const RUNNING_SMOOTHING: f64 = 0.1;
const HOMING_SMOOTHING: f64 = 0.1;
const TICK: Duration = Duration::from_millis(50);
const TRANSITION_DURATION: Duration = Duration::from_millis(100);
const HOMING_TICK: Duration = Duration::from_millis(100);
const HOMING_DURATION: Duration = Duration::from_millis(200);
const HOMING_TOLERANCE: f64 = 0.01;
const SLOW_MIN: Duration = Duration::from_millis(200);
const SLOW_MAX: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PosePhase {
    #[default]
    Inactive,
    /// Blending the displayed phase onto the animation; counts ticks done.
    Transitioning { ticks: u32 },
    Running,
}

/// Follows the current pose animation with its profile's pattern.
///
/// Phase changes are driven by [`crate::state::PoseChange`] events rather than
/// by watching the hash, so high-rate progress updates cause no churn.
pub struct PoseLoop {
    state: Arc<ControlState>,
    actuator: Arc<dyn Actuator>,
    events: PoseReceiver,
    phase: PosePhase,
    pose: Option<&'static PoseProfile>,
    /// Smoothed animation phase, `[0, 1)`.
    displayed: f64,
    /// Last commanded position.
    position: f64,
    entered: Instant,
    /// Low-rate mode: which half of the cycle was last commanded, and when.
    half: Option<bool>,
    flipped: Instant,
}

impl PoseLoop {
    pub fn new(state: Arc<ControlState>, actuator: Arc<dyn Actuator>, events: PoseReceiver) -> Self {
        let now = Instant::now();
        Self {
            state,
            actuator,
            events,
            phase: PosePhase::Inactive,
            pose: None,
            displayed: 0.0,
            position: HOME,
            entered: now,
            half: None,
            flipped: now,
        }
    }

    pub fn phase(&self) -> PosePhase {
        self.phase
    }

    /// Last commanded position.
    pub fn position(&self) -> f64 {
        self.position
    }

    pub async fn run(self) {
        let state = self.state.clone();
        drive(self, &state).await;
    }

    fn drain_events(&mut self) {
        while let Ok(change) = self.events.try_recv() {
            self.on_pose_changed(change.hash);
        }
    }

    fn on_pose_changed(&mut self, hash: AnimationHash) {
        let profile = profiles::pose_profile(hash).filter(|_| profiles::is_pose(hash));
        let Some(profile) = profile else {
            if self.phase != PosePhase::Inactive {
                info!(hash, "pose ended");
            }
            self.phase = PosePhase::Inactive;
            self.pose = None;
            return;
        };

        let low_rate = self.state.with_config(|c| c.low_rate_device);
        info!(hash, pose = profile.name, low_rate, "pose started");
        let now = Instant::now();
        self.pose = Some(profile);
        self.entered = now;
        self.flipped = now;
        self.half = None;
        self.phase = if low_rate {
            PosePhase::Running
        } else {
            PosePhase::Transitioning { ticks: 0 }
        };
        self.state.set_pose_homing(false);
    }

    /// Phase the profile wants right now, before smoothing.
    fn target_phase(&self, profile: &PoseProfile) -> f64 {
        match profile.cadence.cycle() {
            Some(cycle) => clock_phase(self.entered.elapsed(), cycle),
            None => self.state.animation().progress,
        }
    }

    async fn command(
        &mut self,
        device: DeviceIndex,
        position: f64,
        duration: Duration,
    ) -> Result<(), ActuatorError> {
        self.actuator
            .set_position(device, position, duration)
            .await?;
        self.position = position;
        Ok(())
    }

    async fn follow(
        &mut self,
        device: DeviceIndex,
        profile: &'static PoseProfile,
        range: PositionRange,
    ) -> Result<Duration, ActuatorError> {
        let target = self.target_phase(profile);
        let duration = match self.phase {
            PosePhase::Transitioning { ticks } => {
                self.displayed = circular_ease(self.displayed, target, TRANSITION_SMOOTHING);
                self.phase = if ticks + 1 >= TRANSITION_TICKS {
                    debug!(pose = profile.name, "pose transition done");
                    PosePhase::Running
                } else {
                    PosePhase::Transitioning { ticks: ticks + 1 }
                };
                TRANSITION_DURATION
            }
            _ => {
                self.displayed = match profile.cadence {
                    Cadence::Fixed { .. } => target,
                    Cadence::Tracked => circular_ease(self.displayed, target, RUNNING_SMOOTHING),
                };
                TICK
            }
        };
        let position = range.lerp(profile.pattern.sample(self.displayed));
        self.command(device, position, duration).await?;
        Ok(TICK)
    }

    /// Coarse alternation for slow transports: one command per half cycle.
    async fn alternate(
        &mut self,
        device: DeviceIndex,
        profile: &'static PoseProfile,
        range: PositionRange,
    ) -> Result<Duration, ActuatorError> {
        let phase = self.target_phase(profile);
        self.displayed = phase;
        let first_half = phase < 0.5;
        if self.half == Some(first_half) {
            return Ok(TICK);
        }

        let now = Instant::now();
        let duration = match profile.cadence.cycle() {
            Some(cycle) => cycle / 2,
            None => (now - self.flipped).clamp(SLOW_MIN, SLOW_MAX),
        };
        let position = if first_half { range.max } else { range.min };
        self.command(device, position, duration).await?;
        self.half = Some(first_half);
        self.flipped = now;
        Ok(TICK)
    }

    /// Ease back toward center once the pose has ended.
    async fn settle(&mut self, device: DeviceIndex) -> Result<Duration, ActuatorError> {
        if self.state.is_climax_active() {
            // The climax choreography ends at home on its own.
            self.position = HOME;
            self.state.set_pose_homing(false);
            return Ok(POLL);
        }
        if (self.position - HOME).abs() <= HOMING_TOLERANCE {
            self.state.set_pose_homing(false);
            return Ok(POLL);
        }

        self.state.set_pose_homing(true);
        let position = ease(self.position, HOME, HOMING_SMOOTHING);
        self.command(device, position, HOMING_DURATION).await?;
        Ok(HOMING_TICK)
    }
}

#[async_trait]
impl ControlLoop for PoseLoop {
    fn name(&self) -> &'static str {
        "pose"
    }

    async fn tick(&mut self) -> Result<Duration, ActuatorError> {
        self.drain_events();

        let Some(device) = self.state.with_registry(|r| r.piston_device()) else {
            self.state.set_pose_homing(false);
            return Ok(POLL);
        };
        if self.state.device_busy() {
            self.position = HOME;
            self.state.set_pose_homing(false);
            return Ok(POLL);
        }

        let Some(profile) = self.pose.filter(|_| self.phase != PosePhase::Inactive) else {
            return self.settle(device).await;
        };
        if !self.state.is_pose_active() {
            return Ok(POLL);
        }

        let (range, low_rate) = self.state.with_config(|c| {
            (
                c.pose_range(profile.hash).unwrap_or(profile.range),
                c.low_rate_device,
            )
        });
        if low_rate {
            self.alternate(device, profile, range).await
        } else {
            self.follow(device, profile, range).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Capabilities, DeviceInfo, Signal};
    use crate::state::{AnimationState, PoseChange, PoseSender, pose_channel};
    use crate::testing::RecordingActuator;

    const DOGGY: AnimationHash = 344055696;

    fn setup() -> (Arc<ControlState>, Arc<RecordingActuator>, PoseSender, PoseLoop) {
        let state = Arc::new(ControlState::default());
        state.edit_registry(|r| {
            r.rebuild([DeviceInfo::new(0, "stroker", Capabilities::PISTON)]);
            r.select(Signal::Piston, 0).unwrap();
        });
        let rec = Arc::new(RecordingActuator::new());
        let (tx, rx) = pose_channel();
        let control = PoseLoop::new(state.clone(), rec.clone(), rx);
        (state, rec, tx, control)
    }

    fn enter(state: &ControlState, tx: &PoseSender, hash: AnimationHash, progress: f64) {
        state.set_animation(AnimationState { hash, progress });
        tx.send(PoseChange { hash }).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transition_runs_for_fixed_tick_count() {
        let (state, rec, tx, mut control) = setup();
        enter(&state, &tx, DOGGY, 0.3);
        for _ in 0..TRANSITION_TICKS {
            assert!(matches!(control.phase(), PosePhase::Inactive | PosePhase::Transitioning { .. }));
            control.tick().await.unwrap();
        }
        assert_eq!(control.phase(), PosePhase::Running);
        let positions = rec.positions();
        assert_eq!(positions.len(), TRANSITION_TICKS as usize);
        assert!(positions.iter().all(|(_, d)| *d == TRANSITION_DURATION));
        assert!(positions.iter().all(|(p, _)| (0.0..=0.4).contains(p)));
    }

    #[tokio::test(start_paused = true)]
    async fn non_pose_change_deactivates() {
        let (state, _rec, tx, mut control) = setup();
        enter(&state, &tx, DOGGY, 0.0);
        control.tick().await.unwrap();
        enter(&state, &tx, 42, 0.0);
        control.tick().await.unwrap();
        assert_eq!(control.phase(), PosePhase::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn low_rate_skips_transition() {
        let (state, rec, tx, mut control) = setup();
        state.edit_config(|c| c.set_low_rate_device(true));
        enter(&state, &tx, DOGGY, 0.25);
        control.tick().await.unwrap();
        assert_eq!(control.phase(), PosePhase::Running);
        assert_eq!(rec.positions(), vec![(0.4, SLOW_MIN)]);
        // Same half: nothing new.
        control.tick().await.unwrap();
        assert_eq!(rec.positions().len(), 1);
    }
}
