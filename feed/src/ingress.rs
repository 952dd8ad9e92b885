//! Event ingress: folds game frames into [`ControlState`].

use crate::frame::GameFrame;
use motion::config::ModeLevel;
use motion::patterns::wrap_phase;
use motion::profiles;
use motion::state::{AnimationState, ControlState, PoseChange, PoseSender};
use std::sync::Arc;
use tracing::{debug, info};

/// Writes mode and animation updates into shared state and queues a
/// [`PoseChange`] whenever the animation moves into, out of or between
/// entries of the pose table.
#[derive(Clone)]
pub struct Ingress {
    state: Arc<ControlState>,
    poses: PoseSender,
}

fn mode_level(raw: i64) -> ModeLevel {
    raw.clamp(0, i64::from(ModeLevel::MAX)) as ModeLevel
}

impl Ingress {
    pub fn new(state: Arc<ControlState>, poses: PoseSender) -> Self {
        Self { state, poses }
    }

    pub fn apply(&self, frame: &GameFrame) {
        let piston = mode_level(frame.piston);
        let vibe = mode_level(frame.vibe);
        if piston != self.state.piston_mode() || vibe != self.state.vibe_mode() {
            info!(piston, vibe, "mode changed");
            self.state.set_piston_mode(piston);
            self.state.set_vibe_mode(vibe);
        }

        let previous = self.state.animation().hash;
        let progress = wrap_phase(frame.progress);
        let hash = frame.animation_hash;
        let was_pose = profiles::pose_profile(previous).is_some();
        let is_pose = profiles::pose_profile(hash).is_some();
        if was_pose && !is_pose {
            // Hold other movers off until the pose loop has taken the device home.
            self.state.set_pose_homing(true);
        }
        self.state.set_animation(AnimationState { hash, progress });

        let touches_pose = was_pose || is_pose;
        if hash != previous && touches_pose {
            debug!(from = previous, to = hash, "pose changed");
            // The pose loop may be gone between supervision cycles.
            let _ = self.poses.send(PoseChange { hash });
        }
    }

    /// The feed dropped: mode signals fall back to off.
    pub fn disconnected(&self) {
        if self.state.piston_mode() != 0 || self.state.vibe_mode() != 0 {
            info!("feed lost, modes reset");
        }
        self.state.reset_modes();
    }
}
