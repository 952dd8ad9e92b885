//! Process-wide control state shared by the ingress, the loops and the
//! settings editor.
//!
//! Loops poll this state every tick instead of subscribing to it. Scalars are
//! atomics; the registry and the settings sit behind short-lived locks that
//! are never held across an `.await`.

use crate::config::{ModeLevel, PerModeConfig};
use crate::profiles::{self, AnimationHash};
use crate::registry::Registry;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Identity and cycle position of the animation currently playing.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AnimationState {
    pub hash: AnimationHash,
    /// Phase within the animation cycle, `[0, 1)`.
    pub progress: f64,
}

/// Pose identity changed; emitted by the ingress, consumed by the pose loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoseChange {
    pub hash: AnimationHash,
}

pub type PoseSender = mpsc::UnboundedSender<PoseChange>;
pub type PoseReceiver = mpsc::UnboundedReceiver<PoseChange>;

/// Queue carrying [`PoseChange`] events from the ingress to the pose loop.
pub fn pose_channel() -> (PoseSender, PoseReceiver) {
    mpsc::unbounded_channel()
}

/// Connection state of an external link, for status displays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkStatus {
    #[default]
    Waiting,
    Connecting,
    Scanning,
    /// Link is up. `devices` counts usable devices behind it, zero for
    /// links that carry none.
    Connected {
        devices: usize,
    },
    NoDevices,
    Retrying,
    Stopped,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ControlState {
    piston_mode: AtomicU8,
    vibe_mode: AtomicU8,
    animation_hash: AtomicI64,
    progress_bits: AtomicU64,
    registry: Mutex<Registry>,
    config: RwLock<PerModeConfig>,
    idle_suspended: AtomicBool,
    pose_homing: AtomicBool,
    cooldown_until: Mutex<Option<Instant>>,
    shutdown: watch::Sender<bool>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new(PerModeConfig::default())
    }
}

impl ControlState {
    pub fn new(config: PerModeConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            piston_mode: AtomicU8::new(0),
            vibe_mode: AtomicU8::new(0),
            animation_hash: AtomicI64::new(0),
            progress_bits: AtomicU64::new(0f64.to_bits()),
            registry: Mutex::new(Registry::new()),
            config: RwLock::new(config),
            idle_suspended: AtomicBool::new(false),
            pose_homing: AtomicBool::new(false),
            cooldown_until: Mutex::new(None),
            shutdown,
        }
    }

    pub fn piston_mode(&self) -> ModeLevel {
        self.piston_mode.load(Ordering::SeqCst)
    }

    pub fn vibe_mode(&self) -> ModeLevel {
        self.vibe_mode.load(Ordering::SeqCst)
    }

    pub fn set_piston_mode(&self, mode: ModeLevel) {
        self.piston_mode.store(mode, Ordering::SeqCst);
    }

    pub fn set_vibe_mode(&self, mode: ModeLevel) {
        self.vibe_mode.store(mode, Ordering::SeqCst);
    }

    /// Drop both mode signals back to off.
    pub fn reset_modes(&self) {
        self.set_piston_mode(0);
        self.set_vibe_mode(0);
    }

    pub fn animation(&self) -> AnimationState {
        AnimationState {
            hash: self.animation_hash.load(Ordering::SeqCst),
            progress: f64::from_bits(self.progress_bits.load(Ordering::SeqCst)),
        }
    }

    pub fn set_animation(&self, animation: AnimationState) {
        self.animation_hash.store(animation.hash, Ordering::SeqCst);
        self.progress_bits
            .store(animation.progress.to_bits(), Ordering::SeqCst);
    }

    /// The current animation is a pose (and not a climax).
    pub fn is_pose_active(&self) -> bool {
        profiles::is_pose(self.animation().hash)
    }

    pub fn is_climax_active(&self) -> bool {
        profiles::is_climax(self.animation().hash)
    }

    /// Read the registry.
    pub fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&lock(&self.registry))
    }

    /// Mutate the registry. Loops must tolerate bindings vanishing between ticks.
    pub fn edit_registry<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        f(&mut lock(&self.registry))
    }

    /// Read the settings.
    pub fn with_config<R>(&self, f: impl FnOnce(&PerModeConfig) -> R) -> R {
        let guard = self.config.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Mutate the settings in place.
    pub fn edit_config<R>(&self, f: impl FnOnce(&mut PerModeConfig) -> R) -> R {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn config(&self) -> PerModeConfig {
        self.with_config(Clone::clone)
    }

    /// Hold idle motion off, e.g. while a settings slider is being dragged.
    pub fn suspend_idle(&self, suspended: bool) {
        self.idle_suspended.store(suspended, Ordering::SeqCst);
    }

    pub fn idle_suspended(&self) -> bool {
        self.idle_suspended.load(Ordering::SeqCst)
    }

    /// The pose loop is easing the device back to center.
    pub fn set_pose_homing(&self, homing: bool) {
        self.pose_homing.store(homing, Ordering::SeqCst);
    }

    pub fn pose_homing(&self) -> bool {
        self.pose_homing.load(Ordering::SeqCst)
    }

    /// Mark the device busy until `until` after a climax ends.
    pub fn start_cooldown(&self, until: Instant) {
        *lock(&self.cooldown_until) = Some(until);
    }

    /// A climax just ended and the device is still settling.
    pub fn device_busy(&self) -> bool {
        let mut slot = lock(&self.cooldown_until);
        match *slot {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *slot = None;
                false
            }
            None => false,
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [`Self::request_shutdown`] has been called.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}
