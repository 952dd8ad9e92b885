//! Animation tables: which game animations drive pose motion and which ones
//! count as a climax.

use crate::config::PositionRange;
use crate::patterns::{Pattern, Shape};
use std::time::Duration;

/// Opaque identity of a game animation.
pub type AnimationHash = i64;

/// Where a pose takes its phase from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cadence {
    /// Follow the progress value reported by the game.
    Tracked,
    /// Run a self-driven oscillator with a fixed cycle, ignoring reported
    /// progress. Used where the game's progress is too coarse to follow.
    Fixed { cycle_ms: u64 },
}

impl Cadence {
    pub fn cycle(&self) -> Option<Duration> {
        match self {
            Cadence::Tracked => None,
            Cadence::Fixed { cycle_ms } => Some(Duration::from_millis(*cycle_ms)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseProfile {
    pub hash: AnimationHash,
    pub name: &'static str,
    /// Default stroke range; user overrides live in the settings.
    pub range: PositionRange,
    pub pattern: Pattern,
    pub cadence: Cadence,
}

const PLUNGE: Pattern = Pattern::new(Shape::Plunge);
const SINE: Pattern = Pattern::new(Shape::Sine);
const RISE_80: Pattern = Pattern::new(Shape::Triangle { peak: 0.8 });
const RISE_70: Pattern = Pattern::new(Shape::Triangle { peak: 0.7 });
const RISE_60: Pattern = Pattern::new(Shape::Triangle { peak: 0.6 });
const DIP: Pattern = Pattern::new(Shape::EasedDip { split: 0.4 });

const fn pose(
    hash: AnimationHash,
    name: &'static str,
    min: f64,
    max: f64,
    pattern: Pattern,
    cadence: Cadence,
) -> PoseProfile {
    PoseProfile {
        hash,
        name,
        range: PositionRange::new(min, max),
        pattern,
        cadence,
    }
}

pub static POSES: [PoseProfile; 15] = [
    pose(1201047697, "Nipple Play", 0.65, 0.9, DIP, Cadence::Fixed { cycle_ms: 760 }),
    pose(1832166380, "Clit Play", 0.6, 0.8, RISE_70, Cadence::Fixed { cycle_ms: 650 }),
    pose(7717404, "Stroking", 0.2, 0.6, SINE, Cadence::Fixed { cycle_ms: 396 }),
    pose(505962836, "Masturbate", 0.3, 0.8, PLUNGE.inverted(), Cadence::Tracked),
    pose(2011001274, "Three-Leg", 0.0, 0.5, RISE_80, Cadence::Tracked),
    pose(344055696, "Doggy", 0.0, 0.4, PLUNGE.inverted(), Cadence::Tracked),
    pose(1945541277, "Supine", 0.0, 0.5, PLUNGE.inverted(), Cadence::Tracked),
    pose(1272021522, "Standing Doggy", 0.0, 0.7, RISE_60, Cadence::Tracked),
    pose(126556443, "Cowgirl", 0.0, 0.5, RISE_70, Cadence::Tracked),
    pose(81106989, "Dildo (Chair)", 0.2, 0.6, RISE_70.inverted(), Cadence::Tracked),
    pose(1127557836, "Dildo (Floor, Vaginal)", 0.4, 0.8, RISE_70.inverted(), Cadence::Tracked),
    pose(1067368937, "Dildo (Floor, Anal)", 0.4, 0.8, RISE_70.inverted(), Cadence::Tracked),
    pose(37429125, "Dildo (Standing, Vaginal)", 0.1, 0.6, PLUNGE.inverted(), Cadence::Tracked),
    pose(652955773, "Dildo (Standing, Anal)", 0.1, 0.6, PLUNGE.inverted(), Cadence::Tracked),
    pose(709841502, "Dildo (Standing, Oral)", 0.3, 0.7, SINE, Cadence::Tracked),
];

pub static CLIMAX: [AnimationHash; 11] = [
    1514068739, 551798253, 1352943776, 215434987, 76164332, 231319108, 2060359382, 48554725,
    1584403080, 248983229, 2029961234,
];

/// Look up the pose driven by `hash`, if any.
pub fn pose_profile(hash: AnimationHash) -> Option<&'static PoseProfile> {
    POSES.iter().find(|p| p.hash == hash)
}

pub fn is_climax(hash: AnimationHash) -> bool {
    CLIMAX.contains(&hash)
}

/// A hash drives pose motion only when it is in the pose table and not a
/// climax; climax membership wins when both apply.
pub fn is_pose(hash: AnimationHash) -> bool {
    !is_climax(hash) && pose_profile(hash).is_some()
}
