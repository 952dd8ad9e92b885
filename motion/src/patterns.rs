//! Stroke waveforms.
//!
//! Every pattern maps a phase in `[0, 1)` to a normalized displacement in
//! `[0, 1]` describing one full physical cycle. Patterns are plain values so
//! the pose table can be built in a `static`.

use std::f64::consts::PI;
use std::time::Duration;

/// Basic curve families.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shape {
    /// Fast release over the first half, then a short climb to 0.3 and a
    /// longer climb back to the top.
    Plunge,
    /// Sinusoid starting at the bottom of the stroke.
    Sine,
    /// Linear rise until `peak`, linear fall for the remainder.
    Triangle { peak: f64 },
    /// Quadratic ease-in fall until `split`, quadratic ease-out rise after.
    EasedDip { split: f64 },
}

/// A shape plus an optional inversion (`1 - f(phase)`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pattern {
    shape: Shape,
    inverted: bool,
}

impl Pattern {
    pub const fn new(shape: Shape) -> Self {
        Self {
            shape,
            inverted: false,
        }
    }

    /// The mirrored variant of this pattern.
    pub const fn inverted(self) -> Self {
        Self {
            shape: self.shape,
            inverted: !self.inverted,
        }
    }

    /// Displacement at `phase`. Out-of-range phases are wrapped onto `[0, 1)`.
    pub fn sample(&self, phase: f64) -> f64 {
        let phase = wrap_phase(phase);
        let raw = match self.shape {
            Shape::Plunge => plunge(phase),
            Shape::Sine => sine(phase),
            Shape::Triangle { peak } => triangle(phase, peak),
            Shape::EasedDip { split } => eased_dip(phase, split),
        };
        let value = raw.clamp(0.0, 1.0);
        if self.inverted { 1.0 - value } else { value }
    }
}

/// Map any finite value onto `[0, 1)`; non-finite input becomes `0`.
pub fn wrap_phase(phase: f64) -> f64 {
    if !phase.is_finite() {
        return 0.0;
    }
    let wrapped = phase.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs
    if wrapped >= 1.0 { 0.0 } else { wrapped }
}

pub fn plunge(phase: f64) -> f64 {
    if phase < 0.5 {
        1.0 - phase / 0.5
    } else if phase < 0.75 {
        (phase - 0.5) / 0.25 * 0.3
    } else {
        0.3 + (phase - 0.75) / 0.25 * 0.7
    }
}

pub fn sine(phase: f64) -> f64 {
    ((phase * 2.0 * PI - PI / 2.0).sin() + 1.0) / 2.0
}

pub fn triangle(phase: f64, peak: f64) -> f64 {
    let peak = peak.clamp(f64::EPSILON, 1.0 - f64::EPSILON);
    if phase < peak {
        phase / peak
    } else {
        1.0 - (phase - peak) / (1.0 - peak)
    }
}

pub fn eased_dip(phase: f64, split: f64) -> f64 {
    let split = split.clamp(f64::EPSILON, 1.0 - f64::EPSILON);
    if phase < split {
        let t = phase / split;
        1.0 - t * t
    } else {
        let t = (phase - split) / (1.0 - split);
        1.0 - (1.0 - t) * (1.0 - t)
    }
}

/// Phase of a self-driven oscillator: elapsed time over the cycle length.
pub fn clock_phase(elapsed: Duration, cycle: Duration) -> f64 {
    let cycle = cycle.as_secs_f64();
    if cycle <= 0.0 {
        return 0.0;
    }
    wrap_phase(elapsed.as_secs_f64() / cycle)
}

/// Exponential step from `current` toward `target` along the shorter arc of
/// the `[0, 1)` circle.
pub fn circular_ease(current: f64, target: f64, factor: f64) -> f64 {
    let mut diff = wrap_phase(target) - wrap_phase(current);
    if diff > 0.5 {
        diff -= 1.0;
    } else if diff < -0.5 {
        diff += 1.0;
    }
    wrap_phase(current + diff * factor)
}

/// Exponential step on a straight line.
pub fn ease(current: f64, target: f64, factor: f64) -> f64 {
    current + (target - current) * factor
}
