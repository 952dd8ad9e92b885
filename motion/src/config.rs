//! Durable per-mode settings and their JSON store.
//!
//! Loading never fails: anything missing or unusable in the file falls back
//! to the default for that key, and a repaired file is written back.

use crate::profiles::{AnimationHash, POSES, pose_profile};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Intensity preset index sent by the game. `0` means off.
pub type ModeLevel = u8;

/// Shortest cycle interval accepted from settings or edits.
pub const MIN_INTERVAL_SECS: f64 = 0.05;

/// Longest cycle interval accepted from settings or edits.
pub const MAX_INTERVAL_SECS: f64 = 60.0;

/// Interval used when a mode level has no configured speed.
const FALLBACK_INTERVAL_SECS: f64 = 1.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A `[min, max]` slice of the actuator stroke, `0 <= min <= max <= 1`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionRange {
    pub min: f64,
    pub max: f64,
}

impl PositionRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.min) && (0.0..=1.0).contains(&self.max) && self.min <= self.max
    }

    /// Position at fraction `t` of the way from `min` to `max`.
    pub fn lerp(&self, t: f64) -> f64 {
        self.min + t.clamp(0.0, 1.0) * (self.max - self.min)
    }

    /// Move `min`, dragging `max` up with it when needed.
    pub fn with_min(self, min: f64) -> Self {
        let min = clamp_unit(min);
        Self {
            min,
            max: self.max.max(min),
        }
    }

    /// Move `max`, dragging `min` down with it when needed.
    pub fn with_max(self, max: f64) -> Self {
        let max = clamp_unit(max);
        Self {
            min: self.min.min(max),
            max,
        }
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

fn clamp_interval(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS)
    } else {
        FALLBACK_INTERVAL_SECS
    }
}

/// Every tunable the control loops read.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerModeConfig {
    /// Piston stroke interval in seconds per mode.
    pub piston_speed: BTreeMap<ModeLevel, f64>,
    /// Vibration strength per mode; also the top of the linked ramp.
    pub vibe_strength: BTreeMap<ModeLevel, f64>,
    /// Bottom of the linked ramp per mode.
    pub vibe_min_strength: BTreeMap<ModeLevel, f64>,
    /// Stroke interval when a piston-only device stands in for a vibrator.
    pub vibe_as_piston_speed: BTreeMap<ModeLevel, f64>,
    pub piston_range: PositionRange,
    pub vibe_as_piston_range: PositionRange,
    pub pose_ranges: BTreeMap<AnimationHash, PositionRange>,
    pub idle_motion: bool,
    /// Half period of the idle wave in seconds.
    pub idle_interval: f64,
    /// Device transport only tolerates a few commands per second.
    pub low_rate_device: bool,
}

impl Default for PerModeConfig {
    fn default() -> Self {
        Self {
            piston_speed: BTreeMap::from([(1, 0.9), (2, 0.5), (3, 0.4)]),
            vibe_strength: BTreeMap::from([(1, 0.5), (2, 1.0)]),
            vibe_min_strength: BTreeMap::from([(1, 0.3), (2, 0.6)]),
            vibe_as_piston_speed: BTreeMap::from([(1, 0.9), (2, 0.4)]),
            piston_range: PositionRange::new(0.0, 0.8),
            vibe_as_piston_range: PositionRange::new(0.0, 0.8),
            pose_ranges: POSES.iter().map(|p| (p.hash, p.range)).collect(),
            idle_motion: false,
            idle_interval: 3.0,
            low_rate_device: false,
        }
    }
}

impl PerModeConfig {
    pub fn piston_interval(&self, mode: ModeLevel) -> Duration {
        interval_for(&self.piston_speed, mode)
    }

    pub fn vibe_as_piston_interval(&self, mode: ModeLevel) -> Duration {
        interval_for(&self.vibe_as_piston_speed, mode)
    }

    /// Configured strength for `mode`; `0` for mode 0 or unknown levels.
    pub fn vibe_max(&self, mode: ModeLevel) -> f64 {
        if mode == 0 {
            return 0.0;
        }
        self.vibe_strength.get(&mode).copied().unwrap_or(0.0)
    }

    /// Bottom of the ramp for `mode`, never above [`Self::vibe_max`].
    pub fn vibe_min(&self, mode: ModeLevel) -> f64 {
        let max = self.vibe_max(mode);
        self.vibe_min_strength
            .get(&mode)
            .copied()
            .unwrap_or(0.0)
            .min(max)
    }

    /// Stroke range for a pose, falling back to the table default.
    pub fn pose_range(&self, hash: AnimationHash) -> Option<PositionRange> {
        self.pose_ranges
            .get(&hash)
            .copied()
            .or_else(|| pose_profile(hash).map(|p| p.range))
    }

    pub fn idle_period(&self) -> Duration {
        Duration::from_secs_f64(clamp_interval(self.idle_interval))
    }

    pub fn set_piston_speed(&mut self, mode: ModeLevel, secs: f64) {
        self.piston_speed.insert(mode, clamp_interval(secs));
    }

    pub fn set_vibe_as_piston_speed(&mut self, mode: ModeLevel, secs: f64) {
        self.vibe_as_piston_speed.insert(mode, clamp_interval(secs));
    }

    /// Set the strength for `mode`, lowering the ramp floor if it would end
    /// up above the new strength.
    pub fn set_vibe_strength(&mut self, mode: ModeLevel, level: f64) {
        let level = clamp_unit(level);
        self.vibe_strength.insert(mode, level);
        if let Some(floor) = self.vibe_min_strength.get_mut(&mode) {
            *floor = floor.min(level);
        }
    }

    /// Set the ramp floor for `mode`, raising the strength if needed.
    pub fn set_vibe_min_strength(&mut self, mode: ModeLevel, level: f64) {
        let level = clamp_unit(level);
        self.vibe_min_strength.insert(mode, level);
        let top = self.vibe_strength.entry(mode).or_insert(level);
        *top = top.max(level);
    }

    pub fn set_piston_min(&mut self, v: f64) {
        self.piston_range = self.piston_range.with_min(v);
    }

    pub fn set_piston_max(&mut self, v: f64) {
        self.piston_range = self.piston_range.with_max(v);
    }

    pub fn set_vibe_as_piston_min(&mut self, v: f64) {
        self.vibe_as_piston_range = self.vibe_as_piston_range.with_min(v);
    }

    pub fn set_vibe_as_piston_max(&mut self, v: f64) {
        self.vibe_as_piston_range = self.vibe_as_piston_range.with_max(v);
    }

    /// Override the stroke range of a known pose. Unknown hashes are ignored.
    pub fn set_pose_range(&mut self, hash: AnimationHash, min: f64, max: f64) -> bool {
        let Some(current) = self.pose_range(hash) else {
            return false;
        };
        let range = current.with_min(min).with_max(max);
        self.pose_ranges.insert(hash, range);
        true
    }

    pub fn set_idle_motion(&mut self, enabled: bool) {
        self.idle_motion = enabled;
    }

    pub fn set_idle_interval(&mut self, secs: f64) {
        self.idle_interval = clamp_interval(secs);
    }

    pub fn set_low_rate_device(&mut self, enabled: bool) {
        self.low_rate_device = enabled;
    }

    /// Build a config from parsed JSON, key by key.
    ///
    /// Returns the config and whether anything had to be repaired.
    pub fn from_json(value: &Value) -> (Self, bool) {
        let defaults = Self::default();
        let Some(obj) = value.as_object() else {
            return (defaults, true);
        };
        let mut repaired = false;
        let mut cfg = defaults.clone();

        cfg.piston_speed = merge_levels(obj, "piston_speed", &defaults.piston_speed, &mut repaired, valid_interval);
        cfg.vibe_strength = merge_levels(obj, "vibe_strength", &defaults.vibe_strength, &mut repaired, valid_unit);
        cfg.vibe_min_strength =
            merge_levels(obj, "vibe_min_strength", &defaults.vibe_min_strength, &mut repaired, valid_unit);
        cfg.vibe_as_piston_speed =
            merge_levels(obj, "vibe_as_piston_speed", &defaults.vibe_as_piston_speed, &mut repaired, valid_interval);
        cfg.piston_range = read_range(obj.get("piston_range"), defaults.piston_range, &mut repaired);
        cfg.vibe_as_piston_range =
            read_range(obj.get("vibe_as_piston_range"), defaults.vibe_as_piston_range, &mut repaired);
        cfg.pose_ranges = merge_pose_ranges(obj.get("pose_ranges"), &defaults.pose_ranges, &mut repaired);
        cfg.idle_motion = read_field(obj.get("idle_motion"), defaults.idle_motion, &mut repaired, |_| true);
        cfg.idle_interval =
            read_field(obj.get("idle_interval"), defaults.idle_interval, &mut repaired, valid_interval);
        cfg.low_rate_device =
            read_field(obj.get("low_rate_device"), defaults.low_rate_device, &mut repaired, |_| true);

        for (mode, floor) in cfg.vibe_min_strength.iter_mut() {
            let top = cfg.vibe_strength.get(mode).copied().unwrap_or(1.0);
            if *floor > top {
                *floor = top;
                repaired = true;
            }
        }
        (cfg, repaired)
    }
}

fn interval_for(map: &BTreeMap<ModeLevel, f64>, mode: ModeLevel) -> Duration {
    let secs = map.get(&mode).copied().unwrap_or(FALLBACK_INTERVAL_SECS);
    Duration::from_secs_f64(clamp_interval(secs))
}

fn valid_unit(v: &f64) -> bool {
    (0.0..=1.0).contains(v)
}

fn valid_interval(v: &f64) -> bool {
    (MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(v)
}

fn read_field<T: serde::de::DeserializeOwned>(
    raw: Option<&Value>,
    default: T,
    repaired: &mut bool,
    valid: impl Fn(&T) -> bool,
) -> T {
    let Some(raw) = raw else {
        *repaired = true;
        return default;
    };
    match serde_json::from_value::<T>(raw.clone()) {
        Ok(v) if valid(&v) => v,
        _ => {
            *repaired = true;
            default
        }
    }
}

fn read_range(raw: Option<&Value>, default: PositionRange, repaired: &mut bool) -> PositionRange {
    read_field(raw, default, repaired, PositionRange::is_valid)
}

fn merge_levels(
    obj: &Map<String, Value>,
    key: &str,
    defaults: &BTreeMap<ModeLevel, f64>,
    repaired: &mut bool,
    valid: fn(&f64) -> bool,
) -> BTreeMap<ModeLevel, f64> {
    let mut merged = defaults.clone();
    let Some(entries) = obj.get(key).and_then(Value::as_object) else {
        *repaired = true;
        return merged;
    };
    for (k, v) in entries {
        match (k.parse::<ModeLevel>(), v.as_f64()) {
            (Ok(level), Some(x)) if level > 0 && valid(&x) => {
                merged.insert(level, x);
            }
            _ => *repaired = true,
        }
    }
    if defaults.keys().any(|k| !entries.contains_key(&k.to_string())) {
        *repaired = true;
    }
    merged
}

fn merge_pose_ranges(
    raw: Option<&Value>,
    defaults: &BTreeMap<AnimationHash, PositionRange>,
    repaired: &mut bool,
) -> BTreeMap<AnimationHash, PositionRange> {
    let mut merged = defaults.clone();
    let Some(entries) = raw.and_then(Value::as_object) else {
        *repaired = true;
        return merged;
    };
    for (k, v) in entries {
        let hash = k.parse::<AnimationHash>().ok().filter(|h| defaults.contains_key(h));
        let range = serde_json::from_value::<PositionRange>(v.clone())
            .ok()
            .filter(PositionRange::is_valid);
        match (hash, range) {
            (Some(hash), Some(range)) => {
                merged.insert(hash, range);
            }
            _ => *repaired = true,
        }
    }
    if defaults.keys().any(|k| !entries.contains_key(&k.to_string())) {
        *repaired = true;
    }
    merged
}

/// Persistence boundary for [`PerModeConfig`].
pub trait ConfigStore: Send + Sync {
    /// Load settings, falling back to defaults for anything unusable.
    fn load(&self) -> PerModeConfig;
    fn save(&self, config: &PerModeConfig) -> Result<(), ConfigError>;
}

/// Pretty-printed JSON file.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Value, ConfigError> {
        let text = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn save_or_warn(&self, config: &PerModeConfig) {
        if let Err(e) = self.save(config) {
            warn!(path = %self.path.display(), error = %e, "could not write settings");
        }
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> PerModeConfig {
        match self.read() {
            Ok(value) => {
                let (config, repaired) = PerModeConfig::from_json(&value);
                if repaired {
                    info!(path = %self.path.display(), "settings incomplete, writing repaired file");
                    self.save_or_warn(&config);
                } else {
                    info!(path = %self.path.display(), "settings loaded");
                }
                config
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "settings unreadable, using defaults");
                let config = PerModeConfig::default();
                self.save_or_warn(&config);
                config
            }
        }
    }

    fn save(&self, config: &PerModeConfig) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, text)?;
        info!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_round_trip_through_json() {
        let cfg = PerModeConfig::default();
        let value = serde_json::to_value(&cfg).unwrap();
        let (back, repaired) = PerModeConfig::from_json(&value);
        assert_eq!(back, cfg);
        assert!(!repaired);
    }

    #[test]
    fn serialized_mode_keys_are_strings() {
        let value = serde_json::to_value(PerModeConfig::default()).unwrap();
        assert_eq!(value["piston_speed"]["1"], json!(0.9));
        assert_eq!(value["piston_range"]["max"], json!(0.8));
    }

    #[test]
    fn missing_keys_take_defaults() {
        let (cfg, repaired) = PerModeConfig::from_json(&json!({
            "piston_speed": { "2": 0.7 },
        }));
        assert!(repaired);
        assert_eq!(cfg.piston_speed[&1], 0.9);
        assert_eq!(cfg.piston_speed[&2], 0.7);
        assert_eq!(cfg.piston_speed[&3], 0.4);
        assert_eq!(cfg.vibe_strength, PerModeConfig::default().vibe_strength);
    }

    #[test]
    fn invalid_entries_are_replaced() {
        let (cfg, repaired) = PerModeConfig::from_json(&json!({
            "vibe_strength": { "1": 3.5, "2": "loud", "x": 0.1 },
            "piston_range": { "min": 0.9, "max": 0.1 },
            "idle_interval": -2,
        }));
        assert!(repaired);
        assert_eq!(cfg.vibe_strength[&1], 0.5);
        assert_eq!(cfg.vibe_strength[&2], 1.0);
        assert_eq!(cfg.piston_range, PositionRange::new(0.0, 0.8));
        assert_eq!(cfg.idle_interval, 3.0);
    }

    #[test]
    fn extra_levels_are_kept() {
        let mut value = serde_json::to_value(PerModeConfig::default()).unwrap();
        value["piston_speed"]["4"] = json!(0.2);
        let (cfg, repaired) = PerModeConfig::from_json(&value);
        assert!(!repaired);
        assert_eq!(cfg.piston_speed[&4], 0.2);
    }

    #[test]
    fn non_object_is_all_defaults() {
        let (cfg, repaired) = PerModeConfig::from_json(&json!([1, 2, 3]));
        assert!(repaired);
        assert_eq!(cfg, PerModeConfig::default());
    }

    #[test]
    fn ramp_floor_never_exceeds_strength() {
        let (cfg, repaired) = PerModeConfig::from_json(&json!({
            "vibe_strength": { "1": 0.2, "2": 1.0 },
            "vibe_min_strength": { "1": 0.6, "2": 0.6 },
        }));
        assert!(repaired);
        assert_eq!(cfg.vibe_min_strength[&1], 0.2);
        assert_eq!(cfg.vibe_min(1), 0.2);
    }

    #[test]
    fn range_setters_drag_the_other_bound() {
        let mut cfg = PerModeConfig::default();
        cfg.set_piston_min(0.9);
        assert_eq!(cfg.piston_range, PositionRange::new(0.9, 0.9));
        cfg.set_piston_max(0.3);
        assert_eq!(cfg.piston_range, PositionRange::new(0.3, 0.3));
        cfg.set_vibe_as_piston_max(1.7);
        assert_eq!(cfg.vibe_as_piston_range.max, 1.0);
    }

    #[test]
    fn strength_setters_keep_floor_below_top() {
        let mut cfg = PerModeConfig::default();
        cfg.set_vibe_strength(2, 0.4);
        assert_eq!(cfg.vibe_min_strength[&2], 0.4);
        cfg.set_vibe_min_strength(1, 0.9);
        assert_eq!(cfg.vibe_strength[&1], 0.9);
    }

    #[test]
    fn speeds_have_a_floor() {
        let mut cfg = PerModeConfig::default();
        cfg.set_piston_speed(1, 0.0);
        assert_eq!(cfg.piston_interval(1), Duration::from_secs_f64(MIN_INTERVAL_SECS));
        assert_eq!(cfg.piston_interval(9), Duration::from_secs(1));
    }

    #[test]
    fn speeds_have_a_ceiling() {
        let mut cfg = PerModeConfig::default();
        cfg.set_piston_speed(1, 1e20);
        cfg.set_vibe_as_piston_speed(2, f64::MAX);
        cfg.set_idle_interval(1e300);
        let ceiling = Duration::from_secs_f64(MAX_INTERVAL_SECS);
        assert_eq!(cfg.piston_interval(1), ceiling);
        assert_eq!(cfg.vibe_as_piston_interval(2), ceiling);
        assert_eq!(cfg.idle_period(), ceiling);
    }

    #[test]
    fn oversized_intervals_fall_back_to_defaults() {
        let (cfg, repaired) = PerModeConfig::from_json(&json!({
            "piston_speed": { "1": 1e20, "2": 60.0 },
            "idle_interval": 1e20,
        }));
        assert!(repaired);
        assert_eq!(cfg.piston_speed[&1], 0.9);
        assert_eq!(cfg.piston_speed[&2], 60.0);
        assert_eq!(cfg.idle_interval, 3.0);
        assert_eq!(cfg.piston_interval(1), Duration::from_secs_f64(0.9));
    }

    #[test]
    fn pose_range_override() {
        let mut cfg = PerModeConfig::default();
        assert!(cfg.set_pose_range(7717404, 0.1, 0.9));
        assert_eq!(cfg.pose_range(7717404), Some(PositionRange::new(0.1, 0.9)));
        assert!(!cfg.set_pose_range(42, 0.1, 0.9));
        assert_eq!(cfg.pose_range(42), None);
    }
}
