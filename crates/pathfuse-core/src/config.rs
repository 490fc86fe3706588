//! Externally supplied configuration with per-key default fallback.

use crate::ekf::EkfTuning;
use crate::error::{FusionError, Result};
use crate::estimator::EstimatorKind;
use crate::particle::ParticleConfig;
use crate::pdr::PdrConfig;
use crate::turn::TurnConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Accepted range for a numeric option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionBounds {
    pub key: &'static str,
    pub min: f64,
    pub max: f64,
}

impl OptionBounds {
    pub const fn new(key: &'static str, min: f64, max: f64) -> Self {
        Self { key, min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

pub mod bounds {
    use super::OptionBounds;

    pub const MANUAL_STEP_LENGTH: OptionBounds = OptionBounds::new("manual_step_length", 0.1, 2.5);
    pub const FLOOR_HEIGHT: OptionBounds = OptionBounds::new("floor_height", 1.0, 20.0);
    pub const ELEVATION_WINDOW_SIZE: OptionBounds =
        OptionBounds::new("elevation_window_size", 1.0, 1000.0);
    pub const ACCEL_WINDOW_SIZE: OptionBounds = OptionBounds::new("accel_window_size", 1.0, 10_000.0);
    pub const HORIZONTAL_EPSILON: OptionBounds = OptionBounds::new("horizontal_epsilon", 0.0, 10.0);
    pub const VERTICAL_MOVEMENT_THRESHOLD: OptionBounds =
        OptionBounds::new("vertical_movement_threshold", 0.0, 10.0);
    pub const WEINBERG_K: OptionBounds = OptionBounds::new("weinberg_k", 0.01, 2.0);
    pub const RELEVANCE_THRESHOLD_MS: OptionBounds =
        OptionBounds::new("relevance_threshold_ms", 0.0, 600_000.0);
    pub const MAX_PENALTY_WINDOW_MS: OptionBounds =
        OptionBounds::new("max_penalty_window_ms", 0.0, 600_000.0);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub pdr: PdrConfig,
    pub turn: TurnConfig,
    pub ekf: EkfTuning,
    pub particle: ParticleConfig,
    pub estimator: EstimatorKind,
    /// Radio fixes older than this relative to the step are discarded.
    pub relevance_threshold_ms: u64,
    /// Time since the last fix at which the penalty factor saturates.
    pub max_penalty_window_ms: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            pdr: PdrConfig::default(),
            turn: TurnConfig::default(),
            ekf: EkfTuning::default(),
            particle: ParticleConfig::default(),
            estimator: EstimatorKind::default(),
            relevance_threshold_ms: 5000,
            max_penalty_window_ms: 3000,
        }
    }
}

impl FusionConfig {
    /// Builds a config from string key/value pairs.
    ///
    /// Unknown keys are ignored; unparsable or out-of-range values keep the
    /// default and log a warning.
    pub fn from_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut cfg = Self::default();
        for (key, raw) in overrides {
            cfg.apply_override(key, raw);
        }
        cfg
    }

    /// Parses a JSON document; missing fields take their defaults and the
    /// result is sanitized.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self =
            serde_json::from_str(json).map_err(|e| FusionError::Config(e.to_string()))?;
        Ok(cfg.sanitized())
    }

    pub fn apply_override(&mut self, key: &str, raw: &str) {
        use bounds::*;

        match key {
            "manual_step_length" => {
                let trimmed = raw.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
                    self.pdr.manual_step_length = None;
                } else if let Some(v) = parse_bounded(&MANUAL_STEP_LENGTH, raw) {
                    self.pdr.manual_step_length = Some(v);
                }
            }
            "floor_height" => set_f64(&mut self.pdr.floor_height, &FLOOR_HEIGHT, raw),
            "elevation_window_size" => {
                set_usize(&mut self.pdr.elevation_window_size, &ELEVATION_WINDOW_SIZE, raw)
            }
            "accel_window_size" => {
                set_usize(&mut self.pdr.accel_window_size, &ACCEL_WINDOW_SIZE, raw)
            }
            "horizontal_epsilon" => {
                set_f64(&mut self.pdr.horizontal_epsilon, &HORIZONTAL_EPSILON, raw)
            }
            "vertical_movement_threshold" => set_f64(
                &mut self.pdr.vertical_movement_threshold,
                &VERTICAL_MOVEMENT_THRESHOLD,
                raw,
            ),
            "weinberg_k" => set_f64(&mut self.pdr.weinberg_k, &WEINBERG_K, raw),
            "relevance_threshold_ms" => {
                set_u64(&mut self.relevance_threshold_ms, &RELEVANCE_THRESHOLD_MS, raw)
            }
            "max_penalty_window_ms" => {
                set_u64(&mut self.max_penalty_window_ms, &MAX_PENALTY_WINDOW_MS, raw)
            }
            "estimator" => match raw.parse::<EstimatorKind>() {
                Ok(kind) => self.estimator = kind,
                Err(err) => warn!(key, value = raw, %err, "keeping default estimator"),
            },
            _ => warn!(key, "ignoring unknown configuration key"),
        }
    }

    /// Replaces every out-of-range value with its default.
    pub fn sanitized(mut self) -> Self {
        use bounds::*;
        let d = Self::default();

        if let Some(v) = self.pdr.manual_step_length {
            if !MANUAL_STEP_LENGTH.contains(v) {
                warn!(value = v, "manual_step_length out of range, estimating strides");
                self.pdr.manual_step_length = None;
            }
        }
        check_f64(&mut self.pdr.floor_height, d.pdr.floor_height, &FLOOR_HEIGHT);
        check_f64(&mut self.pdr.weinberg_k, d.pdr.weinberg_k, &WEINBERG_K);
        check_f64(
            &mut self.pdr.horizontal_epsilon,
            d.pdr.horizontal_epsilon,
            &HORIZONTAL_EPSILON,
        );
        check_f64(
            &mut self.pdr.vertical_movement_threshold,
            d.pdr.vertical_movement_threshold,
            &VERTICAL_MOVEMENT_THRESHOLD,
        );
        check_usize(
            &mut self.pdr.elevation_window_size,
            d.pdr.elevation_window_size,
            &ELEVATION_WINDOW_SIZE,
        );
        check_usize(
            &mut self.pdr.accel_window_size,
            d.pdr.accel_window_size,
            &ACCEL_WINDOW_SIZE,
        );
        check_u64(
            &mut self.relevance_threshold_ms,
            d.relevance_threshold_ms,
            &RELEVANCE_THRESHOLD_MS,
        );
        check_u64(
            &mut self.max_penalty_window_ms,
            d.max_penalty_window_ms,
            &MAX_PENALTY_WINDOW_MS,
        );
        if self.particle.num_particles == 0 {
            warn!("num_particles must be positive, using default");
            self.particle.num_particles = d.particle.num_particles;
        }
        self
    }
}

fn parse_bounded(spec: &OptionBounds, raw: &str) -> Option<f64> {
    match raw.trim().parse::<f64>() {
        Ok(v) if spec.contains(v) => Some(v),
        Ok(v) => {
            warn!(key = spec.key, value = v, min = spec.min, max = spec.max, "out of range, keeping default");
            None
        }
        Err(_) => {
            warn!(key = spec.key, value = raw, "not a number, keeping default");
            None
        }
    }
}

fn set_f64(slot: &mut f64, spec: &OptionBounds, raw: &str) {
    if let Some(v) = parse_bounded(spec, raw) {
        *slot = v;
    }
}

fn set_usize(slot: &mut usize, spec: &OptionBounds, raw: &str) {
    if let Some(v) = parse_bounded(spec, raw) {
        *slot = v.round() as usize;
    }
}

fn set_u64(slot: &mut u64, spec: &OptionBounds, raw: &str) {
    if let Some(v) = parse_bounded(spec, raw) {
        *slot = v.round() as u64;
    }
}

fn check_f64(slot: &mut f64, default: f64, spec: &OptionBounds) {
    if !spec.contains(*slot) {
        warn!(key = spec.key, value = *slot, "out of range, using default");
        *slot = default;
    }
}

fn check_usize(slot: &mut usize, default: usize, spec: &OptionBounds) {
    if !spec.contains(*slot as f64) {
        warn!(key = spec.key, value = *slot, "out of range, using default");
        *slot = default;
    }
}

fn check_u64(slot: &mut u64, default: u64, spec: &OptionBounds) {
    if !spec.contains(*slot as f64) {
        warn!(key = spec.key, value = *slot, "out of range, using default");
        *slot = default;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cfg = FusionConfig::default();
        assert_eq!(cfg.pdr.manual_step_length, None);
        assert_eq!(cfg.pdr.floor_height, 4.0);
        assert_eq!(cfg.pdr.elevation_window_size, 4);
        assert_eq!(cfg.pdr.accel_window_size, 100);
        assert_eq!(cfg.pdr.horizontal_epsilon, 0.18);
        assert_eq!(cfg.pdr.vertical_movement_threshold, 0.3);
        assert_eq!(cfg.pdr.weinberg_k, 0.364);
        assert_eq!(cfg.relevance_threshold_ms, 5000);
        assert_eq!(cfg.max_penalty_window_ms, 3000);
    }

    #[test]
    fn test_valid_overrides_apply() {
        let cfg = FusionConfig::from_overrides(&overrides(&[
            ("manual_step_length", "0.75"),
            ("floor_height", "3.5"),
            ("accel_window_size", "50"),
            ("relevance_threshold_ms", "8000"),
            ("estimator", "particle"),
        ]));
        assert_eq!(cfg.pdr.manual_step_length, Some(0.75));
        assert_eq!(cfg.pdr.floor_height, 3.5);
        assert_eq!(cfg.pdr.accel_window_size, 50);
        assert_eq!(cfg.relevance_threshold_ms, 8000);
        assert_eq!(cfg.estimator, EstimatorKind::Particle);
    }

    #[test]
    fn test_invalid_overrides_fall_back() {
        let cfg = FusionConfig::from_overrides(&overrides(&[
            ("floor_height", "tall"),
            ("weinberg_k", "-1"),
            ("elevation_window_size", "NaN"),
            ("max_penalty_window_ms", "1e12"),
            ("estimator", "kalman"),
            ("colour", "blue"),
        ]));
        assert_eq!(cfg, FusionConfig::default());
    }

    #[test]
    fn test_sanitized_repairs_deserialized_values() {
        let json = r#"{"pdr": {"floor_height": -2.0, "manual_step_length": 9.0},
                       "particle": {"num_particles": 0},
                       "relevance_threshold_ms": 4000}"#;
        let cfg = FusionConfig::from_json(json).unwrap();
        assert_eq!(cfg.pdr.floor_height, 4.0);
        assert_eq!(cfg.pdr.manual_step_length, None);
        assert_eq!(cfg.particle.num_particles, 500);
        assert_eq!(cfg.relevance_threshold_ms, 4000);
    }

    #[test]
    fn test_malformed_json_is_a_config_error() {
        let err = FusionConfig::from_json("{\"pdr\": 3}").unwrap_err();
        assert!(matches!(err, FusionError::Config(_)));
    }
}
