//! Pedestrian dead reckoning: stride integration, barometric elevation,
//! floor counting and elevator detection.
//!
//! Not thread-safe; owned by the same context that drives the filter.

use crate::coords::compass_to_east_zero;
use crate::outlier::median;
use crate::ring_buffer::RingBuffer;
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

// Barometer samples whose median defines zero elevation.
const SETTLE_SAMPLES: usize = 3;
const MIN_GRAVITY_NORM: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdrConfig {
    /// Fixed stride in meters; `None` estimates each stride with Weinberg.
    pub manual_step_length: Option<f64>,
    pub weinberg_k: f64,
    /// Meters per floor.
    pub floor_height: f64,
    pub elevation_window_size: usize,
    pub accel_window_size: usize,
    /// m/s²
    pub horizontal_epsilon: f64,
    /// m/s²
    pub vertical_movement_threshold: f64,
}

impl Default for PdrConfig {
    fn default() -> Self {
        Self {
            manual_step_length: None,
            weinberg_k: 0.364,
            floor_height: 4.0,
            elevation_window_size: 4,
            accel_window_size: 100,
            horizontal_epsilon: 0.18,
            vertical_movement_threshold: 0.3,
        }
    }
}

/// Weinberg stride estimate from the acceleration magnitude swing of one step.
pub fn weinberg_step_length(k: f64, accel_magnitudes: &[f64]) -> Option<f64> {
    let (min, max) = accel_magnitudes
        .iter()
        .copied()
        .filter(|a| a.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, a| match acc {
            None => Some((a, a)),
            Some((lo, hi)) => Some((lo.min(a), hi.max(a))),
        })?;
    Some(k * (max - min).powf(0.25) * 2.0)
}

pub struct PdrProcessing {
    config: PdrConfig,

    position: Vector2<f64>,
    last_step_length: f64,
    sum_step_length: f64,
    step_count: u32,

    settle_samples: Vec<f64>,
    start_elevation: Option<f64>,
    elevation: f64,
    elevation_buffer: RingBuffer<f64>,
    current_floor: i32,

    vertical_accel: RingBuffer<f64>,
    horizontal_accel: RingBuffer<f64>,
    elevator: bool,
}

impl PdrProcessing {
    pub fn new(config: PdrConfig) -> Self {
        let elevation_buffer = RingBuffer::new(config.elevation_window_size);
        let vertical_accel = RingBuffer::new(config.accel_window_size);
        let horizontal_accel = RingBuffer::new(config.accel_window_size);
        Self {
            config,
            position: Vector2::zeros(),
            last_step_length: 0.0,
            sum_step_length: 0.0,
            step_count: 0,
            settle_samples: Vec::with_capacity(SETTLE_SAMPLES),
            start_elevation: None,
            elevation: 0.0,
            elevation_buffer,
            current_floor: 0,
            vertical_accel,
            horizontal_accel,
            elevator: false,
        }
    }

    pub fn config(&self) -> &PdrConfig {
        &self.config
    }

    // =====================================================================
    // STRIDES
    // =====================================================================

    /// Integrates one step and returns the absolute (east, north) position.
    ///
    /// `heading_rad` is a compass heading (north = 0, clockwise). A step
    /// without usable acceleration history is not taken: the position stays
    /// put and `None` is returned.
    pub fn update_pdr(
        &mut self,
        step_end_time_ms: u64,
        accel_magnitudes: &[f64],
        heading_rad: f64,
    ) -> Option<Vector2<f64>> {
        let step_length = match self.config.manual_step_length {
            Some(length) => length,
            None => match weinberg_step_length(self.config.weinberg_k, accel_magnitudes) {
                Some(length) => length,
                None => {
                    tracing::debug!(step_end_time_ms, "step without acceleration history");
                    return None;
                }
            },
        };

        let adapted = compass_to_east_zero(heading_rad);
        self.position += Vector2::new(step_length * adapted.cos(), step_length * adapted.sin());

        self.last_step_length = step_length;
        self.sum_step_length += step_length;
        self.step_count += 1;

        Some(self.position)
    }

    pub fn position(&self) -> Vector2<f64> {
        self.position
    }

    /// Stride used by the most recent step.
    pub fn last_step_length(&self) -> f64 {
        self.last_step_length
    }

    /// Mean stride since the previous call; resets the accumulator.
    /// Returns 0.0 when no step was taken in between.
    pub fn average_step_length(&mut self) -> f64 {
        let avg = if self.step_count == 0 {
            0.0
        } else {
            self.sum_step_length / self.step_count as f64
        };
        self.sum_step_length = 0.0;
        self.step_count = 0;
        avg
    }

    // =====================================================================
    // ELEVATION
    // =====================================================================

    /// Returns elevation relative to the session start in meters.
    ///
    /// The first samples only establish the zero reference (their median) and
    /// report 0.0.
    pub fn update_elevation(&mut self, absolute_altitude: f64) -> f64 {
        let start = match self.start_elevation {
            Some(start) => start,
            None => {
                self.settle_samples.push(absolute_altitude);
                if self.settle_samples.len() == SETTLE_SAMPLES {
                    let start = median(&self.settle_samples);
                    tracing::debug!(start, "elevation reference settled");
                    self.start_elevation = Some(start);
                }
                return 0.0;
            }
        };

        self.elevation = absolute_altitude - start;
        self.elevation_buffer.put(self.elevation);

        if self.elevation_buffer.is_full() {
            if let Some(mean) = self.elevation_buffer.mean() {
                let floor = if mean.abs() > self.config.floor_height {
                    (mean / self.config.floor_height).round() as i32
                } else {
                    0
                };
                if floor != self.current_floor {
                    tracing::info!(from = self.current_floor, to = floor, mean, "floor change");
                    self.current_floor = floor;
                }
            }
        }

        self.elevation
    }

    pub fn elevation(&self) -> f64 {
        self.elevation
    }

    pub fn start_elevation(&self) -> Option<f64> {
        self.start_elevation
    }

    pub fn current_floor(&self) -> i32 {
        self.current_floor
    }

    // =====================================================================
    // ELEVATOR
    // =====================================================================

    /// Splits linear acceleration into vertical and horizontal parts against
    /// gravity and reports whether the windowed motion looks like an elevator.
    pub fn estimate_elevator(&mut self, gravity: [f64; 3], linear_accel: [f64; 3]) -> bool {
        let g = Vector3::from(gravity);
        let a = Vector3::from(linear_accel);
        let g_norm = g.norm();
        if g_norm < MIN_GRAVITY_NORM || !g_norm.is_finite() {
            return self.elevator;
        }

        let up = g / g_norm;
        let vertical = a.dot(&up);
        let horizontal = (a - up * vertical).norm();

        self.vertical_accel.put(vertical.abs());
        self.horizontal_accel.put(horizontal);

        if self.vertical_accel.is_full() && self.horizontal_accel.is_full() {
            let mean_v = self.vertical_accel.mean().unwrap_or(0.0);
            let mean_h = self.horizontal_accel.mean().unwrap_or(0.0);
            self.elevator = mean_h < self.config.horizontal_epsilon
                && mean_v > self.config.vertical_movement_threshold;
        }
        self.elevator
    }

    pub fn elevator(&self) -> bool {
        self.elevator
    }

    /// Returns the processor to its freshly constructed state.
    pub fn reset_pdr(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

impl Default for PdrProcessing {
    fn default() -> Self {
        Self::new(PdrConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use core::f64::consts::FRAC_PI_2;

    fn manual(step: f64) -> PdrProcessing {
        PdrProcessing::new(PdrConfig {
            manual_step_length: Some(step),
            ..PdrConfig::default()
        })
    }

    #[test]
    fn test_straight_line_east() {
        let mut pdr = manual(0.7);
        let mut pos = Vector2::zeros();
        for i in 0..10 {
            pos = pdr.update_pdr(500 * (i + 1), &[], FRAC_PI_2).unwrap();
        }
        assert_relative_eq!(pos.x, 7.0, epsilon = 1e-9);
        assert_relative_eq!(pos.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_compass_north_is_positive_north() {
        let mut pdr = manual(1.0);
        let pos = pdr.update_pdr(100, &[], 0.0).unwrap();
        assert_relative_eq!(pos.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(pos.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_weinberg_length() {
        let mags = [9.0, 10.5, 13.0, 11.0];
        let expected = 0.364 * 4.0_f64.powf(0.25) * 2.0;
        assert_relative_eq!(weinberg_step_length(0.364, &mags).unwrap(), expected);
        assert!(weinberg_step_length(0.364, &[]).is_none());

        let mut pdr = PdrProcessing::default();
        let pos = pdr.update_pdr(100, &mags, FRAC_PI_2).unwrap();
        assert_relative_eq!(pos.x, expected, epsilon = 1e-12);
        assert_relative_eq!(pdr.last_step_length(), expected);
    }

    #[test]
    fn test_empty_history_keeps_position() {
        let mut pdr = PdrProcessing::default();
        assert_eq!(pdr.update_pdr(100, &[], 0.3), None);
        assert_eq!(pdr.position(), Vector2::zeros());
        assert_eq!(pdr.average_step_length(), 0.0);
    }

    #[test]
    fn test_average_step_length_resets() {
        let mut pdr = PdrProcessing::default();
        pdr.update_pdr(100, &[9.0, 10.0], 0.0);
        pdr.update_pdr(200, &[9.0, 25.0], 0.0);
        let expected = (0.364 * 2.0 + 0.364 * 2.0 * 2.0) / 2.0;
        assert_relative_eq!(pdr.average_step_length(), expected, epsilon = 1e-12);
        assert_eq!(pdr.average_step_length(), 0.0);
    }

    #[test]
    fn test_elevation_settles_on_median() {
        let mut pdr = PdrProcessing::default();
        assert_eq!(pdr.update_elevation(10.0), 0.0);
        assert_eq!(pdr.update_elevation(10.2), 0.0);
        assert_eq!(pdr.update_elevation(9.9), 0.0);
        assert_eq!(pdr.start_elevation(), Some(10.0));
        assert_eq!(pdr.update_elevation(10.0), 0.0);
        assert_relative_eq!(pdr.update_elevation(11.5), 1.5);
    }

    #[test]
    fn test_floor_changes_follow_window_mean() {
        let mut pdr = PdrProcessing::default();
        for _ in 0..3 {
            pdr.update_elevation(50.0);
        }
        for _ in 0..3 {
            pdr.update_elevation(59.0);
        }
        assert_eq!(pdr.current_floor(), 0, "window not yet full");
        pdr.update_elevation(59.0);
        assert_eq!(pdr.current_floor(), 2);

        for _ in 0..4 {
            pdr.update_elevation(50.0);
        }
        assert_eq!(pdr.current_floor(), 0);

        for _ in 0..4 {
            pdr.update_elevation(45.5);
        }
        assert_eq!(pdr.current_floor(), -1);

        for _ in 0..4 {
            pdr.update_elevation(53.0);
        }
        assert_eq!(pdr.current_floor(), 0, "within one floor height of start");
    }

    #[test]
    fn test_elevator_detection() {
        let mut pdr = PdrProcessing::new(PdrConfig {
            accel_window_size: 10,
            ..PdrConfig::default()
        });
        let gravity = [0.0, 0.0, 9.81];
        for _ in 0..9 {
            assert!(!pdr.estimate_elevator(gravity, [0.01, 0.02, 0.6]));
        }
        assert!(pdr.estimate_elevator(gravity, [0.01, 0.02, 0.6]));

        // Walking: lots of lateral motion
        for _ in 0..10 {
            pdr.estimate_elevator(gravity, [1.2, -0.8, 0.6]);
        }
        assert!(!pdr.elevator());
    }

    #[test]
    fn test_elevator_ignores_zero_gravity() {
        let mut pdr = PdrProcessing::default();
        assert!(!pdr.estimate_elevator([0.0; 3], [0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut pdr = manual(0.8);
        pdr.update_pdr(100, &[], 0.0);
        for alt in [10.0, 10.0, 10.0, 30.0, 30.0, 30.0, 30.0] {
            pdr.update_elevation(alt);
        }
        assert_eq!(pdr.current_floor(), 5);

        pdr.reset_pdr();
        assert_eq!(pdr.position(), Vector2::zeros());
        assert_eq!(pdr.current_floor(), 0);
        assert_eq!(pdr.elevation(), 0.0);
        assert_eq!(pdr.start_elevation(), None);
        assert_eq!(pdr.average_step_length(), 0.0);
        assert_eq!(pdr.config().manual_step_length, Some(0.8));
    }
}
