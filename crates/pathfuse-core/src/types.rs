//! Value types exchanged between the positioning components.

use crate::coords::Geodetic;
use crate::turn::MovementType;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Where an absolute position fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixSourceKind {
    /// Radio fingerprint / WiFi positioning.
    Radio,
    /// GNSS receiver.
    Satellite,
}

impl FixSourceKind {
    /// Radio fixes go stale once they fall outside the relevance window.
    pub fn is_staleness_gated(self) -> bool {
        matches!(self, Self::Radio)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Radio => "radio",
            Self::Satellite => "satellite",
        }
    }
}

/// The kind of correction applied after a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionKind {
    /// A real absolute fix.
    Absolute(FixSourceKind),
    /// The filter's own previous belief carried forward by PDR.
    Recursive,
}

/// One detected step, as reported by the step detector.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEvent {
    pub timestamp_ms: u64,
    /// Acceleration magnitudes (m/s²) since the previous step.
    pub accel_magnitudes: Vec<f64>,
    /// Compass heading, north = 0, clockwise (rad).
    pub heading_rad: f64,
}

/// Motion input handed to an estimator's prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInput {
    pub timestamp_ms: u64,
    /// Compass heading, north = 0, clockwise (rad).
    pub heading_rad: f64,
    pub step_length: f64,
    pub average_step_length: f64,
    pub movement_type: MovementType,
    /// Staleness multiplier in `[1, 4]` derived from the time since the last
    /// accepted fix.
    pub penalty_factor: f64,
}

/// A PDR step as seen by the fusion worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepUpdate {
    pub timestamp_ms: u64,
    /// Absolute PDR position after the step (east, north).
    pub pdr_position: Vector2<f64>,
    pub heading_rad: f64,
    pub step_length: f64,
    pub average_step_length: f64,
    pub movement_type: MovementType,
}

/// Absolute position fix in geodetic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpportunisticFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: u64,
    pub source: FixSourceKind,
}

/// An absolute fix expressed in the session ENU frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnuFix {
    pub position: Vector2<f64>,
    pub timestamp_ms: u64,
    pub source: FixSourceKind,
}

/// Estimator measurement for one correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub position: Vector2<f64>,
    pub kind: CorrectionKind,
    pub penalty_factor: f64,
}

/// Output of one predict + correction cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedPosition {
    pub timestamp_ms: u64,
    pub enu: Vector2<f64>,
    pub geodetic: Geodetic,
    /// `None` when no correction was applied this cycle.
    pub correction: Option<CorrectionKind>,
}
