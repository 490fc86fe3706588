//! Common interface over the interchangeable position filters.

use crate::coords::ReferenceFrame;
use crate::displacement::DisplacementKalmanFilter;
use crate::ekf::{EkfTuning, ExtendedKalmanFilter, FilterStatus};
use crate::particle::{ParticleConfig, ParticleFilter};
use crate::types::{CorrectionKind, Measurement, StepInput};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

pub trait PositionEstimator: Send {
    fn name(&self) -> &'static str;

    /// Motion update for one detected step.
    fn predict(&mut self, step: &StepInput) -> FilterStatus;

    /// Correction with an ENU measurement.
    fn update(&mut self, measurement: &Measurement) -> FilterStatus;

    /// Current (east, north) estimate.
    fn position(&self) -> Vector2<f64>;

    /// East-zero bearing, if the estimator tracks one.
    fn heading(&self) -> Option<f64>;

    /// Whether `predict` moves the estimate with each step. Estimators that
    /// only move on fixes cannot be gated against their own position.
    fn uses_step_motion(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    #[default]
    Ekf,
    Displacement,
    Particle,
}

impl EstimatorKind {
    pub const ALL: [EstimatorKind; 3] = [Self::Ekf, Self::Displacement, Self::Particle];

    pub fn label(self) -> &'static str {
        match self {
            Self::Ekf => "ekf",
            Self::Displacement => "displacement",
            Self::Particle => "particle",
        }
    }
}

impl std::str::FromStr for EstimatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.label() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown estimator '{s}'"))
    }
}

pub fn build_estimator(
    kind: EstimatorKind,
    tuning: EkfTuning,
    particle: ParticleConfig,
    reference: ReferenceFrame,
) -> Box<dyn PositionEstimator> {
    match kind {
        EstimatorKind::Ekf => Box::new(ExtendedKalmanFilter::new(tuning)),
        EstimatorKind::Displacement => Box::new(DisplacementKalmanFilter::new(tuning)),
        EstimatorKind::Particle => Box::new(ParticleFilter::new(particle, reference)),
    }
}

impl PositionEstimator for ExtendedKalmanFilter {
    fn name(&self) -> &'static str {
        EstimatorKind::Ekf.label()
    }

    fn predict(&mut self, step: &StepInput) -> FilterStatus {
        ExtendedKalmanFilter::predict(self, step)
    }

    fn update(&mut self, m: &Measurement) -> FilterStatus {
        ExtendedKalmanFilter::update(self, m.position, m.kind, m.penalty_factor)
    }

    fn position(&self) -> Vector2<f64> {
        ExtendedKalmanFilter::position(self)
    }

    fn heading(&self) -> Option<f64> {
        Some(self.bearing())
    }
}

impl PositionEstimator for DisplacementKalmanFilter {
    fn name(&self) -> &'static str {
        EstimatorKind::Displacement.label()
    }

    fn predict(&mut self, step: &StepInput) -> FilterStatus {
        DisplacementKalmanFilter::predict(self, step)
    }

    fn update(&mut self, m: &Measurement) -> FilterStatus {
        DisplacementKalmanFilter::update(self, m.position, m.kind, m.penalty_factor)
    }

    fn position(&self) -> Vector2<f64> {
        DisplacementKalmanFilter::position(self)
    }

    fn heading(&self) -> Option<f64> {
        Some(DisplacementKalmanFilter::heading(self))
    }
}

impl PositionEstimator for ParticleFilter {
    fn name(&self) -> &'static str {
        EstimatorKind::Particle.label()
    }

    // Random-walk motion happens inside `update`.
    fn predict(&mut self, _step: &StepInput) -> FilterStatus {
        FilterStatus::Coasting
    }

    fn update(&mut self, m: &Measurement) -> FilterStatus {
        match m.kind {
            CorrectionKind::Recursive => FilterStatus::Coasting,
            CorrectionKind::Absolute(_) => {
                if self.update_enu(m.position) {
                    FilterStatus::Updated
                } else {
                    FilterStatus::RejectedInnovation(m.position.norm())
                }
            }
        }
    }

    fn position(&self) -> Vector2<f64> {
        self.mean_enu()
    }

    fn heading(&self) -> Option<f64> {
        None
    }

    fn uses_step_motion(&self) -> bool {
        false
    }
}
