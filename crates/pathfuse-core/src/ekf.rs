use crate::coords::{compass_to_east_zero, wrap_to_pi};
use crate::turn::MovementType;
use crate::types::{CorrectionKind, FixSourceKind, StepInput};
use nalgebra::{Matrix2, Matrix3, SMatrix, Vector2, Vector3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CONFIGURATION
// ---------------------------------------------------------------------------
type Scalar = f64;

const MS_PER_MINUTE: Scalar = 60_000.0;
const MIN_PENALTY: Scalar = 1.0;
const MAX_PENALTY: Scalar = 4.0;

// Type Aliases
type StateVector = Vector3<Scalar>;
type Covariance = Matrix3<Scalar>;
type ObservationMatrix = SMatrix<Scalar, 2, 3>;
type NoiseShaping = SMatrix<Scalar, 3, 2>;

// ---------------------------------------------------------------------------
// STATUS & TUNING
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterStatus {
    Updated,
    Coasting,
    SkippedInvalidInput,
    RejectedInnovation(Scalar),
    SingularMatrix,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EkfTuning {
    pub initial_bearing_var: Scalar,
    pub initial_position_var: Scalar,
    /// Base heading σ per step (rad) by movement type.
    pub straight_heading_std: Scalar,
    pub pseudo_turn_heading_std: Scalar,
    pub turn_heading_std: Scalar,
    /// Stride σ = pct · average stride + misdirection (m).
    pub step_percentage_error: Scalar,
    pub step_misdirection: Scalar,
    /// Measurement σ (m) per correction source.
    pub radio_fix_std: Scalar,
    pub satellite_fix_std: Scalar,
    pub recursive_std: Scalar,
}

impl Default for EkfTuning {
    fn default() -> Self {
        Self {
            initial_bearing_var: 10.0_f64.to_radians().powi(2),
            initial_position_var: 1.0,
            straight_heading_std: 2.0_f64.to_radians(),
            pseudo_turn_heading_std: 5.0_f64.to_radians(),
            turn_heading_std: 12.0_f64.to_radians(),
            step_percentage_error: 0.1,
            step_misdirection: 0.1,
            radio_fix_std: 6.0,
            satellite_fix_std: 4.0,
            recursive_std: 2.0,
        }
    }
}

impl EkfTuning {
    pub fn heading_std(&self, movement: MovementType) -> Scalar {
        match movement {
            MovementType::Straight => self.straight_heading_std,
            MovementType::PseudoTurn => self.pseudo_turn_heading_std,
            MovementType::Turn => self.turn_heading_std,
        }
    }

    pub fn measurement_std(&self, kind: CorrectionKind) -> Scalar {
        match kind {
            CorrectionKind::Absolute(FixSourceKind::Radio) => self.radio_fix_std,
            CorrectionKind::Absolute(FixSourceKind::Satellite) => self.satellite_fix_std,
            CorrectionKind::Recursive => self.recursive_std,
        }
    }
}

/// Staleness multiplier: 1.0 right after a fix, rising linearly to 4.0 once
/// `since_fix_ms` reaches `window_ms`.
pub fn penalty_factor(since_fix_ms: u64, window_ms: u64) -> Scalar {
    if window_ms == 0 {
        return MAX_PENALTY;
    }
    let ratio = since_fix_ms.min(window_ms) as Scalar / window_ms as Scalar;
    MIN_PENALTY + (MAX_PENALTY - MIN_PENALTY) * ratio
}

// ---------------------------------------------------------------------------
// MAIN FILTER
// ---------------------------------------------------------------------------

/// EKF over `[bearing, east, north]`.
///
/// The bearing is east-zero, counter-clockwise, and always wrapped into
/// `(-π, π]`. Prediction injects the PDR stride along the filter's bearing;
/// correction observes `(east, north)`.
pub struct ExtendedKalmanFilter {
    pub state: StateVector,
    pub p_cov: Covariance,
    pub tuning: EkfTuning,

    // East-zero bearing of the previous heading input.
    last_input_bearing: Option<Scalar>,
}

impl ExtendedKalmanFilter {
    pub fn new(tuning: EkfTuning) -> Self {
        let mut p = Covariance::zeros();
        p[(0, 0)] = tuning.initial_bearing_var;
        p[(1, 1)] = tuning.initial_position_var;
        p[(2, 2)] = tuning.initial_position_var;

        Self {
            state: StateVector::zeros(),
            p_cov: p,
            tuning,
            last_input_bearing: None,
        }
    }

    /// Seeds the bearing from a compass heading before the first step.
    pub fn seed_heading(&mut self, heading_rad: Scalar) {
        if !heading_rad.is_finite() {
            return;
        }
        let bearing = compass_to_east_zero(heading_rad);
        self.state[0] = bearing;
        self.last_input_bearing = Some(bearing);
    }

    pub fn bearing(&self) -> Scalar {
        self.state[0]
    }

    pub fn position(&self) -> Vector2<Scalar> {
        Vector2::new(self.state[1], self.state[2])
    }

    // =====================================================================
    // PREDICT
    // =====================================================================
    pub fn predict(&mut self, step: &StepInput) -> FilterStatus {
        if !step.heading_rad.is_finite() || !step.step_length.is_finite() || step.step_length < 0.0
        {
            return FilterStatus::SkippedInvalidInput;
        }

        let input_bearing = compass_to_east_zero(step.heading_rad);
        let d_bearing = match self.last_input_bearing {
            Some(prev) => wrap_to_pi(input_bearing - prev),
            None => {
                self.state[0] = input_bearing;
                0.0
            }
        };
        self.last_input_bearing = Some(input_bearing);

        let theta = wrap_to_pi(self.state[0] + d_bearing);
        let (s, c) = theta.sin_cos();
        let l = step.step_length;

        // X += T(θ) · [Δbearing; stride]
        self.state[0] = theta;
        self.state[1] += l * c;
        self.state[2] += l * s;

        self.propagate_cov(step, theta, l);
        FilterStatus::Updated
    }

    fn propagate_cov(&mut self, step: &StepInput, theta: Scalar, l: Scalar) {
        let (s, c) = theta.sin_cos();

        let f = Covariance::new(
            1.0, 0.0, 0.0, //
            -l * s, 1.0, 0.0, //
            l * c, 0.0, 1.0,
        );
        let shaping = NoiseShaping::new(
            1.0, 0.0, //
            -l * s, c, //
            l * c, s,
        );

        let elapsed_min = step.timestamp_ms as Scalar / MS_PER_MINUTE;
        let sigma_heading = self.tuning.heading_std(step.movement_type) * elapsed_min.max(1.0);
        let sigma_step = (self.tuning.step_percentage_error * step.average_step_length
            + self.tuning.step_misdirection)
            * step.penalty_factor.max(MIN_PENALTY);
        let q = Matrix2::new(sigma_heading.powi(2), 0.0, 0.0, sigma_step.powi(2));

        self.p_cov = f * self.p_cov * f.transpose() + shaping * q * shaping.transpose();
        self.p_cov = (self.p_cov + self.p_cov.transpose()) * 0.5;
    }

    // =====================================================================
    // UPDATE
    // =====================================================================

    /// Corrects the state with an absolute (east, north) measurement.
    ///
    /// The measurement σ depends on `kind` and is inflated by
    /// `penalty_factor`.
    pub fn update(
        &mut self,
        measurement: Vector2<Scalar>,
        kind: CorrectionKind,
        penalty_factor: Scalar,
    ) -> FilterStatus {
        if !measurement.x.is_finite() || !measurement.y.is_finite() {
            return FilterStatus::SkippedInvalidInput;
        }

        let h = ObservationMatrix::new(
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        );
        let sigma = self.tuning.measurement_std(kind);
        let r = Matrix2::identity() * sigma.powi(2) * penalty_factor.max(MIN_PENALTY);

        let innovation = measurement - h * self.state;
        let s = h * self.p_cov * h.transpose() + r;

        if let Some(s_inv) = s.try_inverse() {
            let k_gain = self.p_cov * h.transpose() * s_inv;
            self.state += k_gain * innovation;
            self.state[0] = wrap_to_pi(self.state[0]);

            let i_minus_kh = Covariance::identity() - k_gain * h;
            self.p_cov =
                i_minus_kh * self.p_cov * i_minus_kh.transpose() + k_gain * r * k_gain.transpose();

            FilterStatus::Updated
        } else {
            FilterStatus::SingularMatrix
        }
    }
}

impl Default for ExtendedKalmanFilter {
    fn default() -> Self {
        Self::new(EkfTuning::default())
    }
}
