use crate::coords::compass_to_east_zero;
use crate::ekf::{EkfTuning, FilterStatus};
use crate::types::{CorrectionKind, StepInput};
use nalgebra::{Matrix2, Matrix4, SMatrix, Vector2, Vector4};

type Scalar = f64;

type StateVector = Vector4<Scalar>;
type Covariance = Matrix4<Scalar>;
type ObservationMatrix = SMatrix<Scalar, 2, 4>;
type ControlMatrix = SMatrix<Scalar, 4, 2>;

/// Linear filter over `[east, north, step_east, step_north]`.
///
/// Each step replaces the step components with the PDR displacement and adds
/// them to the position. Process noise lives only on the 2D step
/// displacement; heading is never estimated.
pub struct DisplacementKalmanFilter {
    pub state: StateVector,
    pub p_cov: Covariance,
    pub tuning: EkfTuning,
    last_heading: Scalar,
}

impl DisplacementKalmanFilter {
    pub fn new(tuning: EkfTuning) -> Self {
        let mut p = Covariance::zeros();
        p[(0, 0)] = tuning.initial_position_var;
        p[(1, 1)] = tuning.initial_position_var;

        Self {
            state: StateVector::zeros(),
            p_cov: p,
            tuning,
            last_heading: 0.0,
        }
    }

    pub fn position(&self) -> Vector2<Scalar> {
        Vector2::new(self.state[0], self.state[1])
    }

    pub fn step_displacement(&self) -> Vector2<Scalar> {
        Vector2::new(self.state[2], self.state[3])
    }

    /// East-zero bearing of the last step input.
    pub fn heading(&self) -> Scalar {
        self.last_heading
    }

    pub fn predict(&mut self, step: &StepInput) -> FilterStatus {
        if !step.heading_rad.is_finite() || !step.step_length.is_finite() || step.step_length < 0.0
        {
            return FilterStatus::SkippedInvalidInput;
        }

        let bearing = compass_to_east_zero(step.heading_rad);
        let (s, c) = bearing.sin_cos();
        let d = Vector2::new(step.step_length * c, step.step_length * s);
        self.last_heading = bearing;

        // Step components are overwritten, position integrates them.
        let mut a = Covariance::zeros();
        a[(0, 0)] = 1.0;
        a[(1, 1)] = 1.0;
        let b = ControlMatrix::new(
            1.0, 0.0, //
            0.0, 1.0, //
            1.0, 0.0, //
            0.0, 1.0,
        );

        self.state = a * self.state + b * d;

        let sigma = (self.tuning.step_percentage_error * step.average_step_length
            + self.tuning.step_misdirection)
            * step.penalty_factor.max(1.0);
        let q = Matrix2::identity() * sigma.powi(2);

        self.p_cov = a * self.p_cov * a.transpose() + b * q * b.transpose();
        self.p_cov = (self.p_cov + self.p_cov.transpose()) * 0.5;
        FilterStatus::Updated
    }

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
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0,
        );
        let sigma = self.tuning.measurement_std(kind);
        let r = Matrix2::identity() * sigma.powi(2) * penalty_factor.max(1.0);

        let innovation = measurement - h * self.state;
        let s = h * self.p_cov * h.transpose() + r;

        if let Some(s_inv) = s.try_inverse() {
            let k_gain = self.p_cov * h.transpose() * s_inv;
            self.state += k_gain * innovation;

            let i_minus_kh = Covariance::identity() - k_gain * h;
            self.p_cov =
                i_minus_kh * self.p_cov * i_minus_kh.transpose() + k_gain * r * k_gain.transpose();
            FilterStatus::Updated
        } else {
            FilterStatus::SingularMatrix
        }
    }
}

impl Default for DisplacementKalmanFilter {
    fn default() -> Self {
        Self::new(EkfTuning::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::MovementType;
    use crate::types::FixSourceKind;
    use approx::assert_relative_eq;
    use core::f64::consts::FRAC_PI_2;

    fn step(heading_rad: f64, step_length: f64) -> StepInput {
        StepInput {
            timestamp_ms: 0,
            heading_rad,
            step_length,
            average_step_length: step_length,
            movement_type: MovementType::Straight,
            penalty_factor: 1.0,
        }
    }

    #[test]
    fn test_integrates_step_displacements() {
        let mut kf = DisplacementKalmanFilter::default();
        for _ in 0..4 {
            kf.predict(&step(FRAC_PI_2, 0.5));
        }
        kf.predict(&step(0.0, 1.0));
        assert_relative_eq!(kf.position().x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(kf.position().y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(kf.step_displacement().y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_position_variance_accumulates_and_fix_shrinks_it() {
        let mut kf = DisplacementKalmanFilter::default();
        let mut last = kf.p_cov[(0, 0)];
        for _ in 0..5 {
            kf.predict(&step(FRAC_PI_2, 0.7));
            assert!(kf.p_cov[(0, 0)] > last);
            last = kf.p_cov[(0, 0)];
        }
        let fix = kf.position() + Vector2::new(1.0, 0.0);
        assert_eq!(
            kf.update(fix, CorrectionKind::Absolute(FixSourceKind::Satellite), 1.0),
            FilterStatus::Updated
        );
        assert!(kf.p_cov[(0, 0)] < last);
        assert!(kf.position().x > 3.5 && kf.position().x < fix.x);
    }
}
