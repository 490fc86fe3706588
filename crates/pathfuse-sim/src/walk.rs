use nalgebra::Vector2;
use pathfuse_core::coords::{enu_to_geodetic, ReferenceFrame};
use pathfuse_core::types::{FixSourceKind, OpportunisticFix, StepEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------
const GRAVITY: f64 = 9.80665;
const ACCEL_SAMPLES_PER_STEP: usize = 12;
const BARO_PERIOD_MS: u64 = 250;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkParams {
    /// Route corners in the local ENU frame (m). The walk starts at the first.
    pub waypoints: Vec<(f64, f64)>,
    /// True stride (m).
    pub step_length: f64,
    /// Steps per second.
    pub cadence_hz: f64,
    /// Weinberg constant used to synthesise the accelerometer swing.
    pub weinberg_k: f64,

    pub heading_noise_std: f64, // rad
    pub accel_noise_std: f64,   // m/s²
    pub baro_noise_std: f64,    // m

    /// Period of opportunistic fixes; 0 disables them.
    pub fix_interval_ms: u64,
    pub fix_noise_std: f64, // m
    /// Probability that a scheduled fix is missing.
    pub fix_dropout: f64,
    pub fix_source: FixSourceKind,

    /// Altitude gained per meter walked (m/m), for barometer traces.
    pub climb_rate: f64,

    pub ref_latitude: f64,
    pub ref_longitude: f64,
    pub ref_altitude: f64,

    pub seed: u64,
}

impl Default for WalkParams {
    fn default() -> Self {
        Self {
            waypoints: vec![(0.0, 0.0), (30.0, 0.0), (30.0, 20.0), (0.0, 20.0), (0.0, 0.0)],
            step_length: 0.7,
            cadence_hz: 1.8,
            weinberg_k: 0.364,
            heading_noise_std: 3.0_f64.to_radians(),
            accel_noise_std: 0.02,
            baro_noise_std: 0.1,
            fix_interval_ms: 4000,
            fix_noise_std: 3.0,
            fix_dropout: 0.2,
            fix_source: FixSourceKind::Radio,
            climb_rate: 0.0,
            ref_latitude: 51.5,
            ref_longitude: 359.9,
            ref_altitude: 30.0,
            seed: 42,
        }
    }
}

impl WalkParams {
    pub fn reference(&self) -> ReferenceFrame {
        ReferenceFrame::new(self.ref_latitude, self.ref_longitude, self.ref_altitude)
    }

    /// Acceleration magnitude swing that yields `step_length` under the
    /// Weinberg model.
    pub fn accel_swing(&self) -> f64 {
        (self.step_length / (2.0 * self.weinberg_k)).powi(4)
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Default)]
pub struct WalkData {
    /// True position after each step.
    pub truth: Vec<Vector2<f64>>,
    pub steps: Vec<StepEvent>,
    /// (timestamp ms, absolute altitude m)
    pub altitudes: Vec<(u64, f64)>,
    pub fixes: Vec<OpportunisticFix>,
}

impl WalkData {
    pub fn duration_ms(&self) -> u64 {
        self.steps.last().map_or(0, |s| s.timestamp_ms)
    }
}

/// Walks the waypoint route at a fixed stride and synthesises step events,
/// barometer samples and opportunistic fixes.
pub fn generate_walk(params: &WalkParams) -> WalkData {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let reference = params.reference();

    let heading_std = valid_std(params.heading_noise_std);
    let accel_std = valid_std(params.accel_noise_std);
    let baro_std = valid_std(params.baro_noise_std);
    let fix_std = valid_std(params.fix_noise_std);
    let dropout = if params.fix_dropout.is_finite() {
        params.fix_dropout.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let step_period_ms = if params.cadence_hz > 0.0 {
        (1000.0 / params.cadence_hz).round() as u64
    } else {
        1000
    };
    let swing = params.accel_swing();

    let mut data = WalkData::default();
    let Some(&(x0, y0)) = params.waypoints.first() else {
        return data;
    };
    if params.step_length <= 0.0 {
        return data;
    }

    let mut pos = Vector2::new(x0, y0);
    let mut t_ms = 0_u64;
    let mut walked = 0.0;
    let mut next_fix_ms = params.fix_interval_ms;
    let mut next_baro_ms = 0_u64;

    for pair in params.waypoints.windows(2) {
        let target = Vector2::new(pair[1].0, pair[1].1);
        loop {
            let to_go = target - pos;
            let dist = to_go.norm();
            if dist < 1e-9 {
                break;
            }
            let stride = dist.min(params.step_length);
            let dir = to_go / dist;

            // Barometer samples up to the end of this step.
            t_ms += step_period_ms;
            while next_baro_ms <= t_ms {
                let alt = params.ref_altitude + params.climb_rate * walked;
                data.altitudes
                    .push((next_baro_ms, alt + gaussian(&mut rng, baro_std)));
                next_baro_ms += BARO_PERIOD_MS;
            }

            // Short final strides still carry the nominal swing.
            pos += dir * stride;
            walked += stride;

            let compass = dir.x.atan2(dir.y);
            let accel_magnitudes = (0..ACCEL_SAMPLES_PER_STEP)
                .map(|i| {
                    let phase = i as f64 / (ACCEL_SAMPLES_PER_STEP - 1) as f64;
                    GRAVITY
                        + 0.5 * swing * (core::f64::consts::TAU * phase).sin()
                        + gaussian(&mut rng, accel_std)
                })
                .collect();

            data.steps.push(StepEvent {
                timestamp_ms: t_ms,
                accel_magnitudes,
                heading_rad: compass + gaussian(&mut rng, heading_std),
            });
            data.truth.push(pos);

            if params.fix_interval_ms > 0 && t_ms >= next_fix_ms {
                next_fix_ms += params.fix_interval_ms;
                if !rng.random_bool(dropout) {
                    let noisy = nalgebra::Vector3::new(
                        pos.x + gaussian(&mut rng, fix_std),
                        pos.y + gaussian(&mut rng, fix_std),
                        0.0,
                    );
                    let geo = enu_to_geodetic(noisy, &reference);
                    // Fix arrives shortly before the step is reported.
                    data.fixes.push(OpportunisticFix {
                        latitude: geo.latitude,
                        longitude: geo.longitude,
                        timestamp_ms: t_ms.saturating_sub(step_period_ms / 2),
                        source: params.fix_source,
                    });
                }
            }
        }
    }

    data
}

fn valid_std(std: f64) -> f64 {
    if std.is_finite() && std > 0.0 {
        std
    } else {
        0.0
    }
}

fn gaussian(rng: &mut StdRng, std: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    z * std
}
