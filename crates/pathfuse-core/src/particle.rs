//! Sequential Monte Carlo estimator over `(east, north)`.
//!
//! Motion is a pure random walk; no heading or stride information is used.

use crate::coords::{enu_to_geodetic, geodetic_to_enu, Geodetic, ReferenceFrame};
use crate::outlier::{OutlierConfig, OutlierDetector};
use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    pub num_particles: usize,
    /// σ of the initial cloud around the anchor (m).
    pub initial_std: f64,
    /// σ of the per-update random walk (m).
    pub motion_std: f64,
    /// Fixed seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            num_particles: 500,
            initial_std: 2.0,
            motion_std: 1.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub east: f64,
    pub north: f64,
    pub weight: f64,
}

pub struct ParticleFilter {
    pub particles: Vec<Particle>,
    config: ParticleConfig,
    reference: ReferenceFrame,
    gate: OutlierDetector,
    rng: StdRng,
    motion_std: f64,
}

impl ParticleFilter {
    pub fn new(config: ParticleConfig, reference: ReferenceFrame) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let n = config.num_particles.max(1);
        let weight = 1.0 / n as f64;

        let spread = valid_std(config.initial_std);
        let particles = (0..n)
            .map(|_| Particle {
                east: gaussian(&mut rng, spread),
                north: gaussian(&mut rng, spread),
                weight,
            })
            .collect();

        Self {
            particles,
            config,
            reference,
            gate: OutlierDetector::new(OutlierConfig::anchor_distance()),
            rng,
            motion_std: valid_std(config.motion_std),
        }
    }

    pub fn config(&self) -> &ParticleConfig {
        &self.config
    }

    /// Ingests a geodetic fix. Returns `false` if the fix was rejected.
    pub fn update(&mut self, measured_lat: f64, measured_lon: f64) -> bool {
        let enu = geodetic_to_enu(
            measured_lat,
            measured_lon,
            self.reference.ref_altitude,
            &self.reference,
        );
        self.update_enu(Vector2::new(enu.x, enu.y))
    }

    /// Same as [`ParticleFilter::update`] for a fix already in the ENU frame.
    pub fn update_enu(&mut self, measured: Vector2<f64>) -> bool {
        if !measured.x.is_finite() || !measured.y.is_finite() {
            return false;
        }
        if self.gate.detect_outliers(measured.norm()) {
            debug!(distance = measured.norm(), "particle fix rejected as outlier");
            return false;
        }

        for p in &mut self.particles {
            p.east += gaussian(&mut self.rng, self.motion_std);
            p.north += gaussian(&mut self.rng, self.motion_std);
            let distance = (Vector2::new(p.east, p.north) - measured).norm();
            p.weight *= (-0.5 * distance).exp();
        }

        self.normalize();
        self.systematic_resample();
        true
    }

    /// Weighted mean position as a geodetic coordinate.
    pub fn predict(&self) -> Geodetic {
        let mean = self.mean_enu();
        enu_to_geodetic(Vector3::new(mean.x, mean.y, 0.0), &self.reference)
    }

    pub fn mean_enu(&self) -> Vector2<f64> {
        self.particles
            .iter()
            .fold(Vector2::zeros(), |acc, p| {
                acc + Vector2::new(p.east, p.north) * p.weight
            })
    }

    /// `1 / Σ wᵢ²`; equals the particle count right after resampling.
    pub fn effective_sample_size(&self) -> f64 {
        let sum_sq: f64 = self.particles.iter().map(|p| p.weight * p.weight).sum();
        if sum_sq > 0.0 {
            1.0 / sum_sq
        } else {
            0.0
        }
    }

    fn normalize(&mut self) {
        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        let n = self.particles.len() as f64;
        if total > 0.0 && total.is_finite() {
            for p in &mut self.particles {
                p.weight /= total;
            }
        } else {
            for p in &mut self.particles {
                p.weight = 1.0 / n;
            }
        }
    }

    fn systematic_resample(&mut self) {
        let n = self.particles.len();
        let step = 1.0 / n as f64;
        let mut u = self.rng.random::<f64>() * step;
        let mut cumulative = self.particles[0].weight;
        let mut i = 0;

        let mut resampled = Vec::with_capacity(n);
        for _ in 0..n {
            while u > cumulative && i < n - 1 {
                i += 1;
                cumulative += self.particles[i].weight;
            }
            resampled.push(Particle {
                weight: step,
                ..self.particles[i]
            });
            u += step;
        }
        self.particles = resampled;
    }
}

// Non-finite or negative σ degrades to a deterministic filter.
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn seeded(n: usize) -> ParticleFilter {
        ParticleFilter::new(
            ParticleConfig {
                num_particles: n,
                seed: Some(7),
                ..ParticleConfig::default()
            },
            ReferenceFrame::new(48.0, 11.0, 500.0),
        )
    }

    #[test]
    fn test_initial_cloud_is_uniformly_weighted() {
        let pf = seeded(200);
        assert_eq!(pf.particles.len(), 200);
        let total: f64 = pf.particles.iter().map(|p| p.weight).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
        assert_relative_eq!(pf.effective_sample_size(), 200.0, epsilon = 1e-6);
        assert!(pf.mean_enu().norm() < 1.0);
    }

    #[test]
    fn test_update_resamples_to_equal_weights() {
        let mut pf = seeded(300);
        assert!(pf.update_enu(Vector2::new(1.0, 1.0)));
        assert_eq!(pf.particles.len(), 300);
        let total: f64 = pf.particles.iter().map(|p| p.weight).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
        for p in &pf.particles {
            assert_relative_eq!(p.weight, 1.0 / 300.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_cloud_moves_toward_repeated_fixes() {
        let mut pf = seeded(500);
        let target = Vector2::new(3.0, -2.0);
        for _ in 0..15 {
            pf.update_enu(target);
        }
        assert!((pf.mean_enu() - target).norm() < 1.5);
    }

    #[test]
    fn test_geodetic_update_and_predict() {
        let mut pf = seeded(400);
        let reference = ReferenceFrame::new(48.0, 11.0, 500.0);
        let target = enu_to_geodetic(Vector3::new(2.0, 2.0, 0.0), &reference);
        for _ in 0..15 {
            assert!(pf.update(target.latitude, target.longitude));
        }
        let est = pf.predict();
        assert!((est.latitude - target.latitude).abs() < 2e-5);
        assert!((est.longitude - target.longitude).abs() < 3e-5);
    }

    #[test]
    fn test_far_fix_is_gated() {
        let mut pf = seeded(100);
        for _ in 0..6 {
            assert!(pf.update_enu(Vector2::new(1.0, 0.5)));
        }
        let before = pf.mean_enu();
        assert!(!pf.update_enu(Vector2::new(400.0, 0.0)));
        assert_eq!(pf.mean_enu(), before);
        assert!(!pf.update_enu(Vector2::new(f64::NAN, 0.0)));
    }

    #[test]
    fn test_same_seed_same_result() {
        let mut a = seeded(100);
        let mut b = seeded(100);
        a.update_enu(Vector2::new(2.0, 0.0));
        b.update_enu(Vector2::new(2.0, 0.0));
        assert_eq!(a.mean_enu(), b.mean_enu());
    }
}
