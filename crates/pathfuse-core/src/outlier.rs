//! Median / MAD based rejection of discrepancy distances.

use serde::{Deserialize, Serialize};

/// Consistency constant relating MAD to a standard deviation.
const MAD_SCALE: f64 = 0.6745;
/// Consistency constant for the mean absolute deviation fallback.
const MEAN_AD_SCALE: f64 = 1.253_314;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierConfig {
    /// Modified z-score above which a sample is an outlier.
    pub z_threshold: f64,
    /// Hard ceiling in meters; larger distances are always outliers.
    pub max_distance: Option<f64>,
    /// Keep flagged samples in the history so the median can follow a
    /// distance that drifts for good.
    pub retain_rejected: bool,
}

impl OutlierConfig {
    /// Gate for absolute fixes against the predicted position.
    pub const fn fix_gating() -> Self {
        Self {
            z_threshold: 3.0,
            max_distance: Some(10.0),
            retain_rejected: false,
        }
    }

    /// Gate for particle filter fixes against the session anchor. The
    /// distance grows as the user walks away, so rejected samples stay in
    /// the history.
    pub const fn anchor_distance() -> Self {
        Self {
            z_threshold: 2.8,
            max_distance: None,
            retain_rejected: true,
        }
    }
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self::fix_gating()
    }
}

#[derive(Debug, Clone)]
pub struct OutlierDetector {
    config: OutlierConfig,
    distances: Vec<f64>,
}

impl OutlierDetector {
    pub fn new(config: OutlierConfig) -> Self {
        Self {
            config,
            distances: Vec::new(),
        }
    }

    pub fn history(&self) -> &[f64] {
        &self.distances
    }

    pub fn clear(&mut self) {
        self.distances.clear();
    }

    /// Records `new_distance` and reports whether it is an outlier.
    ///
    /// Outliers are dropped from the history so they never shift the running
    /// median, unless `retain_rejected` is set. When the MAD is zero the mean
    /// absolute deviation is used instead; if that is zero as well the sample
    /// is accepted.
    pub fn detect_outliers(&mut self, new_distance: f64) -> bool {
        if !new_distance.is_finite() {
            return true;
        }
        self.distances.push(new_distance);

        if let Some(ceiling) = self.config.max_distance {
            if new_distance > ceiling {
                self.forget_rejected();
                return true;
            }
        }

        if self.distances.len() < 2 {
            return false;
        }

        let score = modified_z_score(&self.distances, new_distance);
        if score > self.config.z_threshold {
            self.forget_rejected();
            true
        } else {
            false
        }
    }

    fn forget_rejected(&mut self) {
        if !self.config.retain_rejected {
            self.distances.pop();
        }
    }
}

fn modified_z_score(samples: &[f64], value: f64) -> f64 {
    let med = median(samples);
    let deviations: Vec<f64> = samples.iter().map(|d| (d - med).abs()).collect();
    let deviation = (value - med).abs();

    let mad = median(&deviations);
    if mad > 0.0 {
        return MAD_SCALE * deviation / mad;
    }

    let mean_ad = deviations.iter().sum::<f64>() / deviations.len() as f64;
    if mean_ad > 0.0 {
        deviation / (MEAN_AD_SCALE * mean_ad)
    } else {
        0.0
    }
}

pub(crate) fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unbounded() -> OutlierDetector {
        OutlierDetector::new(OutlierConfig {
            z_threshold: 3.0,
            max_distance: None,
            retain_rejected: false,
        })
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_outlier_removed_from_history() {
        let mut det = unbounded();
        for _ in 0..4 {
            assert!(!det.detect_outliers(1.0));
        }
        assert!(det.detect_outliers(50.0));
        assert_eq!(det.history(), &[1.0, 1.0, 1.0, 1.0]);

        assert!(!det.detect_outliers(1.0));
        assert_eq!(det.history(), &[1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_ceiling_rejects_immediately() {
        let mut det = OutlierDetector::new(OutlierConfig::fix_gating());
        assert!(det.detect_outliers(10.5));
        assert!(det.history().is_empty());
        assert!(!det.detect_outliers(9.5));
    }

    #[test]
    fn test_spread_history_accepts_moderate_values() {
        let mut det = unbounded();
        for d in [2.0, 3.0, 2.5, 4.0, 3.5, 2.2, 3.1] {
            det.detect_outliers(d);
        }
        assert!(!det.detect_outliers(4.2));
        assert!(det.detect_outliers(25.0));
        assert_eq!(det.history().len(), 8);
    }

    #[test]
    fn test_anchor_preset_is_stricter() {
        let mut loose = unbounded();
        let mut strict = OutlierDetector::new(OutlierConfig::anchor_distance());
        for d in [5.0, 6.0, 5.5, 6.5, 5.0, 6.0, 5.5] {
            loose.detect_outliers(d);
            strict.detect_outliers(d);
        }
        // median 5.75, MAD 0.5 -> z = 0.6745 * 2.15 / 0.5 = 2.9
        assert!(!loose.detect_outliers(7.9));
        assert!(strict.detect_outliers(7.9));
    }

    #[test]
    fn test_anchor_preset_follows_receding_distance() {
        let mut det = OutlierDetector::new(OutlierConfig::anchor_distance());
        assert!(!det.detect_outliers(15.0));
        assert!(!det.detect_outliers(15.05));
        assert!(det.detect_outliers(16.5));
        assert_eq!(det.history(), &[15.0, 15.05, 16.5]);

        // The walker keeps moving away; the rejected samples pull the median
        // along until new distances pass again.
        let accepted = [17.2, 17.9, 18.6, 19.3, 20.0]
            .into_iter()
            .filter(|&d| !det.detect_outliers(d))
            .count();
        assert_eq!(accepted, 5);
        assert_eq!(det.history().len(), 8);
    }

    #[test]
    fn test_first_sample_and_non_finite() {
        let mut det = unbounded();
        assert!(!det.detect_outliers(100.0));
        assert!(det.detect_outliers(f64::NAN));
        assert_eq!(det.history(), &[100.0]);
    }
}
