//! Tunable filter parameters with sweep bounds.

use pathfuse_core::ekf::EkfTuning;

/// Parameter specification with bounds and step size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    /// Key used on the command line and in output files.
    pub name: &'static str,
    /// Human-readable label.
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParamSpec {
    pub const fn new(name: &'static str, label: &'static str, min: f64, max: f64, step: f64) -> Self {
        Self {
            name,
            label,
            min,
            max,
            step,
        }
    }

    /// Evenly spaced values from `min` to `max` inclusive.
    pub fn grid(&self) -> Vec<f64> {
        if self.step <= 0.0 || self.max < self.min {
            return vec![self.min];
        }
        let n = ((self.max - self.min) / self.step + 1e-9).floor() as usize;
        (0..=n).map(|i| self.min + i as f64 * self.step).collect()
    }
}

/// EKF tuning parameters.
pub mod ekf {
    use super::ParamSpec;

    pub const STRAIGHT_HEADING_STD: ParamSpec =
        ParamSpec::new("straight_heading_std", "Straight heading σ (rad)", 0.005, 0.1, 0.005);
    pub const TURN_HEADING_STD: ParamSpec =
        ParamSpec::new("turn_heading_std", "Turn heading σ (rad)", 0.05, 0.5, 0.05);
    pub const STEP_PERCENTAGE_ERROR: ParamSpec =
        ParamSpec::new("step_percentage_error", "Stride error (fraction)", 0.02, 0.4, 0.02);
    pub const STEP_MISDIRECTION: ParamSpec =
        ParamSpec::new("step_misdirection", "Stride misdirection (m)", 0.0, 0.5, 0.05);
    pub const RADIO_FIX_STD: ParamSpec =
        ParamSpec::new("radio_fix_std", "Radio fix σ (m)", 1.0, 15.0, 1.0);
    pub const SATELLITE_FIX_STD: ParamSpec =
        ParamSpec::new("satellite_fix_std", "Satellite fix σ (m)", 1.0, 15.0, 1.0);
    pub const RECURSIVE_STD: ParamSpec =
        ParamSpec::new("recursive_std", "Recursive σ (m)", 0.5, 10.0, 0.5);

    pub const ALL: [ParamSpec; 7] = [
        STRAIGHT_HEADING_STD,
        TURN_HEADING_STD,
        STEP_PERCENTAGE_ERROR,
        STEP_MISDIRECTION,
        RADIO_FIX_STD,
        SATELLITE_FIX_STD,
        RECURSIVE_STD,
    ];
}

pub fn find_param(name: &str) -> Option<ParamSpec> {
    ekf::ALL.into_iter().find(|p| p.name == name)
}

pub fn get_tuning_param(tuning: &EkfTuning, name: &str) -> Option<f64> {
    Some(match name {
        "straight_heading_std" => tuning.straight_heading_std,
        "pseudo_turn_heading_std" => tuning.pseudo_turn_heading_std,
        "turn_heading_std" => tuning.turn_heading_std,
        "step_percentage_error" => tuning.step_percentage_error,
        "step_misdirection" => tuning.step_misdirection,
        "radio_fix_std" => tuning.radio_fix_std,
        "satellite_fix_std" => tuning.satellite_fix_std,
        "recursive_std" => tuning.recursive_std,
        _ => return None,
    })
}

/// Returns `false` for an unknown name.
pub fn set_tuning_param(tuning: &mut EkfTuning, name: &str, value: f64) -> bool {
    let slot = match name {
        "straight_heading_std" => &mut tuning.straight_heading_std,
        "pseudo_turn_heading_std" => &mut tuning.pseudo_turn_heading_std,
        "turn_heading_std" => &mut tuning.turn_heading_std,
        "step_percentage_error" => &mut tuning.step_percentage_error,
        "step_misdirection" => &mut tuning.step_misdirection,
        "radio_fix_std" => &mut tuning.radio_fix_std,
        "satellite_fix_std" => &mut tuning.satellite_fix_std,
        "recursive_std" => &mut tuning.recursive_std,
        _ => return false,
    };
    *slot = value;
    true
}
