//! Per-step classification of heading changes.

use crate::coords::wrap_to_pi;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum MovementType {
    #[default]
    Straight = 0,
    PseudoTurn = 1,
    Turn = 2,
}

impl MovementType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Straight => "straight",
            Self::PseudoTurn => "pseudo_turn",
            Self::Turn => "turn",
        }
    }
}

/// Squared heading-change thresholds (rad²).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    pub pseudo_turn_threshold: f64,
    pub turn_threshold: f64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            pseudo_turn_threshold: 15.0_f64.to_radians().powi(2),
            turn_threshold: 40.0_f64.to_radians().powi(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnDetector {
    config: TurnConfig,
    previous_heading: f64,
    monitoring: bool,
    current: MovementType,
}

impl TurnDetector {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            previous_heading: 0.0,
            monitoring: false,
            current: MovementType::Straight,
        }
    }

    pub fn start_monitoring(&mut self, heading: f64) {
        self.previous_heading = heading;
        self.current = MovementType::Straight;
        self.monitoring = true;
    }

    pub fn stop_monitoring(&mut self) {
        self.monitoring = false;
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    pub fn current(&self) -> MovementType {
        self.current
    }

    /// Feeds one orientation sample. The running type only ever upgrades
    /// until the next step resets it.
    pub fn on_orientation(&mut self, heading: f64) {
        if !self.monitoring {
            return;
        }
        let delta = wrap_to_pi(heading - self.previous_heading).powi(2);
        let observed = if delta > self.config.turn_threshold {
            MovementType::Turn
        } else if delta > self.config.pseudo_turn_threshold {
            MovementType::PseudoTurn
        } else {
            MovementType::Straight
        };
        self.current = self.current.max(observed);
    }

    /// Returns the type accumulated over the step that just ended and starts
    /// a fresh step at `heading`.
    pub fn on_step_detected(&mut self, heading: f64) -> MovementType {
        let finished = self.current;
        self.current = MovementType::Straight;
        self.previous_heading = heading;
        finished
    }
}

impl Default for TurnDetector {
    fn default() -> Self {
        Self::new(TurnConfig::default())
    }
}
