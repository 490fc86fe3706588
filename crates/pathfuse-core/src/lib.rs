//! # Pathfuse Core
//!
//! Indoor / outdoor pedestrian positioning:
//! - Pedestrian dead reckoning (stride, elevation, floor, elevator)
//! - Turn classification feeding adaptive process noise
//! - EKF, displacement KF and particle filter behind one estimator trait
//! - Fusion with opportunistic radio / satellite fixes on a worker thread
//!
//! Filters work in a local East-North-Up frame anchored at the session
//! reference; see [`coords`].

pub mod config;
pub mod coords;
pub mod displacement;
pub mod ekf;
pub mod error;
pub mod estimator;
pub mod fusion;
pub mod outlier;
pub mod particle;
pub mod pdr;
pub mod ring_buffer;
pub mod session;
pub mod tracker;
pub mod turn;
pub mod types;

// Re-export core types
pub use config::FusionConfig;
pub use coords::{Geodetic, ReferenceFrame};
pub use displacement::DisplacementKalmanFilter;
pub use ekf::{EkfTuning, ExtendedKalmanFilter, FilterStatus};
pub use error::{FusionError, Result};
pub use estimator::{build_estimator, EstimatorKind, PositionEstimator};
pub use fusion::{FusionCore, FusionWorker};
pub use outlier::{OutlierConfig, OutlierDetector};
pub use particle::{ParticleConfig, ParticleFilter};
pub use pdr::{PdrConfig, PdrProcessing};
pub use ring_buffer::RingBuffer;
pub use session::SessionContext;
pub use tracker::{PositioningSession, TrackerEvent};
pub use turn::{MovementType, TurnConfig, TurnDetector};
pub use types::{
    CorrectionKind, FixSourceKind, FusedPosition, OpportunisticFix, StepEvent, StepInput,
    StepUpdate,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
