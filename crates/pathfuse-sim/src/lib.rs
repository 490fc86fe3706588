//! Pathfuse Simulation Library
//!
//! Synthetic pedestrian walks and offline replay through the fusion stack.

pub mod params;
pub mod runner;
pub mod walk;

// Re-export main types
pub use params::*;
pub use runner::{rmse, run_default, run_fusion, FusionResult, RunSummary};
pub use walk::{generate_walk, WalkData, WalkParams};
