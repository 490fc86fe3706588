use crate::walk::{WalkData, WalkParams};
use nalgebra::Vector2;
use pathfuse_core::config::FusionConfig;
use pathfuse_core::error::Result;
use pathfuse_core::estimator::EstimatorKind;
use pathfuse_core::session::SessionContext;
use pathfuse_core::tracker::{PositioningSession, TrackerEvent};
use pathfuse_core::types::{CorrectionKind, FusedPosition};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Output of one offline fusion run.
#[derive(Debug, Clone, Default)]
pub struct FusionResult {
    pub time_ms: Vec<u64>,
    pub truth: Vec<Vector2<f64>>,
    pub fused: Vec<Vector2<f64>>,
    pub corrections: Vec<Option<CorrectionKind>>,
    pub floors: Vec<(u64, i32)>,
}

/// Summary row for reports and sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    pub steps: usize,
    pub absolute_corrections: usize,
    pub recursive_corrections: usize,
    pub rmse_m: f64,
    pub final_error_m: f64,
}

impl FusionResult {
    pub fn summary(&self) -> RunSummary {
        let count = |pred: fn(&Option<CorrectionKind>) -> bool| {
            self.corrections.iter().filter(|c| pred(c)).count()
        };
        RunSummary {
            steps: self.fused.len(),
            absolute_corrections: count(|c| matches!(c, Some(CorrectionKind::Absolute(_)))),
            recursive_corrections: count(|c| matches!(c, Some(CorrectionKind::Recursive))),
            rmse_m: rmse(&self.fused, &self.truth),
            final_error_m: match (self.fused.last(), self.truth.last()) {
                (Some(f), Some(t)) => (f - t).norm(),
                _ => f64::NAN,
            },
        }
    }
}

/// Root mean square of the pointwise distance between two tracks. Extra
/// points in the longer track are ignored; empty input gives NaN.
pub fn rmse(estimate: &[Vector2<f64>], truth: &[Vector2<f64>]) -> f64 {
    let n = estimate.len().min(truth.len());
    if n == 0 {
        return f64::NAN;
    }
    let sum_sq: f64 = estimate
        .iter()
        .zip(truth)
        .map(|(e, t)| (e - t).norm_squared())
        .sum();
    (sum_sq / n as f64).sqrt()
}

/// Replays a walk through a full positioning session.
///
/// Fixes and barometer samples are delivered before any step with the same
/// or a later timestamp. The session runs on its worker thread; this call
/// returns after it has drained.
pub fn run_fusion(
    walk: &WalkData,
    params: &WalkParams,
    config: &FusionConfig,
    estimator: EstimatorKind,
) -> Result<FusionResult> {
    let config = FusionConfig {
        estimator,
        ..config.clone()
    };
    let ctx = Arc::new(SessionContext::with_reference(
        params.ref_latitude,
        params.ref_longitude,
        params.ref_altitude,
    ));
    let (mut session, mut events) = PositioningSession::start(config, ctx)?;

    let mut fixes = walk.fixes.iter().peekable();
    let mut altitudes = walk.altitudes.iter().peekable();

    if let Some(first) = walk.steps.first() {
        session.on_orientation(first.heading_rad);
    }
    for step in &walk.steps {
        while let Some(&&(t, alt)) = altitudes.peek() {
            if t > step.timestamp_ms {
                break;
            }
            session.on_altitude(alt);
            altitudes.next();
        }
        while let Some(fix) = fixes.next_if(|f| f.timestamp_ms <= step.timestamp_ms) {
            session.on_fix(*fix)?;
        }
        session.on_orientation(step.heading_rad);
        session.on_step(step)?;
    }
    session.stop();
    drop(session);

    let truth_at: HashMap<u64, Vector2<f64>> = walk
        .steps
        .iter()
        .zip(&walk.truth)
        .map(|(s, t)| (s.timestamp_ms, *t))
        .collect();

    let mut result = FusionResult::default();
    while let Some(event) = events.blocking_recv() {
        match event {
            TrackerEvent::Position(FusedPosition {
                timestamp_ms,
                enu,
                correction,
                ..
            }) => {
                if let Some(truth) = truth_at.get(&timestamp_ms) {
                    result.time_ms.push(timestamp_ms);
                    result.truth.push(*truth);
                    result.fused.push(enu);
                    result.corrections.push(correction);
                }
            }
            TrackerEvent::Floor(floor) => {
                let t = result.time_ms.last().copied().unwrap_or(0);
                result.floors.push((t, floor));
            }
            TrackerEvent::Elevation(_) | TrackerEvent::Elevator(_) => {}
        }
    }
    debug!(steps = result.fused.len(), "fusion run finished");
    Ok(result)
}

/// Convenience wrapper: generate the walk and run it with default config.
pub fn run_default(params: &WalkParams, estimator: EstimatorKind) -> Result<FusionResult> {
    let walk = crate::walk::generate_walk(params);
    run_fusion(&walk, params, &FusionConfig::default(), estimator)
}
