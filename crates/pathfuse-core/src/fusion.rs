//! Step-driven fusion of PDR with opportunistic absolute fixes.
//!
//! [`FusionCore`] holds the estimator and runs one predict + correction cycle
//! per step. [`FusionWorker`] moves a core onto its own thread and feeds it
//! through a queue, so steps and fixes are applied strictly in arrival order
//! without blocking the caller.

use crate::config::FusionConfig;
use crate::ekf::{penalty_factor, FilterStatus};
use crate::error::{FusionError, Result};
use crate::estimator::{build_estimator, PositionEstimator};
use crate::outlier::{OutlierConfig, OutlierDetector};
use crate::session::SessionContext;
use crate::types::{
    CorrectionKind, EnuFix, FusedPosition, Measurement, OpportunisticFix, StepInput, StepUpdate,
};
use nalgebra::Vector2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// CORE
// ---------------------------------------------------------------------------
pub struct FusionCore {
    session: Arc<SessionContext>,
    estimator: Box<dyn PositionEstimator>,
    gate: OutlierDetector,
    pending_fix: Option<EnuFix>,
    last_estimate: Vector2<f64>,
    last_pdr: Vector2<f64>,
    last_fix_time_ms: Option<u64>,
    relevance_threshold_ms: u64,
    max_penalty_window_ms: u64,
    stopped: bool,
}

impl FusionCore {
    /// Fails with [`FusionError::NotInitialized`] if the session has no
    /// reference frame yet.
    pub fn new(config: &FusionConfig, session: Arc<SessionContext>) -> Result<Self> {
        let reference = *session.reference()?;
        let estimator = build_estimator(config.estimator, config.ekf, config.particle, reference);
        let last_estimate = estimator.position();
        info!(estimator = estimator.name(), "fusion core ready");

        Ok(Self {
            session,
            estimator,
            gate: OutlierDetector::new(OutlierConfig::fix_gating()),
            pending_fix: None,
            last_estimate,
            last_pdr: Vector2::zeros(),
            last_fix_time_ms: None,
            relevance_threshold_ms: config.relevance_threshold_ms,
            max_penalty_window_ms: config.max_penalty_window_ms,
            stopped: false,
        })
    }

    pub fn estimator(&self) -> &dyn PositionEstimator {
        self.estimator.as_ref()
    }

    pub fn pending_fix(&self) -> Option<&EnuFix> {
        self.pending_fix.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Later calls become no-ops.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.pending_fix = None;
    }

    /// Stores a fix for the next step. A newer fix replaces an unused one.
    pub fn on_opportunistic_update(&mut self, fix: OpportunisticFix) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        let position = self.session.to_enu(fix.latitude, fix.longitude)?;
        if !position.x.is_finite() || !position.y.is_finite() {
            warn!(source = fix.source.label(), "dropping non-finite fix");
            return Ok(());
        }
        self.pending_fix = Some(EnuFix {
            position,
            timestamp_ms: fix.timestamp_ms,
            source: fix.source,
        });
        Ok(())
    }

    /// One predict + correction cycle. Returns `None` once stopped or if the
    /// prediction input was unusable.
    pub fn on_step_detected(&mut self, step: &StepUpdate) -> Option<FusedPosition> {
        if self.stopped {
            return None;
        }
        self.discard_stale_fix(step.timestamp_ms);

        let since_fix = step
            .timestamp_ms
            .saturating_sub(self.last_fix_time_ms.unwrap_or(0));
        let penalty = penalty_factor(since_fix, self.max_penalty_window_ms);

        let input = StepInput {
            timestamp_ms: step.timestamp_ms,
            heading_rad: step.heading_rad,
            step_length: step.step_length,
            average_step_length: step.average_step_length,
            movement_type: step.movement_type,
            penalty_factor: penalty,
        };
        if self.estimator.predict(&input) == FilterStatus::SkippedInvalidInput {
            warn!(timestamp_ms = step.timestamp_ms, "skipping step with invalid input");
            return None;
        }

        let mut correction = None;
        if let Some(fix) = self.pending_fix.take() {
            if !self.is_outlier(&fix)
                && self.on_observation_update(&fix, penalty) == FilterStatus::Updated
            {
                correction = Some(CorrectionKind::Absolute(fix.source));
            }
        }
        if correction.is_none()
            && self.perform_recursive_correction(step.pdr_position, penalty)
                == FilterStatus::Updated
        {
            correction = Some(CorrectionKind::Recursive);
        }

        self.last_pdr = step.pdr_position;
        self.last_estimate = self.estimator.position();

        let geodetic = self.session.to_geodetic(self.last_estimate).ok()?;
        Some(FusedPosition {
            timestamp_ms: step.timestamp_ms,
            enu: self.last_estimate,
            geodetic,
            correction,
        })
    }

    /// Absolute correction with a fix that passed gating.
    pub fn on_observation_update(&mut self, fix: &EnuFix, penalty: f64) -> FilterStatus {
        let status = self.estimator.update(&Measurement {
            position: fix.position,
            kind: CorrectionKind::Absolute(fix.source),
            penalty_factor: penalty,
        });
        if status == FilterStatus::Updated {
            self.last_fix_time_ms = Some(fix.timestamp_ms);
        }
        debug!(?status, source = fix.source.label(), "absolute correction");
        status
    }

    /// Pulls the estimate toward the previous estimate carried forward by the
    /// PDR displacement since the previous step.
    pub fn perform_recursive_correction(
        &mut self,
        pdr_position: Vector2<f64>,
        penalty: f64,
    ) -> FilterStatus {
        let pseudo = self.last_estimate + (pdr_position - self.last_pdr);
        let status = self.estimator.update(&Measurement {
            position: pseudo,
            kind: CorrectionKind::Recursive,
            penalty_factor: penalty,
        });
        debug!(?status, "recursive correction");
        status
    }

    // Fix-only estimators apply their own anchor gate in `update`.
    fn is_outlier(&mut self, fix: &EnuFix) -> bool {
        if !self.estimator.uses_step_motion() {
            return false;
        }
        let distance = (fix.position - self.estimator.position()).norm();
        let rejected = self.gate.detect_outliers(distance);
        if rejected {
            warn!(distance, source = fix.source.label(), "fix rejected as outlier");
        }
        rejected
    }

    fn discard_stale_fix(&mut self, now_ms: u64) {
        let stale = self.pending_fix.as_ref().is_some_and(|fix| {
            fix.source.is_staleness_gated()
                && now_ms.saturating_sub(fix.timestamp_ms) > self.relevance_threshold_ms
        });
        if stale {
            debug!(now_ms, "discarding stale fix");
            self.pending_fix = None;
        }
    }
}

// ---------------------------------------------------------------------------
// WORKER
// ---------------------------------------------------------------------------
enum FusionTask {
    Step(StepUpdate),
    Fix(OpportunisticFix),
}

/// Runs a [`FusionCore`] on a dedicated thread.
pub struct FusionWorker {
    tasks: Option<UnboundedSender<FusionTask>>,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FusionWorker {
    /// Spawns the worker; fused positions are converted into `T` and sent on
    /// `output`.
    pub fn spawn<T>(mut core: FusionCore, output: UnboundedSender<T>) -> Self
    where
        T: From<FusedPosition> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<FusionTask>();
        let stopped = Arc::new(AtomicBool::new(false));

        // `blocking_recv` panics inside an async runtime; this is a plain thread.
        let handle = std::thread::spawn(move || {
            while let Some(task) = rx.blocking_recv() {
                match task {
                    FusionTask::Fix(fix) => {
                        if let Err(err) = core.on_opportunistic_update(fix) {
                            warn!(%err, "fix ignored");
                        }
                    }
                    FusionTask::Step(step) => {
                        if let Some(fused) = core.on_step_detected(&step) {
                            // Receiver gone: keep draining, results are dropped.
                            let _ = output.send(T::from(fused));
                        }
                    }
                }
            }
            core.stop();
            debug!("fusion worker drained");
        });

        Self {
            tasks: Some(tx),
            stopped,
            handle: Some(handle),
        }
    }

    /// Convenience form of [`FusionWorker::spawn`] that creates the output
    /// channel.
    pub fn spawn_with_channel(core: FusionCore) -> (Self, UnboundedReceiver<FusedPosition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::spawn(core, tx), rx)
    }

    pub fn on_step_detected(&self, step: StepUpdate) -> Result<()> {
        self.submit(FusionTask::Step(step))
    }

    pub fn on_opportunistic_update(&self, fix: OpportunisticFix) -> Result<()> {
        self.submit(FusionTask::Fix(fix))
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stops accepting work, lets already queued tasks finish and joins the
    /// thread. Idempotent.
    pub fn stop_fusion(&mut self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tasks = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("fusion worker panicked");
            }
        }
        info!("fusion stopped");
    }

    // Calls after stop are silently ignored.
    fn submit(&self, task: FusionTask) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        match &self.tasks {
            Some(tx) => tx.send(task).map_err(|_| FusionError::WorkerStopped),
            None => Ok(()),
        }
    }
}

impl Drop for FusionWorker {
    fn drop(&mut self) {
        self.stop_fusion();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::EstimatorKind;
    use crate::turn::MovementType;
    use crate::types::FixSourceKind;
    use core::f64::consts::FRAC_PI_2;

    const REF: (f64, f64, f64) = (46.5, 6.6, 380.0);

    fn session() -> Arc<SessionContext> {
        Arc::new(SessionContext::with_reference(REF.0, REF.1, REF.2))
    }

    fn east_step(timestamp_ms: u64, index: u32) -> StepUpdate {
        StepUpdate {
            timestamp_ms,
            pdr_position: Vector2::new(0.7 * index as f64, 0.0),
            heading_rad: FRAC_PI_2,
            step_length: 0.7,
            average_step_length: 0.7,
            movement_type: MovementType::Straight,
        }
    }

    fn fix_at(session: &SessionContext, east: f64, north: f64, t: u64, source: FixSourceKind) -> OpportunisticFix {
        let geo = session.to_geodetic(Vector2::new(east, north)).unwrap();
        OpportunisticFix {
            latitude: geo.latitude,
            longitude: geo.longitude,
            timestamp_ms: t,
            source,
        }
    }

    #[test]
    fn test_requires_reference() {
        let err = FusionCore::new(&FusionConfig::default(), Arc::new(SessionContext::new()));
        assert!(matches!(err, Err(FusionError::NotInitialized)));
    }

    #[test]
    fn test_straight_line_dead_reckoning() {
        let mut core = FusionCore::new(&FusionConfig::default(), session()).unwrap();
        let mut last = None;
        for i in 1..=10 {
            last = core.on_step_detected(&east_step(500 * i as u64, i));
        }
        let fused = last.unwrap();
        assert!((fused.enu.x - 7.0).abs() < 0.1, "east {}", fused.enu.x);
        assert!(fused.enu.y.abs() < 0.1);
        assert_eq!(fused.correction, Some(CorrectionKind::Recursive));
        assert!((fused.geodetic.latitude - REF.0).abs() < 1e-4);
    }

    #[test]
    fn test_stale_radio_fix_takes_recursive_path() {
        let ctx = session();
        let mut core = FusionCore::new(&FusionConfig::default(), ctx.clone()).unwrap();
        core.on_opportunistic_update(fix_at(&ctx, 1.0, 1.0, 0, FixSourceKind::Radio))
            .unwrap();
        assert!(core.pending_fix().is_some());

        let fused = core.on_step_detected(&east_step(6000, 1)).unwrap();
        assert_eq!(fused.correction, Some(CorrectionKind::Recursive));
        assert!(core.pending_fix().is_none());
    }

    #[test]
    fn test_fresh_radio_fix_is_applied() {
        let ctx = session();
        let mut core = FusionCore::new(&FusionConfig::default(), ctx.clone()).unwrap();
        core.on_opportunistic_update(fix_at(&ctx, 1.5, 1.0, 2000, FixSourceKind::Radio))
            .unwrap();
        let fused = core.on_step_detected(&east_step(6000, 1)).unwrap();
        assert_eq!(
            fused.correction,
            Some(CorrectionKind::Absolute(FixSourceKind::Radio))
        );
        assert!(fused.enu.y > 0.0);
    }

    #[test]
    fn test_old_satellite_fix_is_not_staleness_gated() {
        let ctx = session();
        let mut core = FusionCore::new(&FusionConfig::default(), ctx.clone()).unwrap();
        core.on_opportunistic_update(fix_at(&ctx, 1.0, 0.0, 0, FixSourceKind::Satellite))
            .unwrap();
        let fused = core.on_step_detected(&east_step(9000, 1)).unwrap();
        assert_eq!(
            fused.correction,
            Some(CorrectionKind::Absolute(FixSourceKind::Satellite))
        );
    }

    #[test]
    fn test_far_fix_is_gated() {
        let ctx = session();
        let mut core = FusionCore::new(&FusionConfig::default(), ctx.clone()).unwrap();
        core.on_opportunistic_update(fix_at(&ctx, 60.0, 0.0, 400, FixSourceKind::Satellite))
            .unwrap();
        assert!(core.estimator().uses_step_motion());
        let fused = core.on_step_detected(&east_step(500, 1)).unwrap();
        assert_eq!(fused.correction, Some(CorrectionKind::Recursive));
        assert!(fused.enu.x < 2.0);
    }

    #[test]
    fn test_stopped_core_is_inert() {
        let ctx = session();
        let mut core = FusionCore::new(&FusionConfig::default(), ctx.clone()).unwrap();
        core.stop();
        assert!(core.is_stopped());
        core.on_opportunistic_update(fix_at(&ctx, 1.0, 0.0, 0, FixSourceKind::Satellite))
            .unwrap();
        assert!(core.pending_fix().is_none());
        assert!(core.on_step_detected(&east_step(500, 1)).is_none());
    }

    #[test]
    fn test_particle_core_uses_fixes_only() {
        let ctx = session();
        let config = FusionConfig {
            estimator: EstimatorKind::Particle,
            particle: crate::particle::ParticleConfig {
                num_particles: 200,
                seed: Some(11),
                ..Default::default()
            },
            ..FusionConfig::default()
        };
        let mut core = FusionCore::new(&config, ctx.clone()).unwrap();
        let fused = core.on_step_detected(&east_step(500, 1)).unwrap();
        assert_eq!(fused.correction, None);

        core.on_opportunistic_update(fix_at(&ctx, 2.0, 0.0, 900, FixSourceKind::Satellite))
            .unwrap();
        let fused = core.on_step_detected(&east_step(1000, 2)).unwrap();
        assert_eq!(
            fused.correction,
            Some(CorrectionKind::Absolute(FixSourceKind::Satellite))
        );
    }

    #[test]
    fn test_particle_core_follows_walker_beyond_gate_ceiling() {
        let ctx = session();
        let config = FusionConfig {
            estimator: EstimatorKind::Particle,
            particle: crate::particle::ParticleConfig {
                num_particles: 200,
                seed: Some(21),
                ..Default::default()
            },
            ..FusionConfig::default()
        };
        let mut core = FusionCore::new(&config, ctx.clone()).unwrap();

        let mut absolute = 0;
        let mut last = None;
        for i in 1..=60_u32 {
            let t = 500 * i as u64;
            if i > 20 {
                let truth_east = 0.7 * i as f64;
                let fix = fix_at(&ctx, truth_east, 0.0, t - 100, FixSourceKind::Satellite);
                core.on_opportunistic_update(fix).unwrap();
            }
            let fused = core.on_step_detected(&east_step(t, i)).unwrap();
            if matches!(fused.correction, Some(CorrectionKind::Absolute(_))) {
                absolute += 1;
            }
            last = Some(fused);
        }

        // Every fix is well beyond the 10 m prediction gate of the step-driven
        // filters, yet all of them reach the particle cloud.
        assert_eq!(absolute, 40);
        let fused = last.unwrap();
        assert!((fused.enu.x - 42.0).abs() < 4.0, "east {}", fused.enu.x);
        assert!(fused.enu.y.abs() < 3.0);
    }

    #[test]
    fn test_worker_preserves_order_and_drains_on_stop() {
        let core = FusionCore::new(&FusionConfig::default(), session()).unwrap();
        let (mut worker, mut rx) = FusionWorker::spawn_with_channel(core);
        for i in 1..=20 {
            worker.on_step_detected(east_step(100 * i as u64, i)).unwrap();
        }
        worker.stop_fusion();
        assert!(worker.is_stopped());

        let mut out: Vec<FusedPosition> = Vec::new();
        while let Some(fused) = rx.blocking_recv() {
            out.push(fused);
        }
        assert_eq!(out.len(), 20);
        assert!(out.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
    }

    #[test]
    fn test_worker_ignores_calls_after_stop() {
        let core = FusionCore::new(&FusionConfig::default(), session()).unwrap();
        let (mut worker, mut rx) = FusionWorker::spawn_with_channel(core);
        worker.stop_fusion();
        worker.stop_fusion();
        assert!(worker.on_step_detected(east_step(100, 1)).is_ok());
        assert!(rx.blocking_recv().is_none());
    }
}
