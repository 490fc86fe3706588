//! Caller-side façade tying PDR, turn detection and the fusion worker to one
//! event stream.

use crate::config::FusionConfig;
use crate::error::Result;
use crate::fusion::{FusionCore, FusionWorker};
use crate::pdr::PdrProcessing;
use crate::session::SessionContext;
use crate::turn::{MovementType, TurnDetector};
use crate::types::{FusedPosition, OpportunisticFix, StepEvent, StepUpdate};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerEvent {
    Position(FusedPosition),
    /// Meters relative to the session start.
    Elevation(f64),
    Floor(i32),
    Elevator(bool),
}

impl From<FusedPosition> for TrackerEvent {
    fn from(p: FusedPosition) -> Self {
        Self::Position(p)
    }
}

/// One recording session.
///
/// Sensor inputs are processed on the calling thread up to the PDR step;
/// filtering runs on the fusion worker. Not meant to be shared across
/// threads.
pub struct PositioningSession {
    session: Arc<SessionContext>,
    pdr: PdrProcessing,
    turns: TurnDetector,
    worker: FusionWorker,
    events: UnboundedSender<TrackerEvent>,

    // Session-wide stride statistics for the filter noise model.
    stride_sum: f64,
    stride_count: u32,

    last_floor: i32,
    last_elevator: bool,
    settled: bool,
}

impl PositioningSession {
    pub fn start(
        config: FusionConfig,
        session: Arc<SessionContext>,
    ) -> Result<(Self, UnboundedReceiver<TrackerEvent>)> {
        let config = config.sanitized();
        let core = FusionCore::new(&config, session.clone())?;
        let (events, rx) = mpsc::unbounded_channel();
        let worker = FusionWorker::spawn(core, events.clone());
        info!(estimator = config.estimator.label(), "positioning session started");

        Ok((
            Self {
                session,
                pdr: PdrProcessing::new(config.pdr.clone()),
                turns: TurnDetector::new(config.turn),
                worker,
                events,
                stride_sum: 0.0,
                stride_count: 0,
                last_floor: 0,
                last_elevator: false,
                settled: false,
            },
            rx,
        ))
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn pdr(&self) -> &PdrProcessing {
        &self.pdr
    }

    /// Compass heading sample (rad). The first one starts turn monitoring.
    pub fn on_orientation(&mut self, heading_rad: f64) {
        if !self.turns.is_monitoring() {
            self.turns.start_monitoring(heading_rad);
            return;
        }
        self.turns.on_orientation(heading_rad);
    }

    pub fn on_step(&mut self, event: &StepEvent) -> Result<()> {
        let movement_type = if self.turns.is_monitoring() {
            self.turns.on_step_detected(event.heading_rad)
        } else {
            MovementType::Straight
        };

        let Some(pdr_position) =
            self.pdr
                .update_pdr(event.timestamp_ms, &event.accel_magnitudes, event.heading_rad)
        else {
            return Ok(());
        };

        let step_length = self.pdr.last_step_length();
        self.stride_sum += step_length;
        self.stride_count += 1;

        self.worker.on_step_detected(StepUpdate {
            timestamp_ms: event.timestamp_ms,
            pdr_position,
            heading_rad: event.heading_rad,
            step_length,
            average_step_length: self.stride_sum / self.stride_count as f64,
            movement_type,
        })
    }

    pub fn on_fix(&mut self, fix: OpportunisticFix) -> Result<()> {
        self.worker.on_opportunistic_update(fix)
    }

    /// Barometric altitude sample (m). Emits elevation once settled and a
    /// floor event on every floor change.
    pub fn on_altitude(&mut self, absolute_altitude: f64) {
        let elevation = self.pdr.update_elevation(absolute_altitude);
        if !self.settled {
            self.settled = self.pdr.start_elevation().is_some();
            return;
        }
        self.emit(TrackerEvent::Elevation(elevation));

        let floor = self.pdr.current_floor();
        if floor != self.last_floor {
            self.last_floor = floor;
            self.emit(TrackerEvent::Floor(floor));
        }
    }

    /// Gravity / linear acceleration pair. Emits on elevator state changes.
    pub fn on_acceleration(&mut self, gravity: [f64; 3], linear_accel: [f64; 3]) {
        let elevator = self.pdr.estimate_elevator(gravity, linear_accel);
        if elevator != self.last_elevator {
            self.last_elevator = elevator;
            self.emit(TrackerEvent::Elevator(elevator));
        }
    }

    /// Mean stride since the previous call.
    pub fn average_step_length(&mut self) -> f64 {
        self.pdr.average_step_length()
    }

    /// Drains queued work and shuts the worker down. The event receiver ends
    /// once the session is dropped.
    pub fn stop(&mut self) {
        self.worker.stop_fusion();
        self.turns.stop_monitoring();
        info!(steps = self.stride_count, "positioning session stopped");
    }

    fn emit(&self, event: TrackerEvent) {
        // A dropped receiver only loses notifications.
        let _ = self.events.send(event);
    }
}
