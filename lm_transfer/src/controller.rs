//! Per-controller curve transfer worker.
//!
//! A [`CurveController`] owns one worker thread subscribed to the
//! [`CycleBus`]. Requests are validated synchronously on the caller's
//! thread, queued in a single slot and picked up by the worker, which then
//! runs exactly one engine cycle per bus tick until the transfer ends.
//!
//! Only one transfer may be pending or active per controller; further
//! requests are rejected with [`RequestError::Busy`] and leave the status
//! sink untouched.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use lm_common::config::LmConfig;
use lm_common::curve::PositionTimeCurve;
use lm_common::device::DeviceChannel;
use lm_common::status::{BuildResult, BuildState, StatusSink};

use crate::cycle::{CycleBus, CycleSubscription};
use crate::transfer::{
    Direction, EngineSettings, Phase, RequestError, TransferEngine, TransferMachine,
};

/// Worker wake-up period while idle (shutdown check).
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Longest wait for a bus tick before re-checking shutdown.
const TICK_WAIT: Duration = Duration::from_millis(100);

/// Externally visible controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    /// Accepted, waiting for the worker.
    Pending { curve_id: u16, direction: Direction },
    /// Being transferred.
    Active { curve_id: u16, direction: Direction },
}

impl ControllerState {
    #[inline]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

enum Slot {
    Idle,
    Pending(Box<TransferEngine>),
    Active { curve_id: u16, direction: Direction },
}

struct Shared {
    slot: Mutex<Slot>,
    start: Condvar,
    idle: Condvar,
    last_read: Mutex<Option<PositionTimeCurve>>,
    running: AtomicBool,
}

/// Curve transfer front-end of one device controller.
pub struct CurveController {
    name: String,
    channel: Arc<Mutex<DeviceChannel>>,
    sink: Arc<dyn StatusSink>,
    shared: Arc<Shared>,
    settings: EngineSettings,
    timeout_cycles: u32,
    max_curve_id: u16,
    worker: Option<JoinHandle<()>>,
}

impl CurveController {
    /// Start the worker thread and register it on `bus`.
    ///
    /// # Errors
    /// Thread spawn failure.
    pub fn spawn(
        name: &str,
        axis: usize,
        channel: Arc<Mutex<DeviceChannel>>,
        sink: Arc<dyn StatusSink>,
        bus: &Arc<CycleBus>,
        config: &LmConfig,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::Idle),
            start: Condvar::new(),
            idle: Condvar::new(),
            last_read: Mutex::new(None),
            running: AtomicBool::new(true),
        });

        let subscription = bus.subscribe();
        let worker = {
            let shared = Arc::clone(&shared);
            let channel = Arc::clone(&channel);
            let name = name.to_string();
            std::thread::Builder::new()
                .name(format!("lm-curve-{}", name))
                .spawn(move || worker_loop(&name, &shared, &channel, subscription))?
        };

        info!("Curve controller '{}' started (axis {})", name, axis);
        Ok(Self {
            name: name.to_string(),
            channel,
            sink,
            shared,
            settings: EngineSettings::from_config(axis, config),
            timeout_cycles: config.transfer.timeout_cycles,
            max_curve_id: config.transfer.max_curve_id,
            worker: Some(worker),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn axis(&self) -> usize {
        self.settings.axis
    }

    /// Queue a write of `curve` to the device.
    ///
    /// # Errors
    /// `Busy` and `Stopped` without touching the status sink; id, name,
    /// duration and length failures after publishing a failed result.
    pub fn build_profile(&self, curve: PositionTimeCurve) -> Result<(), RequestError> {
        let timeout_cycles = self.timeout_cycles;
        let curve_id = curve.curve_id();
        self.submit(curve_id, move || {
            TransferMachine::write(curve, timeout_cycles).map_err(RequestError::from)
        })
    }

    /// Queue a read of curve `curve_id` from the device.
    ///
    /// # Errors
    /// Same as [`build_profile`](Self::build_profile).
    pub fn read_profile(&self, curve_id: u16) -> Result<(), RequestError> {
        let timeout_cycles = self.timeout_cycles;
        self.submit(curve_id, move || {
            Ok(TransferMachine::read(curve_id, timeout_cycles))
        })
    }

    fn submit(
        &self,
        curve_id: u16,
        build: impl FnOnce() -> Result<TransferMachine, RequestError>,
    ) -> Result<(), RequestError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(RequestError::Stopped);
        }

        let mut slot = self.shared.slot.lock();
        if !matches!(*slot, Slot::Idle) {
            debug!("{}: rejecting curve {} request, busy", self.name, curve_id);
            return Err(RequestError::Busy);
        }

        let machine = match self.validate_id(curve_id).and_then(|()| build()) {
            Ok(machine) => machine,
            Err(err) => {
                self.publish_rejection(&err);
                return Err(err);
            }
        };

        if machine.direction() == Direction::Read {
            *self.shared.last_read.lock() = None;
        }
        let engine = TransferEngine::new(machine, Arc::clone(&self.sink), self.settings);
        *slot = Slot::Pending(Box::new(engine));
        self.shared.start.notify_one();
        Ok(())
    }

    fn validate_id(&self, curve_id: u16) -> Result<(), RequestError> {
        if curve_id == 0 || curve_id > self.max_curve_id {
            return Err(RequestError::InvalidCurveId {
                id: curve_id,
                max: self.max_curve_id,
            });
        }
        Ok(())
    }

    fn publish_rejection(&self, err: &RequestError) {
        warn!("{}: curve request rejected: {}", self.name, err);
        self.sink.publish_message(&format!("Rejected: {}", err));
        self.sink.publish_result(BuildResult::Failure);
        self.sink.publish_state(BuildState::Done);
    }

    /// Delete curve `curve_id` on the device right away.
    ///
    /// # Errors
    /// `InvalidCurveId`, or `Transport` if the motion command could not be written.
    pub fn delete_curve(&self, curve_id: u16) -> Result<(), RequestError> {
        self.validate_id(curve_id)?;
        self.channel.lock().motion.delete_curve(curve_id)?;
        info!("{}: deleted curve {}", self.name, curve_id);
        Ok(())
    }

    pub fn state(&self) -> ControllerState {
        match &*self.shared.slot.lock() {
            Slot::Idle => ControllerState::Idle,
            Slot::Pending(engine) => ControllerState::Pending {
                curve_id: engine.machine().curve_id(),
                direction: engine.machine().direction(),
            },
            Slot::Active {
                curve_id,
                direction,
            } => ControllerState::Active {
                curve_id: *curve_id,
                direction: *direction,
            },
        }
    }

    /// Curve received by the last successful read.
    pub fn last_read_curve(&self) -> Option<PositionTimeCurve> {
        self.shared.last_read.lock().clone()
    }

    /// Block until no transfer is pending or active. `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while !matches!(*slot, Slot::Idle) {
            if self.shared.idle.wait_until(&mut slot, deadline).timed_out() {
                return matches!(*slot, Slot::Idle);
            }
        }
        true
    }

    /// Stop the worker between cycles and join it.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.start.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("{}: curve worker panicked", self.name);
            }
            info!("Curve controller '{}' stopped", self.name);
        }
    }
}

impl Drop for CurveController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─── Worker ─────────────────────────────────────────────────────────

fn worker_loop(
    name: &str,
    shared: &Shared,
    channel: &Mutex<DeviceChannel>,
    mut subscription: CycleSubscription,
) {
    debug!("{}: curve worker running", name);
    while shared.running.load(Ordering::SeqCst) {
        let Some(engine) = take_pending(shared) else {
            continue;
        };

        subscription.resync();
        let (engine, done) = run_transfer(shared, channel, &mut subscription, engine);

        if !done {
            engine.abandon("controller shut down");
        }
        let machine = engine.into_machine();
        if machine.direction() == Direction::Read && machine.phase() == Phase::Finished {
            *shared.last_read.lock() = Some(machine.into_curve());
        }

        *shared.slot.lock() = Slot::Idle;
        shared.idle.notify_all();
    }

    // Requests accepted but never started still count as pending.
    if let Slot::Pending(engine) = std::mem::replace(&mut *shared.slot.lock(), Slot::Idle) {
        engine.abandon("controller shut down");
    }
    shared.idle.notify_all();
    debug!("{}: curve worker exiting", name);
}

fn take_pending(shared: &Shared) -> Option<Box<TransferEngine>> {
    let mut slot = shared.slot.lock();
    if !matches!(*slot, Slot::Pending(_)) {
        shared.start.wait_for(&mut slot, IDLE_POLL);
    }
    match std::mem::replace(&mut *slot, Slot::Idle) {
        Slot::Pending(engine) => {
            *slot = Slot::Active {
                curve_id: engine.machine().curve_id(),
                direction: engine.machine().direction(),
            };
            Some(engine)
        }
        other => {
            *slot = other;
            None
        }
    }
}

/// One engine cycle per tick until the transfer ends or shutdown is requested.
fn run_transfer(
    shared: &Shared,
    channel: &Mutex<DeviceChannel>,
    subscription: &mut CycleSubscription,
    mut engine: Box<TransferEngine>,
) -> (Box<TransferEngine>, bool) {
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            return (engine, false);
        }
        if subscription.wait_next(TICK_WAIT).is_none() {
            continue;
        }
        if engine.cycle(channel).is_done() {
            return (engine, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedConfigModule;
    use lm_common::curve::DescriptorError;
    use lm_common::status::{MemoryStatusSink, StatusEvent};

    fn controller(bus: &Arc<CycleBus>) -> (CurveController, Arc<MemoryStatusSink>) {
        let sim = SimulatedConfigModule::new();
        let sink = Arc::new(MemoryStatusSink::new());
        let ctrl = CurveController::spawn(
            "test",
            0,
            Arc::new(Mutex::new(sim.channel())),
            sink.clone(),
            bus,
            &LmConfig::default(),
        )
        .unwrap();
        (ctrl, sink)
    }

    fn curve(id: u16) -> PositionTimeCurve {
        PositionTimeCurve::with_setpoints("ctrl", id, 0.01, vec![0.0, 1.0]).unwrap()
    }

    #[test]
    fn second_request_is_rejected_while_busy() {
        let bus = Arc::new(CycleBus::new());
        let (ctrl, sink) = controller(&bus);

        ctrl.build_profile(curve(1)).unwrap();
        assert!(!ctrl.state().is_idle());
        let before = sink.snapshot().history.len();

        assert_eq!(ctrl.build_profile(curve(2)), Err(RequestError::Busy));
        assert_eq!(ctrl.read_profile(1), Err(RequestError::Busy));
        assert_eq!(sink.snapshot().history.len(), before);
        assert_eq!(sink.snapshot().state, BuildState::Busy);
    }

    #[test]
    fn invalid_curve_id_publishes_failure() {
        let bus = Arc::new(CycleBus::new());
        let (ctrl, sink) = controller(&bus);

        let err = ctrl.read_profile(0).unwrap_err();
        assert_eq!(err, RequestError::InvalidCurveId { id: 0, max: 100 });
        assert!(matches!(
            ctrl.build_profile(curve(101)),
            Err(RequestError::InvalidCurveId { .. })
        ));

        let snap = sink.snapshot();
        assert_eq!(snap.result, Some(BuildResult::Failure));
        assert_eq!(snap.state, BuildState::Done);
        assert!(ctrl.state().is_idle());
    }

    #[test]
    fn zero_length_curve_is_invalid_duration() {
        let bus = Arc::new(CycleBus::new());
        let (ctrl, sink) = controller(&bus);

        let empty = PositionTimeCurve::new("empty", 3, 0.01).unwrap();
        assert!(matches!(
            ctrl.build_profile(empty),
            Err(RequestError::InvalidDuration(_))
        ));
        assert!(!sink
            .snapshot()
            .history
            .contains(&StatusEvent::State(BuildState::Busy)));
    }

    #[test]
    fn oversized_curve_is_rejected_before_any_cycle() {
        let bus = Arc::new(CycleBus::new());
        let (ctrl, sink) = controller(&bus);

        let oversized = PositionTimeCurve::with_setpoints("big", 3, 0.001, vec![0.0; 20_000])
            .unwrap();
        assert_eq!(
            ctrl.build_profile(oversized),
            Err(RequestError::InvalidLength(DescriptorError::TooManySetpoints {
                count: 20_000
            }))
        );
        assert!(ctrl.state().is_idle());

        let snap = sink.snapshot();
        assert_eq!(snap.result, Some(BuildResult::Failure));
        assert!(snap.message.contains("20000 setpoints"), "{}", snap.message);
        assert!(!snap.history.contains(&StatusEvent::State(BuildState::Busy)));
    }

    #[test]
    fn shutdown_stops_worker_and_rejects_requests() {
        let bus = Arc::new(CycleBus::new());
        let (mut ctrl, sink) = controller(&bus);
        assert_eq!(bus.listener_count(), 1);

        ctrl.build_profile(curve(1)).unwrap();
        ctrl.shutdown();
        assert_eq!(bus.listener_count(), 0);
        assert!(ctrl.state().is_idle());
        assert_eq!(ctrl.build_profile(curve(1)), Err(RequestError::Stopped));
        assert_eq!(sink.snapshot().result, Some(BuildResult::Failure));
    }

    #[test]
    fn wait_idle_times_out_without_ticks() {
        let bus = Arc::new(CycleBus::new());
        let (ctrl, _sink) = controller(&bus);
        assert!(ctrl.wait_idle(Duration::from_millis(1)));
        ctrl.build_profile(curve(1)).unwrap();
        assert!(!ctrl.wait_idle(Duration::from_millis(20)));
    }
}
