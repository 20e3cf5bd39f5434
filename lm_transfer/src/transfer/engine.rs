//! Transfer engine: one machine step per bus cycle against the device.
//!
//! Each [`TransferEngine::cycle`]:
//! 1. Locks the device channel.
//! 2. Re-sends the output frame of the previous cycle if writing it failed,
//!    and returns without stepping.
//! 3. Reads `status_word` and `value_in`; a failed read skips the cycle.
//! 4. Steps the [`TransferMachine`] and writes its effects in order.
//!
//! Completion and failure are published to the [`StatusSink`] after the
//! device lock is released.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use lm_common::config::LmConfig;
use lm_common::device::{ConfigModulePorts, DeviceChannel, RegisterError};
use lm_common::status::{BuildResult, BuildState, StatusSink};

use super::error::TransferError;
use super::machine::{CycleInput, Direction, Effect, Effects, StepOutcome, TransferMachine};
use crate::cycle::CycleStats;
use crate::readback::{ReadbackScaling, project};

/// Engine parameters taken from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Axis whose read-back array is published.
    pub axis: usize,
    pub max_profile_points: usize,
    /// Step time above which a cycle counts as overrun.
    pub cycle_budget: Duration,
}

impl EngineSettings {
    pub fn from_config(axis: usize, config: &LmConfig) -> Self {
        Self {
            axis,
            max_profile_points: config.transfer.max_profile_points,
            cycle_budget: config.bus.cycle_time(),
        }
    }
}

/// Engine state after a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Running,
    Finished,
    Failed(TransferError),
}

impl EngineStatus {
    #[inline]
    pub fn is_done(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One in-flight transfer bound to a status sink.
pub struct TransferEngine {
    machine: TransferMachine,
    sink: Arc<dyn StatusSink>,
    settings: EngineSettings,
    retry: Effects,
    stats: CycleStats,
    read_failures: u64,
    write_failures: u64,
}

impl TransferEngine {
    /// Wrap `machine` and publish the start of the transfer.
    pub fn new(
        machine: TransferMachine,
        sink: Arc<dyn StatusSink>,
        settings: EngineSettings,
    ) -> Self {
        let message = format!("{} curve {}", verb(machine.direction()), machine.curve_id());
        info!("{}", message);
        sink.publish_message(&message);
        sink.publish_state(BuildState::Busy);
        Self {
            machine,
            sink,
            settings,
            retry: Effects::new(),
            stats: CycleStats::new(),
            read_failures: 0,
            write_failures: 0,
        }
    }

    #[inline]
    pub fn machine(&self) -> &TransferMachine {
        &self.machine
    }

    pub fn into_machine(self) -> TransferMachine {
        self.machine
    }

    #[inline]
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Transport read failures seen so far.
    #[inline]
    pub fn read_failures(&self) -> u64 {
        self.read_failures
    }

    /// Transport write failures seen so far.
    #[inline]
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// Run one bus cycle.
    pub fn cycle(&mut self, channel: &Mutex<DeviceChannel>) -> EngineStatus {
        let started = Instant::now();
        let outcome = {
            let mut device = channel.lock();
            self.cycle_locked(&mut device)
        };

        let status = match outcome {
            None | Some(StepOutcome::Skipped) | Some(StepOutcome::Continue) => {
                EngineStatus::Running
            }
            Some(StepOutcome::Finished) => {
                self.complete();
                EngineStatus::Finished
            }
            Some(StepOutcome::Failed(err)) => {
                self.report_failure(&err);
                EngineStatus::Failed(err)
            }
        };

        if self.stats.record(started.elapsed(), self.settings.cycle_budget)
            && CycleStats::should_report(self.stats.overruns)
        {
            warn!(
                "Curve {}: step overrun #{} took {}us (budget {}us)",
                self.machine.curve_id(),
                self.stats.overruns,
                self.stats.last_cycle_ns / 1000,
                self.settings.cycle_budget.as_micros()
            );
        }
        status
    }

    fn cycle_locked(&mut self, device: &mut DeviceChannel) -> Option<StepOutcome> {
        if !self.retry.is_empty() {
            let frame = std::mem::take(&mut self.retry);
            debug!("Curve {}: re-sending {} outputs", self.machine.curve_id(), frame.len());
            self.apply(device, &frame);
            return None;
        }

        let input = match read_input(&mut device.config) {
            Ok(input) => input,
            Err(err) => {
                self.read_failures += 1;
                if CycleStats::should_report(self.read_failures) {
                    warn!(
                        "Curve {}: {} (retrying next cycle, #{})",
                        self.machine.curve_id(),
                        err,
                        self.read_failures
                    );
                }
                return None;
            }
        };

        let out = self.machine.step(input);
        self.apply(device, &out.effects);
        Some(out.outcome)
    }

    /// Write `effects` in order; on a failure keep the unsent tail for the next cycle.
    fn apply(&mut self, device: &mut DeviceChannel, effects: &[Effect]) {
        for (i, effect) in effects.iter().enumerate() {
            let result = match *effect {
                Effect::DeleteCurve { curve_id } => device.motion.delete_curve(curve_id),
                Effect::WriteIndex(v) => device.config.index_out.write(v),
                Effect::WriteValue(v) => device.config.value_out.write(v),
                Effect::WriteControl(v) => device.config.control_word.write(v),
                Effect::CursorUnderflow => {
                    warn!(
                        "Curve {}: send buffer empty in {:?} (underflow #{})",
                        self.machine.curve_id(),
                        self.machine.phase(),
                        self.machine.underflows()
                    );
                    Ok(())
                }
            };

            if let Err(err) = result {
                self.write_failures += 1;
                if CycleStats::should_report(self.write_failures) {
                    warn!(
                        "Curve {}: {} (re-sending next cycle, #{})",
                        self.machine.curve_id(),
                        err,
                        self.write_failures
                    );
                }
                let tail = effects[i..]
                    .iter()
                    .copied()
                    .filter(|e| *e != Effect::CursorUnderflow);
                for effect in tail {
                    // Tail of a frame never exceeds the frame capacity.
                    let _ = self.retry.push(effect);
                }
                return;
            }
        }
    }

    fn complete(&mut self) {
        let curve_id = self.machine.curve_id();
        let count = self.machine.curve().len();
        let message = match self.machine.direction() {
            Direction::Write => format!("Curve {} written ({} setpoints)", curve_id, count),
            Direction::Read => {
                let axis = self.settings.axis;
                let scaling = ReadbackScaling::resolve(self.sink.axis_scaling(axis));
                let points = project(
                    &self.machine.curve().curve.setpoints,
                    scaling,
                    self.settings.max_profile_points,
                );
                self.sink.publish_readbacks(axis, &points);
                format!("Curve {} read ({} setpoints)", curve_id, count)
            }
        };
        info!(
            "{} in {} cycles (avg step {}us)",
            message,
            self.stats.cycle_count + 1,
            self.stats.avg_cycle_ns() / 1000
        );
        self.sink.publish_message(&message);
        self.sink.publish_result(BuildResult::Success);
        self.sink.publish_state(BuildState::Done);
    }

    /// Report a transfer that stopped before a terminal phase.
    pub fn abandon(&self, reason: &str) {
        let message = format!(
            "{} curve {} abandoned: {}",
            verb(self.machine.direction()),
            self.machine.curve_id(),
            reason
        );
        warn!("{}", message);
        self.sink.publish_message(&message);
        self.sink.publish_result(BuildResult::Failure);
        self.sink.publish_state(BuildState::Done);
    }

    fn report_failure(&self, err: &TransferError) {
        let message = format!(
            "{} curve {} failed: {}",
            verb(self.machine.direction()),
            self.machine.curve_id(),
            err
        );
        match err {
            TransferError::ProtocolViolation(_) | TransferError::UnknownState => {
                error!("{} (implementation defect)", message)
            }
            _ => error!("{}", message),
        }
        self.sink.publish_message(&message);
        self.sink.publish_result(BuildResult::Failure);
        self.sink.publish_state(BuildState::Done);
    }
}

fn verb(direction: Direction) -> &'static str {
    match direction {
        Direction::Write => "Writing",
        Direction::Read => "Reading",
    }
}

fn read_input(config: &mut ConfigModulePorts) -> Result<CycleInput, RegisterError> {
    let status_word = config.status_word.read()?;
    let value_in = config.value_in.read()?;
    Ok(CycleInput {
        status_word,
        value_in,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedConfigModule;
    use crate::transfer::machine::Phase;
    use lm_common::curve::PositionTimeCurve;
    use lm_common::status::{MemoryStatusSink, StatusEvent};

    fn settings() -> EngineSettings {
        EngineSettings {
            axis: 0,
            max_profile_points: 2000,
            cycle_budget: Duration::from_secs(1),
        }
    }

    fn run(
        engine: &mut TransferEngine,
        sim: &SimulatedConfigModule,
        channel: &Mutex<DeviceChannel>,
    ) -> EngineStatus {
        for _ in 0..500 {
            let status = engine.cycle(channel);
            if status.is_done() {
                return status;
            }
            sim.exchange();
        }
        EngineStatus::Running
    }

    fn curve() -> PositionTimeCurve {
        PositionTimeCurve::with_setpoints("engine", 2, 0.01, vec![0.0, 0.5, 1.0, 0.5]).unwrap()
    }

    #[test]
    fn write_stores_curve_and_reports_success() {
        let sim = SimulatedConfigModule::new();
        let channel = Mutex::new(sim.channel());
        let sink = Arc::new(MemoryStatusSink::new());
        let machine = TransferMachine::write(curve(), 100).unwrap();
        let mut engine = TransferEngine::new(machine, sink.clone(), settings());

        assert_eq!(run(&mut engine, &sim, &channel), EngineStatus::Finished);

        let stored = sim.curve(2).unwrap();
        assert_eq!(stored.setpoints, vec![0, 5000, 10000, 5000]);
        let snap = sink.snapshot();
        assert_eq!(snap.state, BuildState::Done);
        assert_eq!(snap.result, Some(BuildResult::Success));
        assert_eq!(snap.history[0], StatusEvent::Message("Writing curve 2".to_string()));
        assert_eq!(snap.history[1], StatusEvent::State(BuildState::Busy));
    }

    #[test]
    fn read_failure_skips_cycle_without_stepping() {
        let sim = SimulatedConfigModule::new();
        let channel = Mutex::new(sim.channel());
        let sink = Arc::new(MemoryStatusSink::new());
        let machine = TransferMachine::write(curve(), 100).unwrap();
        let mut engine = TransferEngine::new(machine, sink, settings());

        engine.cycle(&channel);
        sim.exchange();
        sim.fail_next_reads(1);
        assert_eq!(engine.cycle(&channel), EngineStatus::Running);
        assert_eq!(engine.machine().phase(), Phase::Init);
        assert_eq!(engine.read_failures(), 1);

        engine.cycle(&channel);
        assert_eq!(engine.machine().phase(), Phase::SendCommand);
    }

    #[test]
    fn failed_write_is_resent_before_next_step() {
        let sim = SimulatedConfigModule::new();
        let channel = Mutex::new(sim.channel());
        let sink = Arc::new(MemoryStatusSink::new());
        let machine = TransferMachine::write(curve(), 100).unwrap();
        let mut engine = TransferEngine::new(machine, sink, settings());

        sim.fail_next_writes(1);
        engine.cycle(&channel);
        assert_eq!(engine.write_failures(), 1);
        assert_eq!(sim.control_word(), 0);

        sim.exchange();
        assert_eq!(engine.cycle(&channel), EngineStatus::Running);
        assert_eq!(sim.control_word(), 0x0F);
        assert_eq!(engine.machine().phase(), Phase::Init);

        sim.exchange();
        engine.cycle(&channel);
        assert_eq!(engine.machine().phase(), Phase::SendCommand);
        assert_eq!(run(&mut engine, &sim, &channel), EngineStatus::Finished);
    }

    #[test]
    fn unresponsive_device_times_out() {
        let sim = SimulatedConfigModule::new();
        sim.set_unresponsive(true);
        let channel = Mutex::new(sim.channel());
        let sink = Arc::new(MemoryStatusSink::new());
        let machine = TransferMachine::write(curve(), 3).unwrap();
        let mut engine = TransferEngine::new(machine, sink.clone(), settings());

        for _ in 0..4 {
            assert_eq!(engine.cycle(&channel), EngineStatus::Running);
            sim.exchange();
        }
        assert_eq!(
            engine.cycle(&channel),
            EngineStatus::Failed(TransferError::Timeout { cycles: 3 })
        );

        let snap = sink.snapshot();
        assert_eq!(snap.result, Some(BuildResult::Failure));
        assert_eq!(snap.state, BuildState::Done);
        assert!(snap.message.contains("did not respond"));
    }

    #[test]
    fn device_error_code_is_published() {
        let sim = SimulatedConfigModule::new();
        let channel = Mutex::new(sim.channel());
        let sink = Arc::new(MemoryStatusSink::new());
        let machine = TransferMachine::read(9, 100);
        let mut engine = TransferEngine::new(machine, sink.clone(), settings());

        let status = run(&mut engine, &sim, &channel);
        assert_eq!(
            status,
            EngineStatus::Failed(TransferError::DeviceError {
                code: crate::drivers::simulation::error_code::CURVE_NOT_FOUND
            })
        );
        assert!(sink.snapshot().message.contains("0xd2"));
    }

    #[test]
    fn read_publishes_projected_readbacks() {
        let sim = SimulatedConfigModule::new();
        sim.store_curve(&curve()).unwrap();
        let channel = Mutex::new(sim.channel());
        let sink = Arc::new(MemoryStatusSink::new());
        sink.set_axis_scaling(
            0,
            lm_common::status::AxisScaling {
                resolution: Some(2.0),
                offset: None,
                direction: None,
            },
        );
        let machine = TransferMachine::read(2, 100);
        let mut engine = TransferEngine::new(machine, sink.clone(), settings());

        assert_eq!(run(&mut engine, &sim, &channel), EngineStatus::Finished);
        let curve = engine.into_machine().into_curve();
        assert_eq!(curve.curve.name.as_str(), "engine");
        assert_eq!(curve.curve.setpoints, vec![0.0, 0.5, 1.0, 0.5]);

        let snap = sink.snapshot();
        assert_eq!(snap.readbacks[&0], vec![0.0, 1.0, 2.0, 1.0]);
        assert_eq!(snap.result, Some(BuildResult::Success));
    }
}
