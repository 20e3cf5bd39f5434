//! Transfer engine against scripted register sources.
//!
//! The status word follows a fixed script (last value repeats) and every
//! register write is logged, so the exact handshake output can be checked
//! for the timeout and device-error paths.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use lm_common::curve::PositionTimeCurve;
use lm_common::device::{
    ConfigModulePorts, DeviceChannel, MotionCommandPorts, RegisterError, RegisterRead,
    RegisterWrite,
};
use lm_common::status::{BuildResult, BuildState, MemoryStatusSink};
use lm_transfer::transfer::{
    EngineSettings, EngineStatus, Phase, TransferEngine, TransferError, TransferMachine,
};

type WriteLog = Arc<Mutex<Vec<(&'static str, i32)>>>;

// ── Scripted ports ──────────────────────────────────────────────────

struct StatusScript {
    script: Arc<Mutex<VecDeque<i32>>>,
    last: i32,
}

impl RegisterRead for StatusScript {
    fn read(&mut self) -> Result<i32, RegisterError> {
        if let Some(next) = self.script.lock().pop_front() {
            self.last = next;
        }
        Ok(self.last)
    }
}

struct Constant(i32);

impl RegisterRead for Constant {
    fn read(&mut self) -> Result<i32, RegisterError> {
        Ok(self.0)
    }
}

struct Logged {
    name: &'static str,
    log: WriteLog,
}

impl RegisterWrite for Logged {
    fn write(&mut self, value: i32) -> Result<(), RegisterError> {
        self.log.lock().push((self.name, value));
        Ok(())
    }
}

fn scripted_channel(statuses: &[i32]) -> (Mutex<DeviceChannel>, WriteLog) {
    let log: WriteLog = Arc::new(Mutex::new(Vec::new()));
    let logged = |name| {
        Box::new(Logged {
            name,
            log: Arc::clone(&log),
        }) as Box<dyn RegisterWrite>
    };
    let channel = DeviceChannel {
        config: ConfigModulePorts {
            status_word: Box::new(StatusScript {
                script: Arc::new(Mutex::new(statuses.iter().copied().collect())),
                last: 0,
            }),
            index_in: Box::new(Constant(0)),
            value_in: Box::new(Constant(0)),
            control_word: logged("control"),
            index_out: logged("index"),
            value_out: logged("value"),
        },
        motion: MotionCommandPorts::new(
            logged("header"),
            [
                logged("param1"),
                logged("param2"),
                logged("param3"),
                logged("param4"),
                logged("param5"),
            ],
        ),
    };
    (Mutex::new(channel), log)
}

fn writes_to(log: &WriteLog, name: &str) -> Vec<i32> {
    log.lock()
        .iter()
        .filter(|(n, _)| *n == name)
        .map(|(_, v)| *v)
        .collect()
}

fn settings() -> EngineSettings {
    EngineSettings {
        axis: 0,
        max_profile_points: 2000,
        cycle_budget: Duration::from_secs(1),
    }
}

fn ramp(curve_id: u16) -> PositionTimeCurve {
    PositionTimeCurve::with_setpoints("ramp", curve_id, 0.01, vec![0.0, 0.25, 0.5]).unwrap()
}

fn run_until_done(
    engine: &mut TransferEngine,
    channel: &Mutex<DeviceChannel>,
) -> (u32, EngineStatus) {
    for cycle in 1..=100 {
        let status = engine.cycle(channel);
        if status.is_done() {
            return (cycle, status);
        }
    }
    (100, EngineStatus::Running)
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn write_stalled_in_curve_info_times_out() {
    // Init and send-command are answered, then the device stops advancing.
    let (channel, log) = scripted_channel(&[0, 0x0F, 0x01]);
    let sink = Arc::new(MemoryStatusSink::new());
    let machine = TransferMachine::write(ramp(4), 4).unwrap();
    let mut engine = TransferEngine::new(machine, sink.clone(), settings());

    let (cycles, status) = run_until_done(&mut engine, &channel);

    // 3 accepted steps, 4 tolerated silent cycles, failure on the next.
    assert_eq!(cycles, 8);
    assert_eq!(status, EngineStatus::Failed(TransferError::Timeout { cycles: 4 }));
    assert_eq!(engine.machine().phase(), Phase::Failed);

    assert_eq!(writes_to(&log, "control"), vec![0x0F, 0x5001, 0x5102]);
    assert_eq!(writes_to(&log, "index"), vec![0, 4]);
    assert_eq!(writes_to(&log, "header"), vec![0x0501]);
    assert_eq!(writes_to(&log, "param1"), vec![0xFFFF_0004_u32 as i32]);

    let snap = sink.snapshot();
    assert_eq!(snap.result, Some(BuildResult::Failure));
    assert_eq!(snap.state, BuildState::Done);
    assert!(snap.message.contains("within 4 cycles"));
}

#[test]
fn error_code_during_send_command_fails_immediately() {
    let (channel, log) = scripted_channel(&[0, 0x0F, 0xD401]);
    let sink = Arc::new(MemoryStatusSink::new());
    let machine = TransferMachine::read(6, 1000);
    let mut engine = TransferEngine::new(machine, sink.clone(), settings());

    let (cycles, status) = run_until_done(&mut engine, &channel);

    assert_eq!(cycles, 3);
    assert_eq!(status, EngineStatus::Failed(TransferError::DeviceError { code: 0xD4 }));
    // Reads never request a delete.
    assert!(writes_to(&log, "header").is_empty());
    assert_eq!(writes_to(&log, "control"), vec![0x0F, 0x6001]);
    assert!(sink.snapshot().message.contains("0xd4"));
}

#[test]
fn error_code_in_curve_info_uses_steady_low_byte() {
    let (channel, _log) = scripted_channel(&[0, 0x0F, 0x01, 0x0402, 0x1F03]);
    let sink = Arc::new(MemoryStatusSink::new());
    let machine = TransferMachine::write(ramp(2), 1000).unwrap();
    let mut engine = TransferEngine::new(machine, sink, settings());

    let (_, status) = run_until_done(&mut engine, &channel);
    assert_eq!(status, EngineStatus::Failed(TransferError::DeviceError { code: 0x1F }));
}

#[test]
fn unrelated_status_words_are_skipped() {
    let (channel, log) = scripted_channel(&[0, 0x0F, 0x7777, 0x0005, 0x01]);
    let sink = Arc::new(MemoryStatusSink::new());
    let machine = TransferMachine::write(ramp(1), 1000).unwrap();
    let mut engine = TransferEngine::new(machine, sink, settings());

    for _ in 0..5 {
        assert_eq!(engine.cycle(&channel), EngineStatus::Running);
    }
    assert_eq!(engine.machine().phase(), Phase::CurveInfo);
    // No control word was written while the unrelated words were skipped.
    assert_eq!(writes_to(&log, "control"), vec![0x0F, 0x5001, 0x5102]);
}
