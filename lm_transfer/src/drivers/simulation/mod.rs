//! Simulated configuration module.
//!
//! Provides register ports backed by a software device so the transfer
//! engine can run without a fieldbus. [`SimulatedConfigModule::exchange`]
//! is one bus cycle: the device sees the words written since the last
//! exchange and latches its answer into the input registers.
//!
//! Transport faults (failing reads or writes) and device faults (no answer,
//! error code) can be injected.

mod device;

pub use device::{SimulatedDevice, StoredCurve, error_code};

use parking_lot::Mutex;
use std::sync::Arc;

use lm_common::curve::{DescriptorError, PositionTimeCurve};
use lm_common::device::{
    ConfigModulePorts, DeviceChannel, MotionCommandPorts, RegisterError, RegisterRead,
    RegisterWrite,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reg {
    StatusWord,
    IndexIn,
    ValueIn,
    ControlWord,
    IndexOut,
    ValueOut,
    Header,
    Param(usize),
}

impl Reg {
    const fn name(self) -> &'static str {
        match self {
            Self::StatusWord => "status_word",
            Self::IndexIn => "index_in",
            Self::ValueIn => "value_in",
            Self::ControlWord => "control_word",
            Self::IndexOut => "index_out",
            Self::ValueOut => "value_out",
            Self::Header => "motion_header",
            Self::Param(_) => "motion_param",
        }
    }
}

#[derive(Debug, Default)]
struct Registers {
    status_word: i32,
    index_in: i32,
    value_in: i32,
    control_word: i32,
    index_out: i32,
    value_out: i32,
    header: i32,
    params: [i32; 5],
}

impl Registers {
    fn get(&self, reg: Reg) -> i32 {
        match reg {
            Reg::StatusWord => self.status_word,
            Reg::IndexIn => self.index_in,
            Reg::ValueIn => self.value_in,
            Reg::ControlWord => self.control_word,
            Reg::IndexOut => self.index_out,
            Reg::ValueOut => self.value_out,
            Reg::Header => self.header,
            Reg::Param(i) => self.params.get(i).copied().unwrap_or(0),
        }
    }

    fn set(&mut self, reg: Reg, value: i32) {
        match reg {
            Reg::StatusWord => self.status_word = value,
            Reg::IndexIn => self.index_in = value,
            Reg::ValueIn => self.value_in = value,
            Reg::ControlWord => self.control_word = value,
            Reg::IndexOut => self.index_out = value,
            Reg::ValueOut => self.value_out = value,
            Reg::Header => self.header = value,
            Reg::Param(i) => {
                if let Some(slot) = self.params.get_mut(i) {
                    *slot = value;
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    device: SimulatedDevice,
    regs: Registers,
    failing_reads: u32,
    failing_writes: u32,
}

/// Software configuration module shared between the bus and the ports.
#[derive(Clone, Default)]
pub struct SimulatedConfigModule {
    shared: Arc<Mutex<SimState>>,
}

impl SimulatedConfigModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device channel whose ports access this module.
    pub fn channel(&self) -> DeviceChannel {
        let port = |reg| SimPort {
            shared: Arc::clone(&self.shared),
            reg,
        };
        let boxed = |reg| Box::new(port(reg)) as Box<dyn RegisterWrite>;
        DeviceChannel {
            config: ConfigModulePorts {
                status_word: Box::new(port(Reg::StatusWord)),
                index_in: Box::new(port(Reg::IndexIn)),
                value_in: Box::new(port(Reg::ValueIn)),
                control_word: boxed(Reg::ControlWord),
                index_out: boxed(Reg::IndexOut),
                value_out: boxed(Reg::ValueOut),
            },
            motion: MotionCommandPorts::new(
                boxed(Reg::Header),
                [
                    boxed(Reg::Param(0)),
                    boxed(Reg::Param(1)),
                    boxed(Reg::Param(2)),
                    boxed(Reg::Param(3)),
                    boxed(Reg::Param(4)),
                ],
            ),
        }
    }

    /// One bus cycle.
    pub fn exchange(&self) {
        let mut state = self.shared.lock();
        let SimState { device, regs, .. } = &mut *state;
        device.on_motion_command(regs.header, regs.params[0]);
        device.on_config(regs.control_word, regs.index_out, regs.value_out);
        regs.status_word = device.status_word();
        regs.index_in = device.index_in();
        regs.value_in = device.value_in();
    }

    /// Preload a curve into device memory.
    ///
    /// # Errors
    /// Descriptor errors of `curve`.
    pub fn store_curve(&self, curve: &PositionTimeCurve) -> Result<(), DescriptorError> {
        let descriptor = curve.curve_info()?;
        self.shared.lock().device.insert_curve(StoredCurve {
            descriptor,
            setpoints: curve.curve.setpoint_ticks(),
        });
        Ok(())
    }

    pub fn curve(&self, curve_id: u16) -> Option<StoredCurve> {
        self.shared.lock().device.curve(curve_id).cloned()
    }

    pub fn curve_ids(&self) -> Vec<u16> {
        self.shared.lock().device.curve_ids()
    }

    /// Stop (or resume) answering control words.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.shared.lock().device.set_unresponsive(unresponsive);
    }

    /// Answer the next control word with an error code.
    pub fn inject_error(&self, code: u8) {
        self.shared.lock().device.inject_error(code);
    }

    /// Fail the next `count` register reads.
    pub fn fail_next_reads(&self, count: u32) {
        self.shared.lock().failing_reads = count;
    }

    /// Fail the next `count` register writes.
    pub fn fail_next_writes(&self, count: u32) {
        self.shared.lock().failing_writes = count;
    }

    /// Status word currently latched for the host.
    pub fn status_word(&self) -> i32 {
        self.shared.lock().regs.status_word
    }

    /// Control word last written by the host.
    pub fn control_word(&self) -> i32 {
        self.shared.lock().regs.control_word
    }

    /// Control words answered by the device.
    pub fn answered(&self) -> u64 {
        self.shared.lock().device.answered()
    }
}

struct SimPort {
    shared: Arc<Mutex<SimState>>,
    reg: Reg,
}

impl RegisterRead for SimPort {
    fn read(&mut self) -> Result<i32, RegisterError> {
        let mut state = self.shared.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(RegisterError::ReadFailed(self.reg.name()));
        }
        Ok(state.regs.get(self.reg))
    }
}

impl RegisterWrite for SimPort {
    fn write(&mut self, value: i32) -> Result<(), RegisterError> {
        let mut state = self.shared.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(RegisterError::WriteFailed(self.reg.name()));
        }
        state.regs.set(self.reg, value);
        Ok(())
    }
}
