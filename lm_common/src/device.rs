//! Device register ports.
//!
//! This module defines:
//! - `RegisterRead` / `RegisterWrite` traits - one 32-bit register each
//! - `RegisterError` enum - transport failures (always transient)
//! - `ConfigModulePorts` - the configuration-module word pairs used by curve transfer
//! - `MotionCommandPorts` - the motion command interface (header + 5 parameters)
//! - `DeviceChannel` - the single device channel of one controller
//!
//! Every register is sampled/updated once per bus cycle by the transport.
//! A failed read or write never aborts a transfer: the caller retries on the
//! next cycle.

use thiserror::Error;
use tracing::debug;

use crate::consts::{CMD_SET_CURVE_ADDR, COMMAND_COUNT_MODULUS, DELETE_CURVE_MARKER};

/// Transport error on a single register access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// Register could not be read this cycle.
    #[error("read of register '{0}' failed")]
    ReadFailed(&'static str),

    /// Register could not be written this cycle.
    #[error("write of register '{0}' failed")]
    WriteFailed(&'static str),

    /// Transport not connected.
    #[error("transport disconnected: {0}")]
    Disconnected(String),
}

/// Readable 32-bit device register.
pub trait RegisterRead: Send {
    /// Read the value latched for the current cycle.
    fn read(&mut self) -> Result<i32, RegisterError>;
}

/// Writable 32-bit device register.
pub trait RegisterWrite: Send {
    /// Write the value sent on the next cycle.
    fn write(&mut self, value: i32) -> Result<(), RegisterError>;
}

/// Configuration-module registers used by curve transfer.
///
/// `index_in` is part of the module but unused by the transfer protocol.
pub struct ConfigModulePorts {
    /// Phase acknowledgement / error code from the device.
    pub status_word: Box<dyn RegisterRead>,
    /// Index echoed by the device.
    pub index_in: Box<dyn RegisterRead>,
    /// Data word from the device.
    pub value_in: Box<dyn RegisterRead>,
    /// Phase request to the device.
    pub control_word: Box<dyn RegisterWrite>,
    /// Index (curve id) to the device.
    pub index_out: Box<dyn RegisterWrite>,
    /// Data word to the device.
    pub value_out: Box<dyn RegisterWrite>,
}

/// Motion command interface: header word plus five parameters.
///
/// The low nibble of the header carries a command counter that must change
/// for the device to accept a new command.
pub struct MotionCommandPorts {
    /// Command header register.
    pub header: Box<dyn RegisterWrite>,
    /// Parameter registers 1..=5.
    pub params: [Box<dyn RegisterWrite>; 5],
    command_count: u8,
}

impl MotionCommandPorts {
    /// Bundle the header and parameter registers.
    pub fn new(header: Box<dyn RegisterWrite>, params: [Box<dyn RegisterWrite>; 5]) -> Self {
        Self {
            header,
            params,
            command_count: 0,
        }
    }

    /// Current command counter (0..16).
    #[inline]
    pub fn command_count(&self) -> u8 {
        self.command_count
    }

    /// Send a motion command: parameters first, header last.
    ///
    /// The counter advances even if a register write fails, so a retried
    /// command is seen by the device as a new one.
    pub fn send(&mut self, command: i32, params: [i32; 5]) -> Result<(), RegisterError> {
        self.command_count = (self.command_count + 1) % COMMAND_COUNT_MODULUS;
        for (port, value) in self.params.iter_mut().zip(params) {
            port.write(value)?;
        }
        self.header.write(command | self.command_count as i32)
    }

    /// Delete a curve on the device by id.
    pub fn delete_curve(&mut self, curve_id: u16) -> Result<(), RegisterError> {
        debug!("Deleting curve {}", curve_id);
        let param = (DELETE_CURVE_MARKER | curve_id as u32) as i32;
        self.send(CMD_SET_CURVE_ADDR, [param, 0, 0, 0, 0])
    }
}

/// Single-instance device channel of one controller.
///
/// Shared behind one mutex by every device access path (curve transfer,
/// motion commands, polling).
pub struct DeviceChannel {
    /// Configuration-module registers.
    pub config: ConfigModulePorts,
    /// Motion command registers.
    pub motion: MotionCommandPorts,
}
