//! Device side of the configuration-module curve handshake.
//!
//! Answers each new control word once with a status word (and, for reads,
//! a data word), stores written curves by id and serves them back.

use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

use lm_common::consts::{
    BLOCK_SIZE_SHIFT, CMD_SET_CURVE_ADDR, CONFIG_CURVE_READ, CONFIG_CURVE_WRITE, CONFIG_INIT,
    DELETE_CURVE_MARKER, DESCRIPTOR_WORDS, STATUS_CURVE_INFO_ADVANCE, STATUS_CURVE_INFO_STEADY,
    STATUS_INIT, STATUS_SEND_COMMAND, STATUS_SETPOINTS_ADVANCE, STATUS_SETPOINTS_STEADY,
};
use lm_common::curve::{CurveDescriptor, PositionTimeCurve};

/// Error codes reported by the simulated module.
pub mod error_code {
    /// Write requested for an id that is already stored.
    pub const CURVE_EXISTS: u8 = 0xD1;
    /// Read requested for an id that is not stored.
    pub const CURVE_NOT_FOUND: u8 = 0xD2;
    /// Descriptor count differs from the announced block size.
    pub const BLOCK_MISMATCH: u8 = 0xD3;
    /// Phase request without a matching session.
    pub const SEQUENCE: u8 = 0xD4;
}

/// Curve as held in device memory.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCurve {
    pub descriptor: CurveDescriptor,
    /// Setpoints in device ticks.
    pub setpoints: Vec<i32>,
}

impl StoredCurve {
    /// Rebuild the host-side model.
    pub fn to_curve(&self) -> PositionTimeCurve {
        let mut curve = PositionTimeCurve::default();
        curve.apply_curve_info(&self.descriptor);
        for &ticks in &self.setpoints {
            curve.push_ticks(ticks);
        }
        curve
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Write,
    Read,
}

#[derive(Debug)]
struct Session {
    mode: Mode,
    curve_id: u16,
    announced: usize,
    words: Vec<i32>,
    setpoints: Vec<i32>,
    pos: usize,
}

/// Configuration-module emulation.
#[derive(Debug, Default)]
pub struct SimulatedDevice {
    curves: BTreeMap<u16, StoredCurve>,
    session: Option<Session>,
    last_control: Option<i32>,
    last_header: Option<i32>,
    status_word: i32,
    value_in: i32,
    index_in: i32,
    pending_error: Option<u8>,
    unresponsive: bool,
    answered: u64,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn status_word(&self) -> i32 {
        self.status_word
    }

    #[inline]
    pub fn value_in(&self) -> i32 {
        self.value_in
    }

    #[inline]
    pub fn index_in(&self) -> i32 {
        self.index_in
    }

    /// Number of control words answered so far.
    #[inline]
    pub fn answered(&self) -> u64 {
        self.answered
    }

    pub fn curve(&self, curve_id: u16) -> Option<&StoredCurve> {
        self.curves.get(&curve_id)
    }

    pub fn curve_ids(&self) -> Vec<u16> {
        self.curves.keys().copied().collect()
    }

    pub fn insert_curve(&mut self, curve: StoredCurve) {
        self.curves.insert(curve.descriptor.curve_id, curve);
    }

    pub fn set_unresponsive(&mut self, unresponsive: bool) {
        self.unresponsive = unresponsive;
    }

    /// Answer the next control word with `code` in the status high byte.
    pub fn inject_error(&mut self, code: u8) {
        self.pending_error = Some(code);
    }

    /// Motion command interface: only the delete-curve request is understood.
    pub fn on_motion_command(&mut self, header: i32, param1: i32) {
        if self.unresponsive || self.last_header == Some(header) {
            return;
        }
        self.last_header = Some(header);

        if header & !0x0F == CMD_SET_CURVE_ADDR {
            let param = param1 as u32;
            if param & 0xFFFF_0000 == DELETE_CURVE_MARKER {
                let curve_id = (param & 0xFFFF) as u16;
                if self.curves.remove(&curve_id).is_some() {
                    debug!("Sim: deleted curve {}", curve_id);
                }
            }
        }
    }

    /// Configuration module: process the words written by the host.
    pub fn on_config(&mut self, control: i32, index_out: i32, value_out: i32) {
        // 0 is the power-on value of the register: no request yet.
        if self.unresponsive || control == 0 || self.last_control == Some(control) {
            return;
        }
        self.last_control = Some(control);
        self.answered += 1;

        if control == CONFIG_INIT {
            self.session = None;
            self.reply(STATUS_INIT);
            return;
        }

        let low = control & 0xFF;
        let toggle = low & 1;
        let ord = (low >> 1) + 1;
        let base = ((control >> 8) & 0xFF) - (ord - 1);
        let mode = match base {
            CONFIG_CURVE_WRITE => Mode::Write,
            CONFIG_CURVE_READ => Mode::Read,
            _ => {
                warn!("Sim: unsupported control word 0x{:x}", control);
                return;
            }
        };

        match ord {
            1 => self.send_command(mode, index_out, value_out),
            2 => self.curve_info(mode, toggle, value_out),
            3 => self.setpoints(mode, toggle, value_out),
            _ => warn!("Sim: unsupported phase in control word 0x{:x}", control),
        }
    }

    fn reply(&mut self, status: i32) {
        self.status_word = match self.pending_error.take() {
            Some(code) => ((code as i32) << 8) | (status & 0xFF),
            None => status,
        };
        trace!("Sim: status 0x{:x}", self.status_word);
    }

    fn reject(&mut self, code: u8, status: i32) {
        warn!("Sim: rejecting request with code 0x{:02x}", code);
        self.session = None;
        self.status_word = ((code as i32) << 8) | (status & 0xFF);
    }

    fn send_command(&mut self, mode: Mode, index_out: i32, value_out: i32) {
        let curve_id = index_out as u16;
        self.index_in = index_out;
        let session = match mode {
            Mode::Write => {
                if self.curves.contains_key(&curve_id) {
                    return self.reject(error_code::CURVE_EXISTS, STATUS_SEND_COMMAND);
                }
                Session {
                    mode,
                    curve_id,
                    announced: ((value_out as u32) >> BLOCK_SIZE_SHIFT) as usize,
                    words: Vec::with_capacity(DESCRIPTOR_WORDS),
                    setpoints: Vec::new(),
                    pos: 0,
                }
            }
            Mode::Read => {
                let Some(stored) = self.curves.get(&curve_id) else {
                    return self.reject(error_code::CURVE_NOT_FOUND, STATUS_SEND_COMMAND);
                };
                Session {
                    mode,
                    curve_id,
                    announced: stored.setpoints.len(),
                    words: stored.descriptor.to_words().to_vec(),
                    setpoints: stored.setpoints.clone(),
                    pos: 0,
                }
            }
        };
        debug!("Sim: {:?} session for curve {}", mode, curve_id);
        self.session = Some(session);
        self.reply(STATUS_SEND_COMMAND);
    }

    fn curve_info(&mut self, mode: Mode, toggle: i32, value_out: i32) {
        let steady = STATUS_CURVE_INFO_STEADY + toggle;
        let Some(session) = self.session.as_mut().filter(|s| s.mode == mode) else {
            return self.reject(error_code::SEQUENCE, steady);
        };

        let done = match mode {
            Mode::Write => {
                session.words.push(value_out);
                session.words.len() >= DESCRIPTOR_WORDS
            }
            Mode::Read => {
                self.value_in = session.words.get(session.pos).copied().unwrap_or(0);
                session.pos += 1;
                session.pos >= DESCRIPTOR_WORDS
            }
        };

        if !done {
            return self.reply(steady);
        }
        if mode == Mode::Write {
            let mut words = [0i32; DESCRIPTOR_WORDS];
            words.copy_from_slice(&session.words[..DESCRIPTOR_WORDS]);
            let ci = CurveDescriptor::from_words(&words);
            if ci.num_setpoints as usize != session.announced {
                return self.reject(error_code::BLOCK_MISMATCH, steady);
            }
        }
        session.pos = 0;
        self.reply(STATUS_CURVE_INFO_ADVANCE + toggle);
    }

    fn setpoints(&mut self, mode: Mode, toggle: i32, value_out: i32) {
        let steady = STATUS_SETPOINTS_STEADY + toggle;
        let Some(session) = self.session.as_mut().filter(|s| s.mode == mode) else {
            return self.reject(error_code::SEQUENCE, steady);
        };

        let done = match mode {
            Mode::Write => {
                session.setpoints.push(value_out);
                session.setpoints.len() >= session.announced
            }
            Mode::Read => {
                self.value_in = session.setpoints.get(session.pos).copied().unwrap_or(0);
                session.pos += 1;
                session.pos >= session.announced
            }
        };

        if !done {
            return self.reply(steady);
        }
        if let Some(session) = self.session.take() {
            if session.mode == Mode::Write {
                let mut words = [0i32; DESCRIPTOR_WORDS];
                words.copy_from_slice(&session.words[..DESCRIPTOR_WORDS]);
                let descriptor = CurveDescriptor::from_words(&words);
                debug!(
                    "Sim: stored curve {} ({} setpoints)",
                    session.curve_id,
                    session.setpoints.len()
                );
                self.curves.insert(
                    session.curve_id,
                    StoredCurve {
                        descriptor,
                        setpoints: session.setpoints,
                    },
                );
            }
        }
        self.reply(STATUS_SETPOINTS_ADVANCE + toggle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(curve_id: u16, points: &[i32]) -> StoredCurve {
        StoredCurve {
            descriptor: CurveDescriptor::new_position_time(
                points.len() as f64 * 0.01,
                points.len() as u16,
                "sim",
                curve_id,
            )
            .unwrap(),
            setpoints: points.to_vec(),
        }
    }

    #[test]
    fn init_is_answered_once() {
        let mut dev = SimulatedDevice::new();
        dev.on_config(CONFIG_INIT, 0, 0);
        assert_eq!(dev.status_word(), STATUS_INIT);
        dev.on_config(CONFIG_INIT, 0, 0);
        assert_eq!(dev.answered(), 1);
    }

    #[test]
    fn read_of_missing_curve_reports_error() {
        let mut dev = SimulatedDevice::new();
        dev.on_config(CONFIG_INIT, 0, 0);
        dev.on_config(0x6001, 9, 0);
        assert_eq!(
            dev.status_word(),
            ((error_code::CURVE_NOT_FOUND as i32) << 8) | STATUS_SEND_COMMAND
        );
    }

    #[test]
    fn read_session_serves_descriptor_then_setpoints() {
        let mut dev = SimulatedDevice::new();
        let curve = stored(3, &[10, 20]);
        let words = curve.descriptor.to_words();
        dev.insert_curve(curve);

        dev.on_config(CONFIG_INIT, 0, 0);
        dev.on_config(0x6001, 3, 0);
        assert_eq!(dev.status_word(), STATUS_SEND_COMMAND);

        let mut toggle = 0;
        for (i, word) in words.iter().enumerate() {
            dev.on_config(0x6102 | toggle, 0, 0);
            assert_eq!(dev.value_in(), *word);
            let expected = if i + 1 == words.len() { 0x002 } else { 0x402 };
            assert_eq!(dev.status_word(), expected + toggle);
            toggle ^= 1;
        }

        dev.on_config(0x6204, 0, 0);
        assert_eq!((dev.status_word(), dev.value_in()), (0x404, 10));
        dev.on_config(0x6205, 0, 0);
        assert_eq!((dev.status_word(), dev.value_in()), (0x005, 20));
    }

    #[test]
    fn delete_request_removes_curve_once_per_header() {
        let mut dev = SimulatedDevice::new();
        dev.insert_curve(stored(4, &[1]));
        dev.on_motion_command(0x0501, (DELETE_CURVE_MARKER | 4) as i32);
        assert!(dev.curve(4).is_none());

        dev.insert_curve(stored(4, &[1]));
        dev.on_motion_command(0x0501, (DELETE_CURVE_MARKER | 4) as i32);
        assert!(dev.curve(4).is_some());
    }

    #[test]
    fn injected_error_keeps_phase_low_byte() {
        let mut dev = SimulatedDevice::new();
        dev.inject_error(0x21);
        dev.on_config(CONFIG_INIT, 0, 0);
        assert_eq!(dev.status_word(), 0x210F);
        dev.on_config(0x5001, 1, 0);
        assert_eq!(dev.status_word(), STATUS_SEND_COMMAND);
    }

    #[test]
    fn unresponsive_device_keeps_status() {
        let mut dev = SimulatedDevice::new();
        dev.set_unresponsive(true);
        dev.on_config(CONFIG_INIT, 0, 0);
        assert_eq!(dev.status_word(), 0);
        assert_eq!(dev.answered(), 0);
    }

    #[test]
    fn stored_curve_converts_back_to_model() {
        let curve = stored(6, &[12345, -5000]).to_curve();
        assert_eq!(curve.curve_id(), 6);
        assert_eq!(curve.curve.setpoints, vec![1.2345, -0.5]);
        assert!((curve.dt - 0.01).abs() < 1e-9);
    }
}
