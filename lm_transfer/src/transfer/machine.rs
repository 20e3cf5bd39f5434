//! Curve transfer state machine.
//!
//! One [`TransferMachine::step`] per bus cycle:
//! `Init → SendCommand → CurveInfo → Setpoints → Finished`, or `Failed`.
//!
//! The machine performs no I/O. It consumes the status word and value word
//! sampled for the cycle and returns the register writes and side requests
//! the engine must apply before the next cycle.
//!
//! ## Status handling
//! While a response is pending every step counts toward the timeout. A
//! status equal to `next_mode_status` advances the phase and takes priority
//! over `expected_status`, which keeps the phase. A status whose low byte
//! matches `expected_status` with a non-zero high byte is a device error.
//! Anything else is ignored for this cycle.
//!
//! ## Control word
//! `Init` sends a fixed word. Other phases send
//! `((base + ord - 1) << 8) | ((ord - 1) << 1) | toggle` with base `0x50` for
//! writes and `0x60` for reads.

use heapless::Vec as BoundedVec;
use tracing::{debug, trace, warn};

use lm_common::consts::{
    CONFIG_CURVE_READ, CONFIG_CURVE_WRITE, CONFIG_INIT, DESCRIPTOR_WORDS,
    STATUS_CURVE_INFO_ADVANCE, STATUS_CURVE_INFO_STEADY, STATUS_INIT, STATUS_SEND_COMMAND,
    STATUS_SETPOINTS_ADVANCE, STATUS_SETPOINTS_STEADY,
};
use lm_common::curve::{CurveDescriptor, DescriptorError, PositionTimeCurve};

use super::buffer::{DescriptorBuffer, WordCursor};
use super::error::TransferError;

/// Upper bound of effects produced by one step (delete + index + value + control).
pub const MAX_EFFECTS: usize = 4;

// ─── Types ──────────────────────────────────────────────────────────

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host → device (build profile).
    Write,
    /// Device → host (read profile).
    Read,
}

impl Direction {
    /// Session base mode placed in the control word high byte.
    #[inline]
    pub const fn base_mode(self) -> i32 {
        match self {
            Self::Write => CONFIG_CURVE_WRITE,
            Self::Read => CONFIG_CURVE_READ,
        }
    }
}

/// Handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Init = 0,
    SendCommand = 1,
    CurveInfo = 2,
    Setpoints = 3,
    Finished = 4,
    Failed = 5,
}

impl Phase {
    #[inline]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Phase reached by counting up from `Init`. `Failed` is never reached this way.
    pub const fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Init),
            1 => Some(Self::SendCommand),
            2 => Some(Self::CurveInfo),
            3 => Some(Self::Setpoints),
            4 => Some(Self::Finished),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Register values sampled for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleInput {
    pub status_word: i32,
    pub value_in: i32,
}

/// Output requested by one step, applied in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Delete the curve through the motion command interface.
    DeleteCurve { curve_id: u16 },
    WriteIndex(i32),
    WriteValue(i32),
    WriteControl(i32),
    /// The send cursor was exhausted; nothing was written to `value_out`.
    CursorUnderflow,
}

/// Ordered effects of one step.
pub type Effects = BoundedVec<Effect, MAX_EFFECTS>;

/// What a step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Status not acceptable yet; nothing changed except the timeout count.
    Skipped,
    /// Step accepted; effects must be applied.
    Continue,
    Finished,
    Failed(TransferError),
}

/// Result of [`TransferMachine::step`].
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub outcome: StepOutcome,
    /// Phase changed during this step.
    pub phase_changed: bool,
    pub effects: Effects,
}

impl StepOutput {
    fn new(outcome: StepOutcome) -> Self {
        Self {
            outcome,
            phase_changed: false,
            effects: Effects::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum Receive {
    Off,
    Descriptor(DescriptorBuffer),
    Setpoints { capacity: usize },
}

/// Control word for `phase` in a session of `direction`.
pub const fn control_word(direction: Direction, phase: Phase, toggle: i32) -> i32 {
    match phase {
        Phase::Init => CONFIG_INIT,
        _ => {
            let ord = phase.ordinal() as i32;
            ((direction.base_mode() + ord - 1) << 8) | ((ord - 1) << 1) | toggle
        }
    }
}

/// Device error code carried by `status`, if any.
#[inline]
pub const fn device_error_code(status: i32, expected: i32) -> Option<u8> {
    let code = ((status >> 8) & 0xFF) as u8;
    if (status & 0xFF) == (expected & 0xFF) && code != 0 {
        Some(code)
    } else {
        None
    }
}

// ─── Machine ────────────────────────────────────────────────────────

/// Per-transfer handshake state.
#[derive(Debug, Clone)]
pub struct TransferMachine {
    direction: Direction,
    phase: Phase,
    curve_id: u16,
    curve: PositionTimeCurve,
    descriptor: Option<CurveDescriptor>,
    toggle: i32,
    expected_status: i32,
    next_mode_status: i32,
    control_word: i32,
    waiting: bool,
    timeout_counter: u32,
    timeout_cycles: u32,
    receive: Receive,
    cursor: WordCursor,
    underflows: u32,
    failure: Option<TransferError>,
}

impl TransferMachine {
    /// Start a write session for `curve`.
    ///
    /// # Errors
    /// Descriptor errors of the curve (name, duration, setpoint count).
    pub fn write(curve: PositionTimeCurve, timeout_cycles: u32) -> Result<Self, DescriptorError> {
        let descriptor = curve.curve_info()?;
        Ok(Self::new(
            Direction::Write,
            curve.curve_id(),
            curve,
            Some(descriptor),
            timeout_cycles,
        ))
    }

    /// Start a read session for `curve_id`; the curve starts out empty.
    pub fn read(curve_id: u16, timeout_cycles: u32) -> Self {
        let mut curve = PositionTimeCurve::default();
        curve.curve.curve_id = curve_id;
        Self::new(Direction::Read, curve_id, curve, None, timeout_cycles)
    }

    fn new(
        direction: Direction,
        curve_id: u16,
        curve: PositionTimeCurve,
        descriptor: Option<CurveDescriptor>,
        timeout_cycles: u32,
    ) -> Self {
        Self {
            direction,
            phase: Phase::Init,
            curve_id,
            curve,
            descriptor,
            toggle: 0,
            expected_status: -1,
            next_mode_status: -1,
            control_word: 0,
            waiting: false,
            timeout_counter: 0,
            timeout_cycles,
            receive: Receive::Off,
            cursor: WordCursor::default(),
            underflows: 0,
            failure: None,
        }
    }

    // ── Accessors ──

    #[inline]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub const fn curve_id(&self) -> u16 {
        self.curve_id
    }

    #[inline]
    pub fn curve(&self) -> &PositionTimeCurve {
        &self.curve
    }

    /// Take the curve (for reads: the received curve).
    pub fn into_curve(self) -> PositionTimeCurve {
        self.curve
    }

    /// Descriptor sent (writes) or received (reads, once decoded).
    #[inline]
    pub fn descriptor(&self) -> Option<&CurveDescriptor> {
        self.descriptor.as_ref()
    }

    #[inline]
    pub const fn toggle(&self) -> i32 {
        self.toggle
    }

    #[inline]
    pub const fn expected_status(&self) -> i32 {
        self.expected_status
    }

    #[inline]
    pub const fn next_mode_status(&self) -> i32 {
        self.next_mode_status
    }

    /// Last control word emitted.
    #[inline]
    pub const fn last_control_word(&self) -> i32 {
        self.control_word
    }

    #[inline]
    pub const fn is_waiting(&self) -> bool {
        self.waiting
    }

    #[inline]
    pub const fn timeout_counter(&self) -> u32 {
        self.timeout_counter
    }

    /// Number of send-cursor underflows so far.
    #[inline]
    pub const fn underflows(&self) -> u32 {
        self.underflows
    }

    #[inline]
    pub fn failure(&self) -> Option<&TransferError> {
        self.failure.as_ref()
    }

    // ── Step ──

    /// Run one protocol step against the values sampled this cycle.
    pub fn step(&mut self, input: CycleInput) -> StepOutput {
        match self.phase {
            Phase::Finished => return StepOutput::new(StepOutcome::Finished),
            Phase::Failed => {
                let err = self.failure.clone().unwrap_or(TransferError::UnknownState);
                return StepOutput::new(StepOutcome::Failed(err));
            }
            _ => {}
        }

        let mut changed = false;
        if self.waiting {
            self.timeout_counter += 1;
            if self.timeout_counter > self.timeout_cycles {
                return self.fail(TransferError::Timeout {
                    cycles: self.timeout_cycles,
                });
            }

            let status = input.status_word;
            if status == self.next_mode_status {
                match Phase::from_ordinal(self.phase.ordinal() + 1) {
                    Some(next) => {
                        debug!(
                            "Curve {}: {:?} -> {:?} (status 0x{:x})",
                            self.curve_id, self.phase, next, status
                        );
                        self.phase = next;
                        changed = true;
                    }
                    None => return self.fail(TransferError::UnknownState),
                }
            } else if status == self.expected_status {
                trace!("Curve {}: status 0x{:x} acknowledged", self.curve_id, status);
            } else if let Some(code) = device_error_code(status, self.expected_status) {
                return self.fail(TransferError::DeviceError { code });
            } else {
                trace!(
                    "Curve {}: waiting, status 0x{:x} (expected 0x{:x}/0x{:x})",
                    self.curve_id, status, self.expected_status, self.next_mode_status
                );
                return StepOutput::new(StepOutcome::Skipped);
            }
        }

        if let Err(err) = self.receive_word(input.value_in) {
            return self.fail(err);
        }

        let mut out = StepOutput::new(StepOutcome::Continue);
        out.phase_changed = changed;

        match self.phase {
            Phase::Init => self.enter_init(&mut out.effects),
            Phase::SendCommand => self.enter_send_command(&mut out.effects),
            Phase::CurveInfo => self.enter_curve_info(changed),
            Phase::Setpoints => {
                if let Err(err) = self.enter_setpoints(changed) {
                    return self.fail(err);
                }
            }
            Phase::Finished => {
                if let Err(err) = self.finish() {
                    return self.fail(err);
                }
                out.outcome = StepOutcome::Finished;
                return out;
            }
            Phase::Failed => return self.fail(TransferError::UnknownState),
        }

        if self.direction == Direction::Write
            && matches!(self.phase, Phase::CurveInfo | Phase::Setpoints)
        {
            match self.cursor.next_word() {
                Some(word) => emit(&mut out.effects, Effect::WriteValue(word)),
                None => {
                    self.underflows += 1;
                    emit(&mut out.effects, Effect::CursorUnderflow);
                }
            }
        }

        self.control_word = control_word(self.direction, self.phase, self.toggle);
        emit(&mut out.effects, Effect::WriteControl(self.control_word));

        self.waiting = true;
        self.timeout_counter = 0;
        out
    }

    fn receive_word(&mut self, value: i32) -> Result<(), TransferError> {
        match &mut self.receive {
            Receive::Off => Ok(()),
            Receive::Descriptor(buf) => buf.push(value).map_err(|_| {
                TransferError::ProtocolViolation(format!(
                    "descriptor overflow: more than {} words received",
                    DESCRIPTOR_WORDS
                ))
            }),
            Receive::Setpoints { capacity } => {
                if self.curve.len() >= *capacity {
                    return Err(TransferError::ProtocolViolation(format!(
                        "setpoint overflow: more than {} setpoints received",
                        capacity
                    )));
                }
                self.curve.push_ticks(value);
                Ok(())
            }
        }
    }

    fn enter_init(&mut self, effects: &mut Effects) {
        self.expected_status = STATUS_INIT;
        self.next_mode_status = STATUS_INIT;
        if self.direction == Direction::Write {
            emit(
                effects,
                Effect::DeleteCurve {
                    curve_id: self.curve_id,
                },
            );
        }
        emit(effects, Effect::WriteIndex(0));
        emit(effects, Effect::WriteValue(0));
    }

    fn enter_send_command(&mut self, effects: &mut Effects) {
        self.expected_status = STATUS_SEND_COMMAND;
        self.next_mode_status = STATUS_SEND_COMMAND;
        emit(effects, Effect::WriteIndex(self.curve_id as i32));
        let block = match (self.direction, &self.descriptor) {
            (Direction::Write, Some(ci)) => ci.packed_block_size() as i32,
            _ => 0,
        };
        emit(effects, Effect::WriteValue(block));
        self.toggle = 1;
    }

    fn enter_curve_info(&mut self, changed: bool) {
        if changed {
            match self.direction {
                Direction::Write => {
                    let words = self.descriptor.map(|ci| ci.to_words().to_vec());
                    self.cursor = WordCursor::new(words.unwrap_or_default());
                }
                Direction::Read => self.receive = Receive::Descriptor(DescriptorBuffer::new()),
            }
        }
        self.toggle = 1 - self.toggle;
        self.expected_status = STATUS_CURVE_INFO_STEADY + self.toggle;
        self.next_mode_status = STATUS_CURVE_INFO_ADVANCE + self.toggle;
    }

    fn enter_setpoints(&mut self, changed: bool) -> Result<(), TransferError> {
        if changed {
            self.toggle = 0;
            match self.direction {
                Direction::Write => {
                    self.cursor = WordCursor::new(self.curve.curve.setpoint_ticks());
                }
                Direction::Read => {
                    let ci = self.take_received_descriptor()?;
                    self.curve.apply_curve_info(&ci);
                    self.curve.curve.setpoints.clear();
                    debug!("Received curve info:\n{}", ci.dump());
                    self.receive = Receive::Setpoints {
                        capacity: ci.num_setpoints as usize,
                    };
                    self.descriptor = Some(ci);
                }
            }
        } else {
            self.toggle = 1 - self.toggle;
        }
        self.expected_status = STATUS_SETPOINTS_STEADY + self.toggle;
        self.next_mode_status = STATUS_SETPOINTS_ADVANCE + self.toggle;
        Ok(())
    }

    fn take_received_descriptor(&mut self) -> Result<CurveDescriptor, TransferError> {
        let Receive::Descriptor(buf) = std::mem::replace(&mut self.receive, Receive::Off) else {
            return Err(TransferError::ProtocolViolation(
                "curve info phase ended without a receive buffer".to_string(),
            ));
        };
        buf.descriptor().ok_or_else(|| {
            TransferError::ProtocolViolation(format!(
                "incomplete descriptor: {} of {} words",
                buf.len(),
                DESCRIPTOR_WORDS
            ))
        })
    }

    fn finish(&mut self) -> Result<(), TransferError> {
        self.waiting = false;
        let receive = std::mem::replace(&mut self.receive, Receive::Off);
        if let Receive::Setpoints { capacity } = receive {
            if self.curve.len() != capacity {
                return Err(TransferError::ProtocolViolation(format!(
                    "received {} of {} setpoints",
                    self.curve.len(),
                    capacity
                )));
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: TransferError) -> StepOutput {
        self.phase = Phase::Failed;
        self.waiting = false;
        self.receive = Receive::Off;
        self.failure = Some(err.clone());
        let mut out = StepOutput::new(StepOutcome::Failed(err));
        out.phase_changed = true;
        out
    }
}

fn emit(effects: &mut Effects, effect: Effect) {
    if effects.push(effect).is_err() {
        warn!("Effect capacity exceeded, dropped {:?}", effect);
    }
}
