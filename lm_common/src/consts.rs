//! System-wide constants for the curve transfer workspace.
//!
//! Single source of truth for wire sizes, scaling factors and the numeric
//! codes of the configuration-module handshake.

// ─── Scaling ────────────────────────────────────────────────────────

/// Curve duration scale: seconds → 10 µs ticks.
pub const X_LENGTH_SCALE: f64 = 1.0e5;

/// Position scale: engineering units → device ticks.
pub const POSITION_SCALE: f64 = 1.0e4;

/// Exclusive upper bound of a curve duration in seconds (`2^32 / X_LENGTH_SCALE`).
pub const LM_MAX_CURVE_TIME: f64 = 4_294_967_296.0 / X_LENGTH_SCALE;

// ─── Curve Descriptor Layout ────────────────────────────────────────

/// Size of the curve descriptor record on the wire.
pub const DESCRIPTOR_SIZE: usize = 72;

/// Number of 32-bit words carrying one descriptor.
pub const DESCRIPTOR_WORDS: usize = DESCRIPTOR_SIZE / 4;

/// Trailing padding of the descriptor (not counted by the device).
pub const DESCRIPTOR_PADDING: usize = 2;

/// Value of the `data_offset` field: descriptor length without padding.
pub const DATA_OFFSET: u16 = (DESCRIPTOR_SIZE - DESCRIPTOR_PADDING) as u16;

/// Raw length of the descriptor name field.
pub const NAME_LENGTH: usize = 22;

/// Maximum usable name length (one byte reserved for the terminator).
pub const MAX_NAME_LEN: usize = NAME_LENGTH - 1;

/// Number of wizard parameters in the descriptor.
pub const NUM_WIZARD_PARAMS: usize = 7;

/// Size of one setpoint on the wire.
pub const DATA_TYPE_SIZE: u16 = 4;

/// Bit position of the setpoint count inside the packed block size.
pub const BLOCK_SIZE_SHIFT: u32 = 18;

/// Largest setpoint count the packed block size can announce (14 bits).
pub const MAX_SETPOINTS: usize = (u32::MAX >> BLOCK_SIZE_SHIFT) as usize;

// ─── Object Types / Dimensions ──────────────────────────────────────

/// Object type: position vs. time curve.
pub const OT_POSITION_VS_TIME: u16 = 0x0003;

/// Object type: encoder vs. position curve.
pub const OT_ENCODER_VS_POSITION: u16 = 0x0103;

/// Dimension UUID: position.
pub const UUID_POSITION: u16 = 0x0005;

/// Dimension UUID: time.
pub const UUID_TIME: u16 = 0x001A;

/// Dimension UUID: encoder.
pub const UUID_ENCODER: u16 = 0x001B;

// ─── Configuration Module Handshake ─────────────────────────────────

/// Control word issued while in the init phase.
pub const CONFIG_INIT: i32 = 0x0F;

/// Base mode of curve write sessions.
pub const CONFIG_CURVE_WRITE: i32 = 0x50;

/// Base mode of curve read sessions.
pub const CONFIG_CURVE_READ: i32 = 0x60;

/// Status word acknowledging the init phase.
pub const STATUS_INIT: i32 = 0x0F;

/// Status word acknowledging the send-command phase.
pub const STATUS_SEND_COMMAND: i32 = 0x01;

/// Curve info phase: word accepted, stay in phase (plus toggle).
pub const STATUS_CURVE_INFO_STEADY: i32 = 0x402;

/// Curve info phase: last word accepted, advance (plus toggle).
pub const STATUS_CURVE_INFO_ADVANCE: i32 = 0x002;

/// Setpoints phase: word accepted, stay in phase (plus toggle).
pub const STATUS_SETPOINTS_STEADY: i32 = 0x404;

/// Setpoints phase: last word accepted, advance (plus toggle).
pub const STATUS_SETPOINTS_ADVANCE: i32 = 0x004;

// ─── Motion Command Interface ───────────────────────────────────────

/// Motion command header: set curve address (used to delete a curve).
pub const CMD_SET_CURVE_ADDR: i32 = 0x0500;

/// Parameter marker combined with a curve id to delete that curve.
pub const DELETE_CURVE_MARKER: u32 = 0xFFFF_0000;

/// Modulus of the motion command counter (low nibble of the header).
pub const COMMAND_COUNT_MODULUS: u8 = 16;

// ─── Defaults ───────────────────────────────────────────────────────

/// Default bus cycle time in microseconds (1 kHz).
pub const DEFAULT_CYCLE_TIME_US: u32 = 1000;

/// Default number of unanswered cycles tolerated before a timeout.
pub const DEFAULT_TIMEOUT_CYCLES: u32 = 1000;

/// Default highest curve id accepted by the device.
pub const DEFAULT_MAX_CURVE_ID: u16 = 100;

/// Default maximum number of projected read-back points.
pub const DEFAULT_MAX_PROFILE_POINTS: usize = 2000;
