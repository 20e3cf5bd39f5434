//! Prelude module for common re-exports.
//!
//! ```rust
//! use lm_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    BusConfig, ConfigError, ConfigLoader, LmConfig, LogLevel, SharedConfig, TransferConfig,
};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{
    DEFAULT_CYCLE_TIME_US, LM_MAX_CURVE_TIME, POSITION_SCALE, X_LENGTH_SCALE,
};

// ─── Curves ─────────────────────────────────────────────────────────
pub use crate::curve::{
    Curve, CurveDescriptor, CurveName, DescriptorError, ObjectType, PositionTimeCurve,
    position_to_ticks, ticks_to_position,
};

// ─── Device ─────────────────────────────────────────────────────────
pub use crate::device::{
    ConfigModulePorts, DeviceChannel, MotionCommandPorts, RegisterError, RegisterRead,
    RegisterWrite,
};

// ─── Status ─────────────────────────────────────────────────────────
pub use crate::status::{
    AxisScaling, BuildResult, BuildState, MemoryStatusSink, StatusError, StatusSink,
};

/// Default bus cycle time as Duration.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_micros(DEFAULT_CYCLE_TIME_US as u64);
