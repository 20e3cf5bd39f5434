//! LinMot Common Library
//!
//! This crate provides the shared, thread-free building blocks of the curve
//! transfer workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Wire constants, scaling factors and handshake codes
//! - [`curve`] - Curve descriptor codec and in-memory curve model
//! - [`device`] - Register port traits and the per-controller device channel
//! - [`status`] - Status sink published to the external parameter store
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use lm_common::prelude::*;
//!
//! let mut curve = PositionTimeCurve::new("ramp", 1, 0.01).unwrap();
//! curve.curve.setpoints.extend([0.0, 1.0, 2.0]);
//! let info = curve.curve_info().unwrap();
//! assert_eq!(info.num_setpoints, 3);
//! ```

pub mod config;
pub mod consts;
pub mod curve;
pub mod device;
pub mod prelude;
pub mod status;
