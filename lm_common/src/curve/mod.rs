//! Curve descriptor codec and in-memory curve model.
//!
//! - [`descriptor`] - The fixed 72-byte wire record and its conversions
//! - [`model`] - Named, identified setpoint sequences in engineering units

pub mod descriptor;
pub mod model;

pub use descriptor::{CurveDescriptor, DescriptorError, ObjectType};
pub use model::{Curve, CurveName, PositionTimeCurve, position_to_ticks, ticks_to_position};
