//! Curve transfer over the configuration module.
//!
//! - [`machine`] - Pure per-cycle handshake state machine
//! - [`buffer`] - Descriptor receive buffer and word send cursor
//! - [`engine`] - Applies machine steps to the device registers
//! - [`error`] - Transfer and request errors

pub mod buffer;
pub mod engine;
pub mod error;
pub mod machine;

pub use engine::{EngineSettings, EngineStatus, TransferEngine};
pub use error::{RequestError, TransferError};
pub use machine::{
    CycleInput, Direction, Effect, Phase, StepOutcome, StepOutput, TransferMachine,
};
