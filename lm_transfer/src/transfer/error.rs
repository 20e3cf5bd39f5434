//! Transfer and request errors.

use lm_common::curve::DescriptorError;
use lm_common::device::RegisterError;
use thiserror::Error;

/// Terminal failure of a running transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// No acceptable status word within the cycle budget.
    #[error("device did not respond within {cycles} cycles")]
    Timeout { cycles: u32 },

    /// Device reported an error code in the status word high byte.
    #[error("device reported error code 0x{code:02x}")]
    DeviceError { code: u8 },

    /// Local buffer or sequencing defect.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// State machine advanced past its last phase.
    #[error("reached unknown state")]
    UnknownState,
}

/// Request rejected before any cycle is consumed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("curve id {id} outside 1..={max}")]
    InvalidCurveId { id: u16, max: u16 },

    #[error("invalid curve name: {0}")]
    InvalidName(DescriptorError),

    #[error("invalid curve duration: {0}")]
    InvalidDuration(DescriptorError),

    #[error("invalid curve length: {0}")]
    InvalidLength(DescriptorError),

    #[error("a curve transfer is already in progress")]
    Busy,

    #[error("controller is stopped")]
    Stopped,

    #[error("device channel: {0}")]
    Transport(#[from] RegisterError),
}

impl From<DescriptorError> for RequestError {
    fn from(err: DescriptorError) -> Self {
        match err {
            DescriptorError::NameTooLong { .. } => Self::InvalidName(err),
            DescriptorError::TooManySetpoints { .. } | DescriptorError::InvalidLength { .. } => {
                Self::InvalidLength(err)
            }
            DescriptorError::InvalidDuration { .. } => Self::InvalidDuration(err),
        }
    }
}
