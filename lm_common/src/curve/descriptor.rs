//! Curve descriptor codec (the 72-byte "curve info" record).
//!
//! The descriptor travels verbatim over the configuration module, 18
//! little-endian words per descriptor. Field offsets are fixed by the device:
//!
//! | Offset | Field            | Type       |
//! |--------|------------------|------------|
//! | 0      | `data_offset`    | u16        |
//! | 2      | `object_type`    | u16        |
//! | 4      | `num_setpoints`  | u16        |
//! | 6      | `data_type_size` | u16        |
//! | 8      | `name`           | [u8; 22]   |
//! | 30     | `curve_id`       | u16        |
//! | 32     | `x_length`       | u32        |
//! | 36     | `x_dim_uuid`     | u16        |
//! | 38     | `y_dim_uuid`     | u16        |
//! | 40     | `wizard_type`    | u16        |
//! | 42     | `wizard_params`  | [u32; 7]   |
//! | 70     | padding          | u16        |

use core::fmt;

use static_assertions::const_assert_eq;
use thiserror::Error;

use crate::consts::{
    BLOCK_SIZE_SHIFT, DATA_OFFSET, DATA_TYPE_SIZE, DESCRIPTOR_PADDING, DESCRIPTOR_SIZE,
    DESCRIPTOR_WORDS, LM_MAX_CURVE_TIME, MAX_SETPOINTS, NAME_LENGTH, NUM_WIZARD_PARAMS, OT_ENCODER_VS_POSITION,
    OT_POSITION_VS_TIME, UUID_POSITION, UUID_TIME, X_LENGTH_SCALE,
};

// ─── Wire Layout ────────────────────────────────────────────────────

const OFF_DATA_OFFSET: usize = 0;
const OFF_OBJECT_TYPE: usize = 2;
const OFF_NUM_SETPOINTS: usize = 4;
const OFF_DATA_TYPE_SIZE: usize = 6;
const OFF_NAME: usize = 8;
const OFF_CURVE_ID: usize = 30;
const OFF_X_LENGTH: usize = 32;
const OFF_X_DIM_UUID: usize = 36;
const OFF_Y_DIM_UUID: usize = 38;
const OFF_WIZARD_TYPE: usize = 40;
const OFF_WIZARD_PARAMS: usize = 42;
const OFF_PADDING: usize = 70;

const_assert_eq!(OFF_DATA_OFFSET, 0);
const_assert_eq!(OFF_NAME + NAME_LENGTH, OFF_CURVE_ID);
const_assert_eq!(OFF_WIZARD_PARAMS + 6 * 4, 66);
const_assert_eq!(OFF_WIZARD_PARAMS + NUM_WIZARD_PARAMS * 4, OFF_PADDING);
const_assert_eq!(OFF_PADDING + DESCRIPTOR_PADDING, DESCRIPTOR_SIZE);
const_assert_eq!(DESCRIPTOR_SIZE, 72);

// ─── Errors ─────────────────────────────────────────────────────────

/// Errors raised while building or decoding a descriptor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescriptorError {
    /// Name does not fit the 22-byte field with its terminator.
    #[error("curve name is {len} bytes, at most {max} allowed", max = NAME_LENGTH - 1)]
    NameTooLong {
        /// Length of the rejected name in bytes.
        len: usize,
    },

    /// Curve duration outside `(0, LM_MAX_CURVE_TIME)`.
    #[error("curve duration {seconds}s outside (0, {max})", max = LM_MAX_CURVE_TIME)]
    InvalidDuration {
        /// Rejected duration in seconds.
        seconds: f64,
    },

    /// More setpoints than the packed block size can announce.
    #[error("{count} setpoints exceed the limit of {max}", max = MAX_SETPOINTS)]
    TooManySetpoints {
        /// Number of setpoints in the rejected curve.
        count: usize,
    },

    /// Raw record is not exactly 72 bytes.
    #[error("curve descriptor must be {size} bytes, got {len}", size = DESCRIPTOR_SIZE)]
    InvalidLength {
        /// Length of the rejected record.
        len: usize,
    },
}

// ─── Typed Views ────────────────────────────────────────────────────

/// Curve object type stored in the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ObjectType {
    /// Position setpoints over uniform time steps.
    PositionVsTime = OT_POSITION_VS_TIME,
    /// Position setpoints over encoder counts.
    EncoderVsPosition = OT_ENCODER_VS_POSITION,
}

impl TryFrom<u16> for ObjectType {
    type Error = u16;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        match raw {
            OT_POSITION_VS_TIME => Ok(Self::PositionVsTime),
            OT_ENCODER_VS_POSITION => Ok(Self::EncoderVsPosition),
            other => Err(other),
        }
    }
}

// ─── Descriptor ─────────────────────────────────────────────────────

/// Fixed-layout curve descriptor ("curve info").
///
/// Decoding performs no content validation: callers must check
/// `num_setpoints` and `x_length` before trusting derived values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveDescriptor {
    /// Length of the descriptor without padding (always 70 when built here).
    pub data_offset: u16,
    /// Raw object type, see [`ObjectType`].
    pub object_type: u16,
    /// Number of setpoints following the descriptor.
    pub num_setpoints: u16,
    /// Size of one setpoint in bytes.
    pub data_type_size: u16,
    /// Raw name bytes, NUL-padded, not necessarily terminated.
    pub name: [u8; NAME_LENGTH],
    /// Curve id on the device.
    pub curve_id: u16,
    /// Total duration in 10 µs units.
    pub x_length: u32,
    /// X axis dimension tag.
    pub x_dim_uuid: u16,
    /// Y axis dimension tag.
    pub y_dim_uuid: u16,
    /// Curve wizard used to create the curve (0 = none).
    pub wizard_type: u16,
    /// Wizard parameters.
    pub wizard_params: [u32; NUM_WIZARD_PARAMS],
    /// Trailing padding, kept so decoded records re-encode byte-exact.
    pub padding: u16,
}

impl Default for CurveDescriptor {
    fn default() -> Self {
        Self {
            data_offset: DATA_OFFSET,
            object_type: 0,
            num_setpoints: 0,
            data_type_size: DATA_TYPE_SIZE,
            name: [0; NAME_LENGTH],
            curve_id: 0,
            x_length: 0,
            x_dim_uuid: 0,
            y_dim_uuid: 0,
            wizard_type: 0,
            wizard_params: [0; NUM_WIZARD_PARAMS],
            padding: 0,
        }
    }
}

impl CurveDescriptor {
    /// Build the descriptor of a position-vs-time curve.
    ///
    /// # Errors
    /// - `InvalidDuration` if `seconds <= 0` or `seconds >= LM_MAX_CURVE_TIME`
    /// - `NameTooLong` if `name` is 22 bytes or longer
    pub fn new_position_time(
        seconds: f64,
        num_setpoints: u16,
        name: &str,
        curve_id: u16,
    ) -> Result<Self, DescriptorError> {
        // Written so that NaN is rejected as well.
        if !(seconds > 0.0 && seconds < LM_MAX_CURVE_TIME) {
            return Err(DescriptorError::InvalidDuration { seconds });
        }

        let mut ci = Self {
            object_type: OT_POSITION_VS_TIME,
            num_setpoints,
            curve_id,
            x_length: (seconds * X_LENGTH_SCALE) as u32,
            x_dim_uuid: UUID_TIME,
            y_dim_uuid: UUID_POSITION,
            ..Self::default()
        };
        ci.set_name(name)?;
        Ok(ci)
    }

    /// Store `name` in the raw name field, NUL-padded.
    ///
    /// Leaves the field untouched and fails if `name` is 22 bytes or longer.
    pub fn set_name(&mut self, name: &str) -> Result<(), DescriptorError> {
        let bytes = name.as_bytes();
        if bytes.len() >= NAME_LENGTH {
            return Err(DescriptorError::NameTooLong { len: bytes.len() });
        }
        self.name = [0; NAME_LENGTH];
        self.name[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Name up to the first NUL (or all 22 bytes), lossily decoded.
    pub fn name_str(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LENGTH);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Typed object type, `Err(raw)` for unknown codes.
    #[inline]
    pub fn kind(&self) -> Result<ObjectType, u16> {
        ObjectType::try_from(self.object_type)
    }

    /// Sample count and payload length packed for the device block-size field.
    #[inline]
    pub const fn packed_block_size(&self) -> u32 {
        ((self.num_setpoints as u32) << BLOCK_SIZE_SHIFT)
            | (DESCRIPTOR_SIZE - DESCRIPTOR_PADDING) as u32
    }

    /// Duration in seconds derived from `x_length`.
    #[inline]
    pub fn total_seconds(&self) -> f64 {
        self.x_length as f64 / X_LENGTH_SCALE
    }

    /// Serialise to the 72-byte little-endian wire record.
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        put_u16(&mut buf, OFF_DATA_OFFSET, self.data_offset);
        put_u16(&mut buf, OFF_OBJECT_TYPE, self.object_type);
        put_u16(&mut buf, OFF_NUM_SETPOINTS, self.num_setpoints);
        put_u16(&mut buf, OFF_DATA_TYPE_SIZE, self.data_type_size);
        buf[OFF_NAME..OFF_NAME + NAME_LENGTH].copy_from_slice(&self.name);
        put_u16(&mut buf, OFF_CURVE_ID, self.curve_id);
        put_u32(&mut buf, OFF_X_LENGTH, self.x_length);
        put_u16(&mut buf, OFF_X_DIM_UUID, self.x_dim_uuid);
        put_u16(&mut buf, OFF_Y_DIM_UUID, self.y_dim_uuid);
        put_u16(&mut buf, OFF_WIZARD_TYPE, self.wizard_type);
        for (i, param) in self.wizard_params.iter().enumerate() {
            put_u32(&mut buf, OFF_WIZARD_PARAMS + i * 4, *param);
        }
        put_u16(&mut buf, OFF_PADDING, self.padding);
        buf
    }

    /// Reinterpret a 72-byte wire record. No content validation.
    pub fn from_bytes(buf: &[u8; DESCRIPTOR_SIZE]) -> Self {
        let mut name = [0u8; NAME_LENGTH];
        name.copy_from_slice(&buf[OFF_NAME..OFF_NAME + NAME_LENGTH]);

        let mut wizard_params = [0u32; NUM_WIZARD_PARAMS];
        for (i, param) in wizard_params.iter_mut().enumerate() {
            *param = get_u32(buf, OFF_WIZARD_PARAMS + i * 4);
        }

        Self {
            data_offset: get_u16(buf, OFF_DATA_OFFSET),
            object_type: get_u16(buf, OFF_OBJECT_TYPE),
            num_setpoints: get_u16(buf, OFF_NUM_SETPOINTS),
            data_type_size: get_u16(buf, OFF_DATA_TYPE_SIZE),
            name,
            curve_id: get_u16(buf, OFF_CURVE_ID),
            x_length: get_u32(buf, OFF_X_LENGTH),
            x_dim_uuid: get_u16(buf, OFF_X_DIM_UUID),
            y_dim_uuid: get_u16(buf, OFF_Y_DIM_UUID),
            wizard_type: get_u16(buf, OFF_WIZARD_TYPE),
            wizard_params,
            padding: get_u16(buf, OFF_PADDING),
        }
    }

    /// Decode from a byte slice that must be exactly 72 bytes long.
    pub fn from_slice(buf: &[u8]) -> Result<Self, DescriptorError> {
        let record: &[u8; DESCRIPTOR_SIZE] = buf
            .try_into()
            .map_err(|_| DescriptorError::InvalidLength { len: buf.len() })?;
        Ok(Self::from_bytes(record))
    }

    /// Serialise to the 18 register words sent over the value register.
    pub fn to_words(&self) -> [i32; DESCRIPTOR_WORDS] {
        let bytes = self.to_bytes();
        let mut words = [0i32; DESCRIPTOR_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words
    }

    /// Reassemble a descriptor from 18 received register words.
    pub fn from_words(words: &[i32; DESCRIPTOR_WORDS]) -> Self {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Self::from_bytes(&bytes)
    }

    /// Multi-line diagnostic rendering of every field.
    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CurveDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--------------------")?;
        writeln!(f, "data_offset:      {}", self.data_offset)?;
        writeln!(f, "object_type:      {}", self.object_type)?;
        writeln!(f, "num_setpoints:    {}", self.num_setpoints)?;
        writeln!(f, "data_type_size:   {}", self.data_type_size)?;
        writeln!(f, "name:             {}", self.name_str())?;
        writeln!(f, "name_raw:         b\"{}\"", self.name.escape_ascii())?;
        writeln!(f, "curve_id:         {}", self.curve_id)?;
        writeln!(f, "x_length:         {}", self.x_length)?;
        writeln!(f, "x_dim_uuid:       0x{:x}", self.x_dim_uuid)?;
        writeln!(f, "y_dim_uuid:       0x{:x}", self.y_dim_uuid)?;
        writeln!(f, "wizard_type:      {}", self.wizard_type)?;
        for (i, param) in self.wizard_params.iter().enumerate() {
            writeln!(f, "wizard_params[{i}]: {param}")?;
        }
        writeln!(f, "padding:          0x{:04x}", self.padding)
    }
}

#[inline]
fn put_u16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn put_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

// ─── Tests ──────────────────────────────────────────────────────────
