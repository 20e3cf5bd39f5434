//! Configuration loading traits and types.
//!
//! Every section of [`LmConfig`] has defaults, so an empty file (or no file
//! at all) yields a working configuration.
//!
//! # Usage
//!
//! ```rust,no_run
//! use lm_common::config::{ConfigError, ConfigLoader, LmConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = LmConfig::load(Path::new("config/lm_transfer.toml"))?;
//!     config.validate()?;
//!     println!("Cycle time: {} us", config.bus.cycle_time_us);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::consts::{
    DEFAULT_CYCLE_TIME_US, DEFAULT_MAX_CURVE_ID, DEFAULT_MAX_PROFILE_POINTS,
    DEFAULT_TIMEOUT_CYCLES,
};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common fields shared by every binary of the workspace.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "lm-transfer-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    "lm-transfer".to_string()
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fieldbus timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bus cycle period in microseconds.
    pub cycle_time_us: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            cycle_time_us: DEFAULT_CYCLE_TIME_US,
        }
    }
}

impl BusConfig {
    /// Cycle period as `Duration`.
    #[inline]
    pub fn cycle_time(&self) -> Duration {
        Duration::from_micros(self.cycle_time_us as u64)
    }
}

/// Curve transfer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Consecutive unanswered cycles tolerated before a transfer fails.
    pub timeout_cycles: u32,
    /// Highest curve id accepted by the device.
    pub max_curve_id: u16,
    /// Maximum number of projected read-back points.
    pub max_profile_points: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_cycles: DEFAULT_TIMEOUT_CYCLES,
            max_curve_id: DEFAULT_MAX_CURVE_ID,
            max_profile_points: DEFAULT_MAX_PROFILE_POINTS,
        }
    }
}

/// Top-level configuration of the `lm_transfer` binary.
///
/// ```toml
/// [shared]
/// service_name = "lm-transfer-01"
///
/// [bus]
/// cycle_time_us = 1000
///
/// [transfer]
/// timeout_cycles = 1000
/// max_curve_id = 100
/// max_profile_points = 2000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    pub shared: SharedConfig,
    pub bus: BusConfig,
    pub transfer: TransferConfig,
}

impl LmConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` on an empty service name or any zero
    /// cycle time, timeout, curve id limit or profile point limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.bus.cycle_time_us == 0 {
            return Err(ConfigError::ValidationError(
                "bus.cycle_time_us must be > 0".to_string(),
            ));
        }
        if self.transfer.timeout_cycles == 0 {
            return Err(ConfigError::ValidationError(
                "transfer.timeout_cycles must be > 0".to_string(),
            ));
        }
        if self.transfer.max_curve_id == 0 {
            return Err(ConfigError::ValidationError(
                "transfer.max_curve_id must be > 0".to_string(),
            ));
        }
        if self.transfer.max_profile_points == 0 {
            return Err(ConfigError::ValidationError(
                "transfer.max_profile_points must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// - `ConfigError::FileNotFound` if the file does not exist
/// - `ConfigError::ParseError` if TOML syntax is invalid or a read fails
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
