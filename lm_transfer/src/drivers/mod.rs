//! Device channel implementations.
//!
//! - [`simulation`] - Software configuration module for development and testing
//!
//! The physical fieldbus transport lives outside this crate; it provides
//! its own `RegisterRead` / `RegisterWrite` ports and is wrapped into a
//! `DeviceChannel` the same way.

pub mod simulation;
