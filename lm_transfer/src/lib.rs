//! # LinMot Curve Transfer
//!
//! Writes position-time curves to, and reads them back from, LinMot drives
//! over the cyclic configuration-module registers.
//!
//! # Module Structure
//!
//! - [`transfer`] - Handshake state machine and per-cycle engine
//! - [`controller`] - Per-controller worker, request validation and busy guard
//! - [`cycle`] - Cycle bus, clock thread and timing statistics
//! - [`readback`] - Projection of read curves into axis units
//! - [`drivers`] - Device channel implementations (simulation)
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐ tick ┌──────────────────┐ step ┌─────────────────┐
//! │ CycleClock │─────►│ CurveController  │─────►│ TransferEngine  │
//! │ (CycleBus) │      │ (worker thread)  │      │ TransferMachine │
//! └────────────┘      └────────┬─────────┘      └────────┬────────┘
//!                              │ status                  │ registers
//!                              ▼                         ▼
//!                       ┌────────────┐          ┌─────────────────┐
//!                       │ StatusSink │          │  DeviceChannel  │
//!                       └────────────┘          └─────────────────┘
//! ```

#![deny(warnings)]

pub mod controller;
pub mod cycle;
pub mod drivers;
pub mod readback;
pub mod transfer;

pub use crate::controller::{ControllerState, CurveController};
pub use crate::cycle::{CycleBus, CycleClock};
pub use crate::transfer::{RequestError, TransferEngine, TransferError, TransferMachine};
