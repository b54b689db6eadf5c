//! # MARC PLC Simulator
//!
//! A standalone OPC UA server that mirrors the machine PLC's tag space and
//! timing so the control core can run end-to-end without hardware.
//!
//! The behavior engine runs as a deadline-driven tick (≈20 Hz) instead of
//! sleeping inside the server loop, so the server keeps answering reads
//! while a layer is being "prepared"; the done-flags still flip after the
//! same delays the PLC program exhibits.

#![deny(missing_docs)]

mod behavior;
mod server;

pub use behavior::SimTiming;
pub use server::{spawn, SimConfig, SimError, SimHandle};
