//! # MARC Control Library
//!
//! The build coordinator: streams slice layers through a bounded queue into
//! the scanner while keeping a strict per-layer handshake with the machine
//! PLC.
//!
//! # Task Topology
//!
//! ```text
//! Producer ──► bounded queue ──► Consumer ──► Scanner (thread-owned)
//!    ▲              │                │
//!    └─ layer-requested          PLC writes (layer parameters / complete)
//!                                    │
//! Poller ── read_snapshot ──► plc-layer-ready signal (rising edge)
//! ```
//!
//! # Module Structure
//!
//! - [`sync`] - The shared queue/flag/condvar core all tasks block on
//! - [`producer`] - Slice-file producer and the synthetic test producer
//! - [`consumer`] - The per-layer execution loop
//! - [`poller`] - PLC snapshot polling and ready-edge detection
//! - [`controller`] - The control surface (start/stop/pause/emergency)
//! - [`error`] - Run-level error type

#![deny(missing_docs)]

pub mod consumer;
pub mod controller;
pub mod error;
pub mod poller;
pub mod producer;
pub mod sync;

pub use controller::{DriverFactory, ProcessController};
pub use error::ControlError;
pub use sync::{PopResult, RunCounters, SyncCore};
