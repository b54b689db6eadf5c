//! Prelude module for common re-exports.
//!
//! Consumers can do `use marc_common::prelude::*;` and get the most
//! important types without listing individual paths.

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, LayerStacksPolicy, MachineConfig, PlcSettings, ProcessSettings,
    ScannerSettings,
};

// ─── Lifecycle ──────────────────────────────────────────────────────
pub use crate::state::{ProcessEvent, ProcessState, ProcessStateMachine, TransitionResult};

// ─── Observation ────────────────────────────────────────────────────
pub use crate::events::{ErrorReport, EventBus, Progress};

// ─── PLC Tags ───────────────────────────────────────────────────────
pub use crate::tags::OpcSnapshot;
