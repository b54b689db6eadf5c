//! The scheduler-facing PLC surface.
//!
//! The scheduler only needs the per-layer handshake and the snapshot read;
//! putting a trait at that seam lets tests script the PLC side without a
//! server, the same way the scanner hides vendor hardware behind its driver
//! trait.

use crate::client::PlcClient;
use crate::error::PlcError;
use marc_common::tags::OpcSnapshot;
use std::time::Duration;

/// The subset of PLC operations the scheduler consumes.
pub trait PlcPort: Send + Sync {
    /// Establish the session (idempotent while healthy).
    fn connect(&self) -> Result<(), PlcError>;

    /// Block until the PLC answers reads, or time out.
    fn wait_until_ready(&self, timeout: Duration) -> Result<(), PlcError>;

    /// Whether a healthy session exists.
    fn is_connected(&self) -> bool;

    /// Request preparation of the next layer.
    fn write_layer_parameters(
        &self,
        layers: i32,
        delta_source: i32,
        delta_sink: i32,
    ) -> Result<(), PlcError>;

    /// Tell the PLC the optics finished a layer.
    fn write_layer_execution_complete(&self, layer_number: u32) -> Result<(), PlcError>;

    /// Emergency stop, best effort, always logged.
    fn write_emergency_stop(&self) -> Result<(), PlcError>;

    /// Read the eight data tags.
    fn read_snapshot(&self) -> Result<OpcSnapshot, PlcError>;
}

impl PlcPort for PlcClient {
    fn connect(&self) -> Result<(), PlcError> {
        PlcClient::initialize(self)
    }

    fn wait_until_ready(&self, timeout: Duration) -> Result<(), PlcError> {
        PlcClient::wait_until_ready(self, timeout)
    }

    fn is_connected(&self) -> bool {
        PlcClient::is_connected(self)
    }

    fn write_layer_parameters(
        &self,
        layers: i32,
        delta_source: i32,
        delta_sink: i32,
    ) -> Result<(), PlcError> {
        PlcClient::write_layer_parameters(self, layers, delta_source, delta_sink)
    }

    fn write_layer_execution_complete(&self, layer_number: u32) -> Result<(), PlcError> {
        PlcClient::write_layer_execution_complete(self, layer_number)
    }

    fn write_emergency_stop(&self) -> Result<(), PlcError> {
        PlcClient::write_emergency_stop(self)
    }

    fn read_snapshot(&self) -> Result<OpcSnapshot, PlcError> {
        PlcClient::read_snapshot(self)
    }
}
