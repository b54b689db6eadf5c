//! PLC client error types.

use opcua::types::StatusCode;
use thiserror::Error;

/// Errors from the PLC client.
#[derive(Debug, Clone, Error)]
pub enum PlcError {
    /// Initial connect to the OPC UA endpoint failed.
    #[error("OPC UA connect failed: {0}")]
    Connect(String),

    /// Operation attempted without an initialized session.
    #[error("not connected to the PLC")]
    NotConnected,

    /// The session was closed by the server; all primitives fail until the
    /// client is re-initialized.
    #[error("PLC connection lost")]
    ConnectionLost,

    /// A tag held a different type than its contract says.
    #[error("type mismatch on {op}: got {got}")]
    TypeMismatch {
        /// Operation name.
        op: &'static str,
        /// Variant actually read.
        got: String,
    },

    /// The server answered with a bad status code.
    #[error("OPC UA {op} failed: {status:?}")]
    Bad {
        /// Failing status code.
        status: StatusCode,
        /// Operation name.
        op: &'static str,
    },

    /// A readiness or I/O wait exceeded its budget.
    #[error("PLC {what} timed out")]
    Timeout {
        /// What was being waited for.
        what: &'static str,
    },
}

impl PlcError {
    /// Stable kind tag for observer-facing error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PlcError::Connect(_) => "opc-connect",
            PlcError::NotConnected => "opc-not-connected",
            PlcError::ConnectionLost => "connection-lost",
            PlcError::TypeMismatch { .. } => "opc-type-mismatch",
            PlcError::Bad { .. } => "opc-bad-status",
            PlcError::Timeout { .. } => "opc-timeout",
        }
    }
}
