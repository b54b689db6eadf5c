//! Run-level error type.
//!
//! Aggregates the per-subsystem errors into the single type the scheduler
//! propagates and reports. Every variant maps to a stable kind tag so
//! observers can switch on failures without parsing text.

use marc_common::config::ConfigError;
use marc_common::events::ErrorReport;
use marc_plc::PlcError;
use marc_scanner::ScannerError;
use marc_slice::builder::BuildError;
use marc_slice::reader::SliceError;
use marc_slice::style::StyleError;
use thiserror::Error;

/// Errors surfaced by the coordinator.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Slice file decode failure.
    #[error(transparent)]
    Slice(#[from] SliceError),

    /// Parameter library failure.
    #[error(transparent)]
    Style(#[from] StyleError),

    /// Layer → command block conversion failure.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Scanner/device failure.
    #[error(transparent)]
    Scanner(#[from] ScannerError),

    /// PLC failure.
    #[error(transparent)]
    Plc(#[from] PlcError),

    /// Machine configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Lifecycle transition refused.
    #[error("transition refused: {0}")]
    InvalidTransition(&'static str),

    /// Caller-supplied argument out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A readiness wait exceeded its budget.
    #[error("timed out waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: &'static str,
    },

    /// Stop or emergency arrived during a wait.
    #[error("operation cancelled")]
    Cancelled,

    /// Precondition violation inside the coordinator.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Stable machine-readable kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::Slice(e) => match e {
                SliceError::InvalidFormat(_) => "invalid-format",
                SliceError::UnexpectedEof => "unexpected-eof",
                SliceError::LayerCorrupt { .. } => "layer-corrupt",
                SliceError::Io(_) => "slice-io",
            },
            ControlError::Style(_) => "config-invalid",
            ControlError::Build(_) => "conversion-failed",
            ControlError::Scanner(e) => match e {
                ScannerError::DeviceReject { .. } => "device-reject",
                ScannerError::DeviceFault { .. } => "device-fault",
                ScannerError::DeviceTimeout { .. } => "device-timeout",
                ScannerError::ThreadOwnership { .. } => "thread-ownership",
                ScannerError::NotInitialized
                | ScannerError::Library(_)
                | ScannerError::Internal(_) => "internal",
            },
            ControlError::Plc(e) => e.kind(),
            ControlError::Config(_) => "config-invalid",
            ControlError::InvalidTransition(_) => "invalid-transition",
            ControlError::InvalidArgument(_) => "invalid-argument",
            ControlError::Timeout { .. } => "timeout",
            ControlError::Cancelled => "cancelled",
            ControlError::Internal(_) => "internal",
        }
    }

    /// Build the observer-facing report for this error.
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.kind(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_error_taxonomy() {
        assert_eq!(
            ControlError::from(SliceError::UnexpectedEof).kind(),
            "unexpected-eof"
        );
        assert_eq!(
            ControlError::from(ScannerError::DeviceReject { op: "mark", code: 3 }).kind(),
            "device-reject"
        );
        assert_eq!(ControlError::from(PlcError::ConnectionLost).kind(), "connection-lost");
        assert_eq!(ControlError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn report_carries_kind_and_text() {
        let report = ControlError::Timeout { what: "plc readiness" }.report();
        assert_eq!(report.kind, "timeout");
        assert!(report.text.contains("plc readiness"));
    }
}
