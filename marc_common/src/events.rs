//! Publish-only observation channels.
//!
//! Worker tasks never invoke subscriber code directly. Each event class has
//! its own broadcast channel; publishing succeeds whether or not anyone is
//! listening, and every subscriber gets an independent receiver. Receivers
//! work from plain threads via `blocking_recv`/`try_recv`.

use crate::state::ProcessState;
use crate::tags::OpcSnapshot;
use tokio::sync::broadcast;

/// Buffered events per channel before the oldest are dropped for a lagging
/// subscriber.
const CHANNEL_CAPACITY: usize = 256;

/// Progress report: layers executed vs. total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Layers fully executed so far.
    pub done: u32,
    /// Total layers in this run (0 if unknown).
    pub total: u32,
}

/// A failure surfaced to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Stable machine-readable error kind (e.g. `"device-reject"`).
    pub kind: String,
    /// Human-readable description.
    pub text: String,
}

impl ErrorReport {
    /// Build a report from a kind tag and message.
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
        }
    }
}

/// The set of observation channels exposed by the control surface.
///
/// Cloning the bus clones the senders; all clones publish into the same
/// channels.
#[derive(Debug, Clone)]
pub struct EventBus {
    status: broadcast::Sender<String>,
    progress: broadcast::Sender<Progress>,
    layer_executed: broadcast::Sender<u32>,
    finished: broadcast::Sender<()>,
    error: broadcast::Sender<ErrorReport>,
    opc_snapshot: broadcast::Sender<OpcSnapshot>,
    connection_lost: broadcast::Sender<()>,
    state_changed: broadcast::Sender<ProcessState>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with all channels allocated.
    pub fn new() -> Self {
        Self {
            status: broadcast::channel(CHANNEL_CAPACITY).0,
            progress: broadcast::channel(CHANNEL_CAPACITY).0,
            layer_executed: broadcast::channel(CHANNEL_CAPACITY).0,
            finished: broadcast::channel(CHANNEL_CAPACITY).0,
            error: broadcast::channel(CHANNEL_CAPACITY).0,
            opc_snapshot: broadcast::channel(CHANNEL_CAPACITY).0,
            connection_lost: broadcast::channel(CHANNEL_CAPACITY).0,
            state_changed: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    // ── Publish side ──

    /// Publish a status message.
    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        let _ = self.status.send(message);
    }

    /// Publish a progress update.
    pub fn progress(&self, done: u32, total: u32) {
        let _ = self.progress.send(Progress { done, total });
    }

    /// Publish completion of one layer.
    pub fn layer_executed(&self, layer_number: u32) {
        let _ = self.layer_executed.send(layer_number);
    }

    /// Publish end of run (always emitted exactly once per run, on every
    /// exit path).
    pub fn finished(&self) {
        let _ = self.finished.send(());
    }

    /// Publish an error report.
    pub fn error(&self, report: ErrorReport) {
        tracing::error!("{}: {}", report.kind, report.text);
        let _ = self.error.send(report);
    }

    /// Publish a PLC snapshot.
    pub fn opc_snapshot(&self, snapshot: OpcSnapshot) {
        let _ = self.opc_snapshot.send(snapshot);
    }

    /// Publish loss of the PLC connection (one-shot per loss).
    pub fn connection_lost(&self) {
        tracing::warn!("PLC connection lost");
        let _ = self.connection_lost.send(());
    }

    /// Publish a lifecycle state change.
    pub fn state_changed(&self, state: ProcessState) {
        let _ = self.state_changed.send(state);
    }

    // ── Subscribe side ──

    /// Subscribe to status messages.
    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status.subscribe()
    }

    /// Subscribe to progress updates.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Subscribe to per-layer completion events.
    pub fn subscribe_layer_executed(&self) -> broadcast::Receiver<u32> {
        self.layer_executed.subscribe()
    }

    /// Subscribe to run completion.
    pub fn subscribe_finished(&self) -> broadcast::Receiver<()> {
        self.finished.subscribe()
    }

    /// Subscribe to error reports.
    pub fn subscribe_error(&self) -> broadcast::Receiver<ErrorReport> {
        self.error.subscribe()
    }

    /// Subscribe to PLC snapshots.
    pub fn subscribe_opc_snapshot(&self) -> broadcast::Receiver<OpcSnapshot> {
        self.opc_snapshot.subscribe()
    }

    /// Subscribe to connection-lost notifications.
    pub fn subscribe_connection_lost(&self) -> broadcast::Receiver<()> {
        self.connection_lost.subscribe()
    }

    /// Subscribe to lifecycle state changes.
    pub fn subscribe_state_changed(&self) -> broadcast::Receiver<ProcessState> {
        self.state_changed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.status("no one is listening");
        bus.progress(1, 10);
        bus.finished();
    }

    #[test]
    fn each_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe_layer_executed();
        let mut b = bus.subscribe_layer_executed();

        bus.layer_executed(7);
        bus.layer_executed(8);

        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(a.try_recv().unwrap(), 8);
        assert_eq!(b.try_recv().unwrap(), 7);
        assert_eq!(b.try_recv().unwrap(), 8);
    }

    #[test]
    fn clones_publish_into_the_same_channels() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_error();

        let clone = bus.clone();
        clone.error(ErrorReport::new("device-reject", "mark failed"));

        let report = rx.try_recv().unwrap();
        assert_eq!(report.kind, "device-reject");
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.layer_executed(1);
        let mut rx = bus.subscribe_layer_executed();
        assert!(rx.try_recv().is_err());
    }
}
