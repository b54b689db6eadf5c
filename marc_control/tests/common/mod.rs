//! Shared fixtures for the scheduler integration tests: a scripted PLC
//! double, a traced driver factory, slice/style file synthesis and
//! channel-receive helpers.

#![allow(dead_code)]

use marc_common::config::MachineConfig;
use marc_common::events::EventBus;
use marc_common::tags::OpcSnapshot;
use marc_control::DriverFactory;
use marc_plc::{PlcError, PlcPort};
use marc_scanner::{SimGalvo, SimTraceHandle};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::sync::broadcast;

// ─── Config ─────────────────────────────────────────────────────────

/// Machine config tuned for fast tests: tiny settle gap, quick polling.
pub fn fast_config() -> MachineConfig {
    let mut config = MachineConfig::default();
    config.scanner.settle_delay_ms = 5;
    config.scanner.completion_timeout_ms = 5_000;
    config.process.polling_interval_ms = 20;
    config
}

// ─── Scripted PLC double ────────────────────────────────────────────

/// One recorded PLC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `write_layer_parameters(layers, delta_source, delta_sink)`.
    LayerParameters(i32, i32, i32),
    /// `write_layer_execution_complete(layer)`.
    ExecutionComplete(u32),
    /// `write_emergency_stop()`.
    EmergencyStop,
}

/// Scripted PLC: prepares a layer a fixed delay after each parameter
/// write, and can drop the connection after a configured number of
/// successful parameter writes.
pub struct MockPlc {
    events: EventBus,
    prep_delay: Duration,
    surface_done: Arc<AtomicBool>,
    lost: AtomicBool,
    lost_announced: AtomicBool,
    drop_after_layer_writes: Option<u32>,
    layer_writes: AtomicU32,
    fail_next_write_bad: AtomicBool,
    calls: Mutex<Vec<MockCall>>,
}

impl MockPlc {
    pub fn new(events: EventBus, prep_delay: Duration) -> Self {
        Self {
            events,
            prep_delay,
            surface_done: Arc::new(AtomicBool::new(false)),
            lost: AtomicBool::new(false),
            lost_announced: AtomicBool::new(false),
            drop_after_layer_writes: None,
            layer_writes: AtomicU32::new(0),
            fail_next_write_bad: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Drop the connection once this many layer-parameter writes have
    /// succeeded.
    pub fn drop_connection_after(mut self, layer_writes: u32) -> Self {
        self.drop_after_layer_writes = Some(layer_writes);
        self
    }

    /// Fail the next layer-parameter write with a plain bad status
    /// (degraded mode, not a connection loss).
    pub fn fail_next_write(self) -> Self {
        self.fail_next_write_bad.store(true, Ordering::SeqCst);
        self
    }

    /// Recorded calls so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn lost_error(&self) -> PlcError {
        if !self.lost_announced.swap(true, Ordering::SeqCst) {
            self.events.connection_lost();
        }
        PlcError::ConnectionLost
    }
}

impl PlcPort for MockPlc {
    fn connect(&self) -> Result<(), PlcError> {
        Ok(())
    }

    fn wait_until_ready(&self, _timeout: Duration) -> Result<(), PlcError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.lost.load(Ordering::SeqCst)
    }

    fn write_layer_parameters(
        &self,
        layers: i32,
        delta_source: i32,
        delta_sink: i32,
    ) -> Result<(), PlcError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(self.lost_error());
        }
        if self.fail_next_write_bad.swap(false, Ordering::SeqCst) {
            return Err(PlcError::Timeout { what: "write" });
        }

        self.record(MockCall::LayerParameters(layers, delta_source, delta_sink));
        let writes = self.layer_writes.fetch_add(1, Ordering::SeqCst) + 1;

        if self.drop_after_layer_writes == Some(writes) {
            // This write went through; everything after it fails.
            self.lost.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let surface_done = Arc::clone(&self.surface_done);
        let prep_delay = self.prep_delay;
        std::thread::spawn(move || {
            std::thread::sleep(prep_delay);
            surface_done.store(true, Ordering::SeqCst);
        });
        Ok(())
    }

    fn write_layer_execution_complete(&self, layer_number: u32) -> Result<(), PlcError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(self.lost_error());
        }
        self.record(MockCall::ExecutionComplete(layer_number));
        self.surface_done.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn write_emergency_stop(&self) -> Result<(), PlcError> {
        // Recorded whatever the connection state, like the real client.
        self.record(MockCall::EmergencyStop);
        Ok(())
    }

    fn read_snapshot(&self) -> Result<OpcSnapshot, PlcError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(self.lost_error());
        }
        Ok(OpcSnapshot {
            powder_surface_done: self.surface_done.load(Ordering::SeqCst) as i32,
            ..OpcSnapshot::default()
        })
    }
}

// ─── Traced driver factory ──────────────────────────────────────────

/// All trace handles a [`traced_driver_factory`] has handed out.
pub type TraceSink = Arc<Mutex<Vec<SimTraceHandle>>>;

/// Driver factory that keeps a trace handle for every driver it hands
/// out, so tests can inspect the exact device call sequence afterwards.
pub fn traced_driver_factory() -> (DriverFactory, TraceSink) {
    let traces: TraceSink = Arc::default();
    let sink = Arc::clone(&traces);
    let factory: DriverFactory = Box::new(move || {
        let (sim, trace) = SimGalvo::new();
        sink.lock().unwrap().push(trace);
        Box::new(sim)
    });
    (factory, traces)
}

// ─── Slice / style file synthesis ───────────────────────────────────

/// One synthetic layer: `(number, height_mm, hatch_lines)` where each line
/// is `(ax, ay, bx, by)` in mm, tagged with `type_id`.
pub struct LayerSpec {
    pub number: u32,
    pub height_mm: f32,
    pub type_id: u32,
    pub lines: Vec<(f32, f32, f32, f32)>,
}

/// Write a slice file holding the given hatch-only layers.
pub fn write_slice_file(layers: &[LayerSpec]) -> NamedTempFile {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"MARC");
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&(layers.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&0u64.to_le_bytes());
    bytes.extend_from_slice(&0u64.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 32]);
    bytes.resize(marc_slice::HEADER_LEN, 0);

    for layer in layers {
        bytes.extend_from_slice(&layer.number.to_le_bytes());
        bytes.extend_from_slice(&layer.height_mm.to_le_bytes());

        bytes.extend_from_slice(&1u32.to_le_bytes()); // one hatch
        bytes.extend_from_slice(&layer.type_id.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes()); // category: hatch
        bytes.extend_from_slice(&((layer.lines.len() * 2) as u32).to_le_bytes());
        for &(ax, ay, bx, by) in &layer.lines {
            for v in [ax, ay, bx, by] {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }

        bytes.extend_from_slice(&0u32.to_le_bytes()); // polylines
        bytes.extend_from_slice(&0u32.to_le_bytes()); // polygons
    }

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();
    file
}

/// Write a parameter library with the given `(id, power, mark, jump)`
/// styles.
pub fn write_styles_json(styles: &[(u32, f64, f64, f64)]) -> NamedTempFile {
    let entries: Vec<serde_json::Value> = styles
        .iter()
        .map(|&(id, power, mark, jump)| {
            serde_json::json!({
                "id": id,
                "name": format!("style-{id}"),
                "description": "test style",
                "laserId": 1,
                "laserMode": 1,
                "laserPower": power,
                "laserFocus": 0.0,
                "laserSpeed": mark,
                "jumpSpeed": jump,
                "hatchSpacing": 0.1,
                "layerThickness": 0.03,
                "pointDistance": 0.05,
                "pointDelay": 1,
                "pointExposureTime": 100,
                "jumpDelay": 1.0
            })
        })
        .collect();
    let document = serde_json::json!({ "buildStyles": entries });

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(document.to_string().as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

// ─── Channel helpers ────────────────────────────────────────────────

/// Receive from a broadcast channel with a deadline.
pub fn recv_timeout<T: Clone>(
    rx: &mut broadcast::Receiver<T>,
    timeout: Duration,
) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        match rx.try_recv() {
            Ok(value) => return Some(value),
            Err(broadcast::error::TryRecvError::Empty) => {
                if Instant::now() >= deadline {
                    return None;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(broadcast::error::TryRecvError::Closed) => return None,
        }
    }
}

/// Drain everything currently buffered in a channel.
pub fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut values = Vec::new();
    while let Ok(value) = rx.try_recv() {
        values.push(value);
    }
    values
}

/// Poll until the controller reports the expected state. The `finished`
/// event precedes the worker threads' final exit by a moment, so state
/// assertions after a run must allow for that.
pub fn wait_for_state(
    controller: &marc_control::ProcessController,
    expected: marc_common::state::ProcessState,
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;
    loop {
        let state = controller.current_state();
        if state == expected {
            return;
        }
        if Instant::now() >= deadline {
            panic!("state stayed {state} (expected {expected})");
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
