//! The PLC observer/poller task.
//!
//! Periodically reads the PLC snapshot, publishes it, and turns the rising
//! edge of the surface-done flag into the `plc-layer-ready` signal the
//! consumer blocks on. A lost connection ends the run.

use crate::error::ControlError;
use crate::sync::SyncCore;
use marc_common::events::EventBus;
use marc_plc::{PlcError, PlcPort};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Granularity of the stop check while sleeping between polls.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Run the poll loop until stop is requested or the connection drops.
pub fn run_poller(
    sync: Arc<SyncCore>,
    events: EventBus,
    plc: Arc<dyn PlcPort>,
    interval_ms: Arc<AtomicU64>,
) {
    let mut previous_surface_done = false;

    while !sync.stop_requested() {
        sleep_interruptible(&sync, Duration::from_millis(interval_ms.load(Ordering::SeqCst)));
        if sync.stop_requested() {
            break;
        }
        if sync.is_paused() {
            continue;
        }

        match plc.read_snapshot() {
            Ok(snapshot) => {
                events.opc_snapshot(snapshot);

                let surface_done = snapshot.layer_prepared();
                if surface_done && !previous_surface_done {
                    tracing::debug!("layer prepared by PLC (surface-done rising edge)");
                    sync.signal_plc_ready();
                }
                previous_surface_done = surface_done;
            }
            Err(PlcError::ConnectionLost) => {
                // The client already latched and announced the loss; end the
                // run.
                events.error(ControlError::from(PlcError::ConnectionLost).report());
                sync.request_stop();
                break;
            }
            Err(e) => {
                tracing::warn!("PLC snapshot read failed: {e}");
            }
        }
    }
    tracing::debug!("poller stopped");
}

fn sleep_interruptible(sync: &SyncCore, total: Duration) {
    let mut remaining = total;
    while remaining > Duration::ZERO && !sync.stop_requested() {
        let slice = remaining.min(SLEEP_SLICE);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}
