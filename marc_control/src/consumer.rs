//! The consumer task: per-layer handshake and command execution.
//!
//! Owns the scanner for the whole run (created, initialized, used and shut
//! down on this thread). For every block: ask the PLC to prepare the layer,
//! wait for the ready edge, stream the commands in batches bounded by the
//! card's list memory, execute, disable the laser, report completion back
//! to the PLC, then pull the next layer.

use crate::error::ControlError;
use crate::sync::{PopResult, RunCounters, SyncCore};
use marc_common::config::{LayerStacksPolicy, ScannerSettings};
use marc_common::events::EventBus;
use marc_plc::{PlcError, PlcPort};
use marc_scanner::{GalvoDriver, Scanner};
use marc_slice::{Command, RtcCommandBlock};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Everything the consumer task needs.
pub struct ConsumerContext {
    /// Scheduler sync core.
    pub sync: Arc<SyncCore>,
    /// Observation channels.
    pub events: EventBus,
    /// Run counters.
    pub counters: Arc<RunCounters>,
    /// PLC port; `None` runs without machine synchronization (test mode).
    pub plc: Option<Arc<dyn PlcPort>>,
    /// Scanner card settings.
    pub settings: ScannerSettings,
    /// `Lay_Stacks` write policy.
    pub stacks_policy: LayerStacksPolicy,
}

/// Why the command streaming of one block ended early.
enum LayerOutcome {
    /// All commands queued and executed.
    Completed,
    /// Stop/emergency arrived mid-layer.
    Cancelled,
}

/// Run the consumer loop. The driver is turned into a scanner on this
/// thread so the ownership check binds to the consumer.
pub fn run_consumer(ctx: ConsumerContext, driver: Box<dyn GalvoDriver>) {
    let mut scanner = Scanner::new(driver);

    if let Err(e) = startup(&mut scanner, &ctx) {
        ctx.events.error(e.report());
        ctx.sync.request_stop();
        shutdown(&mut scanner, &ctx);
        ctx.events.finished();
        return;
    }

    ctx.events.status("consumer ready: awaiting layers");

    // Prime the producer: the consumer drives the pull protocol.
    ctx.sync.signal_layer_requested();

    loop {
        let block = match ctx.sync.pop_block() {
            PopResult::Stopped => break,
            PopResult::Drained => break,
            PopResult::Block(block) => block,
        };

        match execute_block(&mut scanner, &ctx, &block) {
            Ok(LayerOutcome::Cancelled) => break,
            Ok(LayerOutcome::Completed) => {}
            Err(e) => {
                ctx.events.error(e.report());
                // Clear latched card errors so the shutdown path can still
                // drive the laser-off and close calls.
                if let Err(reset) = scanner.reset_error() {
                    tracing::debug!("card error reset failed: {reset}");
                }
                ctx.sync.request_stop();
                break;
            }
        }

        let consumed = ctx
            .counters
            .layers_consumed
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        ctx.events.layer_executed(block.layer_number);
        ctx.events.progress(consumed, ctx.counters.total());

        if let Some(plc) = &ctx.plc {
            // Best effort: a failure here is logged, the run continues.
            if let Err(e) = plc.write_layer_execution_complete(block.layer_number) {
                tracing::warn!(
                    "layer {} completion not delivered to PLC: {e}",
                    block.layer_number
                );
            }
        }

        if !ctx.sync.producer_finished() {
            ctx.sync.signal_layer_requested();
        }
    }

    shutdown(&mut scanner, &ctx);
    // The run is over; release the producer and poller whatever path led
    // here, then tell observers.
    ctx.sync.request_stop();
    ctx.events.finished();
}

fn startup(scanner: &mut Scanner, ctx: &ConsumerContext) -> Result<(), ControlError> {
    scanner.acquire()?;
    scanner.initialize(ctx.settings.clone())?;
    Ok(())
}

fn shutdown(scanner: &mut Scanner, ctx: &ConsumerContext) {
    if scanner.is_initialized() {
        // Laser dark on every exit path; emergency included.
        if let Err(e) = scanner.disable_laser() {
            tracing::warn!("laser disable during shutdown failed: {e}");
        }
        if ctx.sync.emergency() {
            ctx.events.status("emergency: laser disabled");
        }
        if let Err(e) = scanner.shutdown() {
            tracing::warn!("scanner shutdown failed: {e}");
        }
    }
    if let Err(e) = scanner.release() {
        tracing::warn!("driver library release failed: {e}");
    }
    ctx.events.status("scanner shutdown complete");
}

/// The per-layer handshake and command streaming.
fn execute_block(
    scanner: &mut Scanner,
    ctx: &ConsumerContext,
    block: &RtcCommandBlock,
) -> Result<LayerOutcome, ControlError> {
    let layer = block.layer_number;

    if let Some(plc) = &ctx.plc {
        if !request_layer_preparation(plc.as_ref(), ctx, block)? {
            return Ok(LayerOutcome::Cancelled);
        }
    }

    if ctx.sync.stop_requested() {
        return Ok(LayerOutcome::Cancelled);
    }

    scanner.prepare_list_for_layer()?;

    let batch_limit = ctx
        .settings
        .list_memory
        .saturating_sub(ctx.settings.safety_margin);
    let completion_timeout = Duration::from_millis(ctx.settings.completion_timeout_ms);
    let mut current_segment: Option<usize> = None;

    for (index, command) in block.commands.iter().enumerate() {
        if ctx.sync.stop_requested() {
            return Ok(LayerOutcome::Cancelled);
        }

        // Flush a full batch before it overruns the card's list memory.
        if scanner.current_list_level()? >= batch_limit {
            ctx.events.status(format!(
                "layer {layer}: list near capacity, executing batch at command {index}"
            ));
            scanner.execute_list()?;
            if !scanner.wait_for_completion(completion_timeout)? {
                return Err(ControlError::Scanner(
                    marc_scanner::ScannerError::DeviceTimeout { op: "batch" },
                ));
            }
            scanner.prepare_list_for_layer()?;
        }

        if let Some(segment) = block.segment_covering(index) {
            if current_segment != Some(segment.start_cmd) {
                scanner.apply_segment_parameters(
                    segment.laser_power_w,
                    segment.mark_speed_mm_s,
                    segment.jump_speed_mm_s,
                )?;
                current_segment = Some(segment.start_cmd);
                tracing::debug!(
                    "layer {layer}: buildStyle {} applied at command {index}",
                    segment.build_style_id
                );
            }
        }

        match *command {
            Command::Jump { x, y } => scanner.jump(x, y)?,
            Command::Mark { x, y } => scanner.mark(x, y)?,
            Command::Delay { ms } => scanner.delay(ms)?,
        }
    }

    if ctx.sync.stop_requested() {
        return Ok(LayerOutcome::Cancelled);
    }

    // The card's processor needs a settle gap between the last queued
    // command and list execution.
    std::thread::sleep(Duration::from_millis(ctx.settings.settle_delay_ms));

    scanner.execute_list()?;
    if !scanner.wait_for_completion(completion_timeout)? {
        return Err(ControlError::Scanner(
            marc_scanner::ScannerError::DeviceTimeout { op: "execute_list" },
        ));
    }
    scanner.disable_laser()?;
    ctx.events
        .status(format!("layer {layer}: execution complete, laser off"));

    Ok(LayerOutcome::Completed)
}

/// Ask the PLC for the next powder layer and wait for the ready edge.
///
/// A plain write failure degrades to executing without machine sync for
/// this layer; a lost connection is fatal for the run.
fn request_layer_preparation(
    plc: &dyn PlcPort,
    ctx: &ConsumerContext,
    block: &RtcCommandBlock,
) -> Result<bool, ControlError> {
    let layer = block.layer_number;
    let delta_um = (f64::from(block.layer_thickness_mm) * 1000.0).round() as i32;
    let stacks = match ctx.stacks_policy {
        LayerStacksPolicy::One => 1,
        LayerStacksPolicy::LayerNumber => block.layer_number as i32,
    };

    ctx.events
        .status(format!("layer {layer}: requesting PLC layer preparation"));

    match plc.write_layer_parameters(stacks, delta_um, delta_um) {
        Ok(()) => {}
        Err(PlcError::ConnectionLost) => return Err(PlcError::ConnectionLost.into()),
        Err(e) => {
            // Degraded mode: the layer still executes; the completion write
            // will fail and be logged as well.
            tracing::warn!("layer {layer}: PLC layer setup failed ({e}), continuing");
            return Ok(true);
        }
    }

    ctx.events
        .status(format!("layer {layer}: waiting for recoater/platform"));
    if !ctx.sync.wait_plc_ready() {
        return Ok(false);
    }
    ctx.events
        .status(format!("layer {layer}: surface ready, starting scan"));
    Ok(true)
}
