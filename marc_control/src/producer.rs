//! Producer tasks.
//!
//! The file producer streams layers out of a slice file one at a time,
//! converts each into a command block and pushes it onto the bounded queue.
//! Strict pull protocol: nothing is read until the consumer signals
//! `layer-requested`, so at most one block is in flight beyond the queue
//! bound.
//!
//! The test producer generates synthetic square layers with a zero-power
//! pilot parameter segment; it drives the same queue so the consumer path
//! is identical to production.

use crate::error::ControlError;
use crate::sync::{RunCounters, SyncCore};
use marc_common::events::EventBus;
use marc_slice::{
    BlockBuilder, BuildStyleLibrary, Calibration, Command, ParameterSegment, RtcCommandBlock,
    SliceReader,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Mark speed of the zero-power pilot segment [mm/s].
const PILOT_MARK_SPEED: f64 = 20.0;
/// Jump speed of the zero-power pilot segment [mm/s].
const PILOT_JUMP_SPEED: f64 = 1200.0;
/// Side length of the synthetic test square [mm].
const TEST_SQUARE_SIDE_MM: f64 = 5.0;

/// Shared context of a producer task.
pub struct ProducerContext {
    /// Scheduler sync core.
    pub sync: Arc<SyncCore>,
    /// Observation channels.
    pub events: EventBus,
    /// Run counters.
    pub counters: Arc<RunCounters>,
}

impl ProducerContext {
    fn finish(&self) {
        self.sync.set_producer_finished();
    }

    fn fail(&self, error: ControlError) {
        self.events.error(error.report());
        self.finish();
    }
}

/// Stream a slice file into the queue. Runs on its own thread until the
/// file is exhausted or stop is requested.
pub fn run_file_producer(
    ctx: ProducerContext,
    slice_path: PathBuf,
    styles: Arc<BuildStyleLibrary>,
    calibration: Calibration,
) {
    let mut reader = match SliceReader::open(&slice_path) {
        Ok(reader) => reader,
        Err(e) => {
            ctx.fail(e.into());
            return;
        }
    };

    let total = reader.total_layers();
    if total == 0 {
        ctx.fail(ControlError::Internal(
            "slice file contains no layers".to_string(),
        ));
        return;
    }
    ctx.counters.total_layers.store(total, Ordering::SeqCst);
    ctx.events
        .status(format!("streaming {total} layers from {}", slice_path.display()));

    let builder = BlockBuilder::new(calibration, &styles);
    let mut previous_height_mm = 0.0f32;

    while reader.has_next() && !ctx.sync.stop_requested() {
        if !ctx.sync.wait_layer_request() {
            break;
        }

        let mut layer = match reader.read_next() {
            Ok(layer) => layer,
            Err(e) => {
                ctx.fail(e.into());
                return;
            }
        };

        // The stream does not carry thickness; derive it from the height
        // delta so the recoat step matches the slicing pitch.
        if layer.thickness_mm == 0.0 {
            let delta = layer.height_mm - previous_height_mm;
            layer.thickness_mm = if delta > 0.0 { delta } else { layer.height_mm };
        }
        previous_height_mm = layer.height_mm;

        let block = match builder.build(&layer) {
            Ok(block) => block,
            Err(e) => {
                ctx.fail(e.into());
                return;
            }
        };

        let layer_number = block.layer_number;
        let segments = block.parameter_segments.len();
        if !ctx.sync.push_block(block) {
            break;
        }
        let produced = ctx
            .counters
            .layers_produced
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        ctx.events.status(format!(
            "layer {layer_number} enqueued ({produced}/{total}) with {segments} parameter segments"
        ));
    }

    ctx.finish();
    if !ctx.sync.stop_requested() {
        ctx.events.status("producer finished streaming all layers");
    }
}

/// Generate synthetic test layers. Same queue discipline as the file
/// producer, no slice file and no PLC coupling.
pub fn run_test_producer(
    ctx: ProducerContext,
    thickness_mm: f32,
    layer_count: u32,
    calibration: Calibration,
) {
    ctx.counters
        .total_layers
        .store(layer_count, Ordering::SeqCst);
    ctx.events.status(format!(
        "generating {layer_count} synthetic layers at {thickness_mm} mm"
    ));

    for index in 0..layer_count {
        if ctx.sync.stop_requested() {
            break;
        }
        if !ctx.sync.wait_layer_request() {
            break;
        }

        let block = test_square_block(index, thickness_mm, &calibration);
        let layer_number = block.layer_number;
        if !ctx.sync.push_block(block) {
            break;
        }
        let produced = ctx
            .counters
            .layers_produced
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        ctx.events.status(format!(
            "test layer {layer_number} generated ({produced}/{layer_count})"
        ));
    }

    ctx.finish();
    if !ctx.sync.stop_requested() {
        ctx.events.status("test producer finished");
    }
}

/// One synthetic layer: a square outline with a zero-power pilot segment.
fn test_square_block(index: u32, thickness_mm: f32, calibration: &Calibration) -> RtcCommandBlock {
    let half = calibration.mm_to_bits(TEST_SQUARE_SIDE_MM / 2.0);
    let corners = [(-half, -half), (half, -half), (half, half), (-half, half)];

    let mut commands = Vec::with_capacity(corners.len() + 1);
    commands.push(Command::Jump {
        x: corners[0].0,
        y: corners[0].1,
    });
    for &(x, y) in &corners[1..] {
        commands.push(Command::Mark { x, y });
    }
    commands.push(Command::Mark {
        x: corners[0].0,
        y: corners[0].1,
    });

    let mut block = RtcCommandBlock {
        layer_number: index + 1,
        layer_height_mm: index as f32 * thickness_mm,
        layer_thickness_mm: thickness_mm,
        hatch_count: 0,
        polyline_count: 0,
        polygon_count: 1,
        commands,
        parameter_segments: Vec::new(),
    };

    // Pilot marking: laser stays dark, slow mark speed for visibility.
    let end = block.commands.len() - 1;
    block.push_segment(ParameterSegment {
        start_cmd: 0,
        end_cmd: end,
        build_style_id: 0,
        laser_power_w: 0.0,
        mark_speed_mm_s: PILOT_MARK_SPEED,
        jump_speed_mm_s: PILOT_JUMP_SPEED,
        laser_mode: 0,
        laser_focus_mm: 0.0,
    });
    block
}
