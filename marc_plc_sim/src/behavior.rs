//! The simulated PLC program.
//!
//! Pure state machine over the tag values: each tick reads the
//! client-writable tags, advances the startup / powder-fill / layer
//! sequences against wall-clock deadlines, and produces the readback tag
//! values. Keeping it free of OPC types makes the sequencing testable
//! without a server.

use std::time::{Duration, Instant};

/// Timing knobs of the simulated machine.
#[derive(Debug, Clone, Copy)]
pub struct SimTiming {
    /// Startup sequence duration.
    pub startup_delay: Duration,
    /// Pause per powder-fill stack step.
    pub fill_step_pause: Duration,
    /// Layer preparation (recoater + platform) duration.
    pub layer_prep_delay: Duration,
}

impl Default for SimTiming {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(2),
            fill_step_pause: Duration::from_millis(100),
            layer_prep_delay: Duration::from_secs(2),
        }
    }
}

/// Client-writable tag values, as read from the address space each tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimInputs {
    /// StartUp request.
    pub start_up: bool,
    /// Surface sequence enable.
    pub start_surfaces: bool,
    /// Layer preparation request.
    pub lay_surface: bool,
    /// Powder-fill stack count.
    pub z_stacks: i32,
    /// Source fill step.
    pub delta_source: i32,
    /// Sink fill step.
    pub delta_sink: i32,
    /// Source layer step.
    pub step_source: i32,
    /// Sink layer step.
    pub step_sink: i32,
    /// Layer stack count (mirrored, not sequenced).
    pub lay_stacks: i32,
}

/// Readback tag values the program publishes each tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimOutputs {
    /// Startup completed.
    pub start_up_done: bool,
    /// Powder fill completed.
    pub make_surface_done: bool,
    /// Layer preparation completed.
    pub lay_surface_done: bool,
    /// Source cylinder position.
    pub source_position: i32,
    /// Sink cylinder position.
    pub sink_position: i32,
    /// Mirrored source position.
    pub g_source_position: i32,
    /// Mirrored sink position.
    pub g_sink_position: i32,
}

/// The simulated PLC program state.
#[derive(Debug)]
pub struct SimProgram {
    timing: SimTiming,
    outputs: SimOutputs,
    startup_deadline: Option<Instant>,
    fill_steps_remaining: i32,
    fill_step_deadline: Option<Instant>,
    preparing: bool,
    prep_deadline: Option<Instant>,
}

impl SimProgram {
    /// Create a program with the given timing.
    pub fn new(timing: SimTiming) -> Self {
        Self {
            timing,
            outputs: SimOutputs::default(),
            startup_deadline: None,
            fill_steps_remaining: 0,
            fill_step_deadline: None,
            preparing: false,
            prep_deadline: None,
        }
    }

    /// Current readback values.
    pub fn outputs(&self) -> SimOutputs {
        self.outputs
    }

    /// Advance one tick.
    pub fn tick(&mut self, inputs: SimInputs, now: Instant) -> SimOutputs {
        self.tick_startup(&inputs, now);
        self.tick_powder_fill(&inputs, now);
        self.tick_layer(&inputs, now);

        self.outputs.g_source_position = self.outputs.source_position;
        self.outputs.g_sink_position = self.outputs.sink_position;
        self.outputs
    }

    fn tick_startup(&mut self, inputs: &SimInputs, now: Instant) {
        if inputs.start_up && !self.outputs.start_up_done {
            match self.startup_deadline {
                None => {
                    tracing::info!("startup sequence initiated");
                    self.startup_deadline = Some(now + self.timing.startup_delay);
                }
                Some(deadline) if now >= deadline => {
                    self.outputs.start_up_done = true;
                    self.startup_deadline = None;
                    tracing::info!("startup sequence complete (StartUp_Done=true)");
                }
                Some(_) => {}
            }
        } else if !inputs.start_up {
            self.startup_deadline = None;
        }
    }

    fn tick_powder_fill(&mut self, inputs: &SimInputs, now: Instant) {
        if inputs.start_surfaces {
            if self.outputs.make_surface_done {
                return;
            }
            if self.fill_step_deadline.is_none() {
                tracing::info!("powder fill initiated ({} stacks)", inputs.z_stacks);
                self.fill_steps_remaining = inputs.z_stacks.max(0);
                self.fill_step_deadline = Some(now);
            }
            if let Some(deadline) = self.fill_step_deadline {
                if now >= deadline {
                    if self.fill_steps_remaining > 0 {
                        self.outputs.source_position += inputs.delta_source;
                        self.outputs.sink_position += inputs.delta_sink;
                        self.fill_steps_remaining -= 1;
                        self.fill_step_deadline = Some(now + self.timing.fill_step_pause);
                    } else {
                        self.outputs.make_surface_done = true;
                        self.fill_step_deadline = None;
                        tracing::info!("powder fill complete (MakeSurface_Done=true)");
                    }
                }
            }
        } else {
            self.outputs.make_surface_done = false;
            self.fill_step_deadline = None;
            self.fill_steps_remaining = 0;
        }
    }

    fn tick_layer(&mut self, inputs: &SimInputs, now: Instant) {
        if inputs.lay_surface && !self.preparing {
            tracing::info!("layer preparation requested (LaySurface=true)");
            self.preparing = true;
            self.outputs.lay_surface_done = false;
            self.prep_deadline = Some(now + self.timing.layer_prep_delay);
        } else if inputs.lay_surface && self.preparing {
            if let Some(deadline) = self.prep_deadline {
                if now >= deadline && !self.outputs.lay_surface_done {
                    self.outputs.source_position += inputs.step_source;
                    self.outputs.sink_position += inputs.step_sink;
                    self.outputs.lay_surface_done = true;
                    self.prep_deadline = None;
                    tracing::info!("layer prepared (LaySurface_Done=true)");
                }
            }
        } else if !inputs.lay_surface && self.preparing {
            tracing::info!("layer execution complete (LaySurface=false), rearming");
            self.preparing = false;
            self.outputs.lay_surface_done = false;
            self.prep_deadline = None;
        }
    }
}
