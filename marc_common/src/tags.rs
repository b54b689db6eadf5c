//! Fixed PLC tag namespace and the snapshot readout.
//!
//! The tag identifiers are string node ids on the CODESYS side and are fixed
//! by the PLC program; neither the client nor the simulator discovers them.
//! Only the namespace index is configurable.

use serde::{Deserialize, Serialize};

/// Default OPC UA namespace index (CODESYS convention).
pub const DEFAULT_NAMESPACE_INDEX: u16 = 2;
/// Namespace URI registered by the simulator.
pub const SIMULATION_NAMESPACE_URI: &str = "urn:codesys:dlms:simulation";

// ─── StartUpSequence ────────────────────────────────────────────────

/// Machine startup request (Bool, write).
pub const TAG_START_UP: &str = "CECC.MaTe_DLMS.StartUpSequence.StartUp";
/// Machine startup completed (Bool, read).
pub const TAG_START_UP_DONE: &str = "CECC.MaTe_DLMS.StartUpSequence.StartUp_Done";

// ─── MakeSurface ────────────────────────────────────────────────────

/// Number of powder-fill stack steps (Int32, write).
pub const TAG_Z_STACKS: &str = "CECC.MaTe_DLMS.MakeSurface.Z_Stacks";
/// Source cylinder step per fill stack (Int32, write).
pub const TAG_DELTA_SOURCE: &str = "CECC.MaTe_DLMS.MakeSurface.Delta_Source";
/// Sink cylinder step per fill stack (Int32, write).
pub const TAG_DELTA_SINK: &str = "CECC.MaTe_DLMS.MakeSurface.Delta_Sink";
/// Powder fill completed (Bool, read).
pub const TAG_MAKE_SURFACE_DONE: &str = "CECC.MaTe_DLMS.MakeSurface.MakeSurface_Done";
/// Source cylinder actual position (Int32, read/write).
pub const TAG_SOURCE_CYLINDER_POSITION: &str =
    "CECC.MaTe_DLMS.MakeSurface.Marcer_Source_Cylinder_ActualPosition";
/// Sink cylinder actual position (Int32, read/write).
pub const TAG_SINK_CYLINDER_POSITION: &str =
    "CECC.MaTe_DLMS.MakeSurface.Marcer_Sink_Cylinder_ActualPosition";

// ─── GVL ────────────────────────────────────────────────────────────

/// Surface sequence enable (Bool, write).
pub const TAG_START_SURFACES: &str = "CECC.MaTe_DLMS.GVL.StartSurfaces";
/// Mirrored source cylinder position (Int32, read).
pub const TAG_G_SOURCE_CYLINDER_POSITION: &str =
    "CECC.MaTe_DLMS.GVL.g_Marcer_Source_Cylinder_ActualPosition";
/// Mirrored sink cylinder position (Int32, read).
pub const TAG_G_SINK_CYLINDER_POSITION: &str =
    "CECC.MaTe_DLMS.GVL.g_Marcer_Sink_Cylinder_ActualPosition";

// ─── Prepare2Process ────────────────────────────────────────────────

/// Layer preparation request (Bool, write).
pub const TAG_LAY_SURFACE: &str = "CECC.MaTe_DLMS.Prepare2Process.LaySurface";
/// Layer preparation completed (Bool, read).
pub const TAG_LAY_SURFACE_DONE: &str = "CECC.MaTe_DLMS.Prepare2Process.LaySurface_Done";
/// Source cylinder step per layer (Int32, write).
pub const TAG_STEP_SOURCE: &str = "CECC.MaTe_DLMS.Prepare2Process.Step_Source";
/// Sink cylinder step per layer (Int32, write).
pub const TAG_STEP_SINK: &str = "CECC.MaTe_DLMS.Prepare2Process.Step_Sink";
/// Layer stack count for the preparation sequence (Int32, write).
pub const TAG_LAY_STACKS: &str = "CECC.MaTe_DLMS.Prepare2Process.Lay_Stacks";

/// All Int32 tags in the namespace, in simulator registration order.
pub const INT32_TAGS: [&str; 10] = [
    TAG_Z_STACKS,
    TAG_DELTA_SOURCE,
    TAG_DELTA_SINK,
    TAG_SOURCE_CYLINDER_POSITION,
    TAG_SINK_CYLINDER_POSITION,
    TAG_G_SOURCE_CYLINDER_POSITION,
    TAG_G_SINK_CYLINDER_POSITION,
    TAG_STEP_SOURCE,
    TAG_STEP_SINK,
    TAG_LAY_STACKS,
];

/// All Bool tags in the namespace, in simulator registration order.
pub const BOOL_TAGS: [&str; 6] = [
    TAG_START_UP,
    TAG_START_UP_DONE,
    TAG_MAKE_SURFACE_DONE,
    TAG_START_SURFACES,
    TAG_LAY_SURFACE,
    TAG_LAY_SURFACE_DONE,
];

/// One consistent readout of the PLC data tags.
///
/// All values are integers; the PLC-side booleans are mapped to 0/1 so the
/// snapshot serializes uniformly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcSnapshot {
    /// Source cylinder actual position.
    pub source_cylinder_position: i32,
    /// Sink cylinder actual position.
    pub sink_cylinder_position: i32,
    /// Mirrored source cylinder position (GVL).
    pub g_source_cylinder_position: i32,
    /// Mirrored sink cylinder position (GVL).
    pub g_sink_cylinder_position: i32,
    /// Remaining powder-fill stacks.
    pub stacks_remaining: i32,
    /// Powder fill completed flag (0/1).
    pub ready_to_powder: i32,
    /// Machine startup completed flag (0/1).
    pub startup_done: i32,
    /// Layer preparation completed flag (0/1).
    pub powder_surface_done: i32,
}

impl OpcSnapshot {
    /// Whether the PLC reports the current layer surface as prepared.
    #[inline]
    pub const fn layer_prepared(&self) -> bool {
        self.powder_surface_done != 0
    }
}
