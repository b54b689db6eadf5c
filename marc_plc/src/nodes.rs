//! Typed node handles for the fixed PLC tag namespace.
//!
//! All identifiers are string node ids in one configurable namespace index.
//! The set is built once after connect and dropped as a whole on disconnect,
//! which releases every identifier allocation in one place.

use marc_common::tags;
use opcua::types::NodeId;

/// The complete set of node handles the client talks to.
#[derive(Debug, Clone)]
pub struct NodeSet {
    // StartUpSequence
    /// Machine startup request.
    pub start_up: NodeId,
    /// Machine startup completed.
    pub start_up_done: NodeId,

    // MakeSurface
    /// Powder-fill stack count.
    pub z_stacks: NodeId,
    /// Source cylinder fill step.
    pub delta_source: NodeId,
    /// Sink cylinder fill step.
    pub delta_sink: NodeId,
    /// Powder fill completed.
    pub make_surface_done: NodeId,
    /// Source cylinder actual position.
    pub source_cylinder_position: NodeId,
    /// Sink cylinder actual position.
    pub sink_cylinder_position: NodeId,

    // GVL
    /// Surface sequence enable.
    pub start_surfaces: NodeId,
    /// Mirrored source cylinder position.
    pub g_source_cylinder_position: NodeId,
    /// Mirrored sink cylinder position.
    pub g_sink_cylinder_position: NodeId,

    // Prepare2Process
    /// Layer preparation request.
    pub lay_surface: NodeId,
    /// Layer preparation completed.
    pub lay_surface_done: NodeId,
    /// Source cylinder layer step.
    pub step_source: NodeId,
    /// Sink cylinder layer step.
    pub step_sink: NodeId,
    /// Layer stack count.
    pub lay_stacks: NodeId,
}

impl NodeSet {
    /// Build the node set for a namespace index.
    pub fn new(namespace_index: u16) -> Self {
        let node = |tag: &'static str| NodeId::new(namespace_index, tag);
        Self {
            start_up: node(tags::TAG_START_UP),
            start_up_done: node(tags::TAG_START_UP_DONE),
            z_stacks: node(tags::TAG_Z_STACKS),
            delta_source: node(tags::TAG_DELTA_SOURCE),
            delta_sink: node(tags::TAG_DELTA_SINK),
            make_surface_done: node(tags::TAG_MAKE_SURFACE_DONE),
            source_cylinder_position: node(tags::TAG_SOURCE_CYLINDER_POSITION),
            sink_cylinder_position: node(tags::TAG_SINK_CYLINDER_POSITION),
            start_surfaces: node(tags::TAG_START_SURFACES),
            g_source_cylinder_position: node(tags::TAG_G_SOURCE_CYLINDER_POSITION),
            g_sink_cylinder_position: node(tags::TAG_G_SINK_CYLINDER_POSITION),
            lay_surface: node(tags::TAG_LAY_SURFACE),
            lay_surface_done: node(tags::TAG_LAY_SURFACE_DONE),
            step_source: node(tags::TAG_STEP_SOURCE),
            step_sink: node(tags::TAG_STEP_SINK),
            lay_stacks: node(tags::TAG_LAY_STACKS),
        }
    }

    /// The eight snapshot read nodes, in [`marc_common::tags::OpcSnapshot`]
    /// field order.
    pub fn snapshot_nodes(&self) -> [NodeId; 8] {
        [
            self.source_cylinder_position.clone(),
            self.sink_cylinder_position.clone(),
            self.g_source_cylinder_position.clone(),
            self.g_sink_cylinder_position.clone(),
            self.z_stacks.clone(),
            self.make_surface_done.clone(),
            self.start_up_done.clone(),
            self.lay_surface_done.clone(),
        ]
    }
}
