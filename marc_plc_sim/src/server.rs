//! OPC UA server hosting the simulated PLC.
//!
//! Registers the PLC tag namespace, exposes all tags as writable variables
//! under an `Objects/MaTe_DLMS` folder, and drives the behavior program on a
//! 20 Hz tick thread that reads the client-writable tags and publishes the
//! readbacks.

use crate::behavior::{SimInputs, SimProgram, SimTiming};
use marc_common::tags;
use opcua::server::prelude::*;
use opcua::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Simulator errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Server construction failed.
    #[error("simulator server setup failed: {0}")]
    Setup(String),
}

/// Simulator configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Hostname to bind and advertise.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Namespace URI to register.
    pub namespace_uri: String,
    /// Machine timing.
    pub timing: SimTiming,
    /// Behavior tick interval.
    pub tick_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4840,
            namespace_uri: tags::SIMULATION_NAMESPACE_URI.to_string(),
            timing: SimTiming::default(),
            tick_interval: Duration::from_millis(50),
        }
    }
}

struct SimNodes {
    start_up: NodeId,
    start_up_done: NodeId,
    z_stacks: NodeId,
    delta_source: NodeId,
    delta_sink: NodeId,
    make_surface_done: NodeId,
    source_position: NodeId,
    sink_position: NodeId,
    start_surfaces: NodeId,
    g_source_position: NodeId,
    g_sink_position: NodeId,
    lay_surface: NodeId,
    lay_surface_done: NodeId,
    step_source: NodeId,
    step_sink: NodeId,
    lay_stacks: NodeId,
}

impl SimNodes {
    fn new(ns: u16) -> Self {
        let node = |tag: &'static str| NodeId::new(ns, tag);
        Self {
            start_up: node(tags::TAG_START_UP),
            start_up_done: node(tags::TAG_START_UP_DONE),
            z_stacks: node(tags::TAG_Z_STACKS),
            delta_source: node(tags::TAG_DELTA_SOURCE),
            delta_sink: node(tags::TAG_DELTA_SINK),
            make_surface_done: node(tags::TAG_MAKE_SURFACE_DONE),
            source_position: node(tags::TAG_SOURCE_CYLINDER_POSITION),
            sink_position: node(tags::TAG_SINK_CYLINDER_POSITION),
            start_surfaces: node(tags::TAG_START_SURFACES),
            g_source_position: node(tags::TAG_G_SOURCE_CYLINDER_POSITION),
            g_sink_position: node(tags::TAG_G_SINK_CYLINDER_POSITION),
            lay_surface: node(tags::TAG_LAY_SURFACE),
            lay_surface_done: node(tags::TAG_LAY_SURFACE_DONE),
            step_source: node(tags::TAG_STEP_SOURCE),
            step_sink: node(tags::TAG_STEP_SINK),
            lay_stacks: node(tags::TAG_LAY_STACKS),
        }
    }
}

/// Handle to a running simulator.
pub struct SimHandle {
    /// Namespace index the tags were registered under.
    pub namespace_index: u16,
    endpoint_url: String,
    stop: Arc<AtomicBool>,
    behavior_thread: Option<JoinHandle<()>>,
}

impl SimHandle {
    /// Endpoint URL clients should connect to.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Stop the behavior tick. The server thread keeps serving until the
    /// process exits; only the machine behavior freezes.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.behavior_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the server, register the tag space and start serving.
pub fn spawn(config: SimConfig) -> Result<SimHandle, SimError> {
    let server = ServerBuilder::new_anonymous("marc-plc-sim")
        .application_uri(config.namespace_uri.as_str())
        .product_uri(config.namespace_uri.as_str())
        .host_and_port(config.host.as_str(), config.port)
        .discovery_urls(vec!["/".into()])
        .create_sample_keypair(true)
        .trust_client_certs()
        .server()
        .ok_or_else(|| SimError::Setup("invalid server configuration".to_string()))?;

    let address_space = server.address_space();

    let namespace_index = {
        let mut space = address_space.write();
        let ns = space
            .register_namespace(&config.namespace_uri)
            .map_err(|_| SimError::Setup("namespace registration failed".to_string()))?;
        add_tag_variables(&mut space, ns);
        ns
    };

    if namespace_index != tags::DEFAULT_NAMESPACE_INDEX {
        tracing::warn!(
            "namespace registered at index {namespace_index}, clients expecting index {} must \
             override OPC_UA_NAMESPACE_INDEX",
            tags::DEFAULT_NAMESPACE_INDEX
        );
    }

    let endpoint_url = format!("opc.tcp://{}:{}", config.host, config.port);
    tracing::info!(
        "simulator serving {} tags at {endpoint_url}",
        tags::INT32_TAGS.len() + tags::BOOL_TAGS.len()
    );

    // Server loop thread.
    std::thread::Builder::new()
        .name("plc-sim-server".to_string())
        .spawn(move || server.run())
        .map_err(|e| SimError::Setup(e.to_string()))?;

    // Behavior tick thread.
    let stop = Arc::new(AtomicBool::new(false));
    let behavior_stop = Arc::clone(&stop);
    let nodes = SimNodes::new(namespace_index);
    let timing = config.timing;
    let tick_interval = config.tick_interval;

    let behavior_thread = std::thread::Builder::new()
        .name("plc-sim-behavior".to_string())
        .spawn(move || {
            let mut program = SimProgram::new(timing);
            while !behavior_stop.load(Ordering::SeqCst) {
                tick_once(&address_space, &nodes, &mut program);
                std::thread::sleep(tick_interval);
            }
            tracing::info!("simulator behavior stopped");
        })
        .map_err(|e| SimError::Setup(e.to_string()))?;

    Ok(SimHandle {
        namespace_index,
        endpoint_url,
        stop,
        behavior_thread: Some(behavior_thread),
    })
}

fn add_tag_variables(space: &mut AddressSpace, ns: u16) {
    let folder = space
        .add_folder("MaTe_DLMS", "MaTe_DLMS", &NodeId::objects_folder_id())
        .unwrap_or_else(|_| NodeId::objects_folder_id());

    for tag in tags::INT32_TAGS {
        VariableBuilder::new(&NodeId::new(ns, tag), tag, tag)
            .data_type(DataTypeId::Int32)
            .value(0i32)
            .writable()
            .organized_by(&folder)
            .insert(space);
    }
    for tag in tags::BOOL_TAGS {
        VariableBuilder::new(&NodeId::new(ns, tag), tag, tag)
            .data_type(DataTypeId::Boolean)
            .value(false)
            .writable()
            .organized_by(&folder)
            .insert(space);
    }
}

fn tick_once(address_space: &Arc<RwLock<AddressSpace>>, nodes: &SimNodes, program: &mut SimProgram) {
    let mut space = address_space.write();

    let inputs = SimInputs {
        start_up: read_bool(&space, &nodes.start_up),
        start_surfaces: read_bool(&space, &nodes.start_surfaces),
        lay_surface: read_bool(&space, &nodes.lay_surface),
        z_stacks: read_i32(&space, &nodes.z_stacks),
        delta_source: read_i32(&space, &nodes.delta_source),
        delta_sink: read_i32(&space, &nodes.delta_sink),
        step_source: read_i32(&space, &nodes.step_source),
        step_sink: read_i32(&space, &nodes.step_sink),
        lay_stacks: read_i32(&space, &nodes.lay_stacks),
    };

    let outputs = program.tick(inputs, Instant::now());

    write_value(&mut space, &nodes.start_up_done, outputs.start_up_done);
    write_value(&mut space, &nodes.make_surface_done, outputs.make_surface_done);
    write_value(&mut space, &nodes.lay_surface_done, outputs.lay_surface_done);
    write_value(&mut space, &nodes.source_position, outputs.source_position);
    write_value(&mut space, &nodes.sink_position, outputs.sink_position);
    write_value(&mut space, &nodes.g_source_position, outputs.g_source_position);
    write_value(&mut space, &nodes.g_sink_position, outputs.g_sink_position);
}

fn read_bool(space: &AddressSpace, node: &NodeId) -> bool {
    match space.get_variable_value(node.clone()) {
        Ok(value) => matches!(value.value, Some(Variant::Boolean(true))),
        Err(_) => false,
    }
}

fn read_i32(space: &AddressSpace, node: &NodeId) -> i32 {
    match space.get_variable_value(node.clone()) {
        Ok(value) => match value.value {
            Some(Variant::Int32(v)) => v,
            Some(Variant::Int16(v)) => i32::from(v),
            _ => 0,
        },
        Err(_) => 0,
    }
}

fn write_value<V: Into<Variant>>(space: &mut AddressSpace, node: &NodeId, value: V) {
    let now = DateTime::now();
    space.set_variable_value(node.clone(), value.into(), &now, &now);
}
