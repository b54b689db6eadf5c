//! The OPC UA PLC client.
//!
//! One long-lived session against the machine PLC. Two mutexes split the
//! fast path from the slow path: `state` guards the session handle and the
//! lost/initialized flags and is never held across a library call; `call`
//! serializes every library call so a fast state check never blocks on I/O.
//! No event is emitted while either mutex is held.

use crate::error::PlcError;
use crate::nodes::NodeSet;
use marc_common::config::PlcSettings;
use marc_common::events::EventBus;
use marc_common::tags::OpcSnapshot;
use opcua::client::prelude::*;
use opcua::sync::RwLock;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Gap between the individual writes of a handshake sequence.
const OPERATION_GAP: Duration = Duration::from_millis(100);
/// Settle time after the powder-fill trigger write.
const POWDER_FILL_SETTLE: Duration = Duration::from_millis(500);
/// Settle time after the layer-preparation trigger write.
const LAYER_SETTLE: Duration = Duration::from_millis(400);
/// Gap between writes of the bottom-layer sequence.
const BOTTOM_LAYER_GAP: Duration = Duration::from_millis(1000);
/// Settle time after the bottom-layer trigger write.
const BOTTOM_LAYER_SETTLE: Duration = Duration::from_millis(500);
/// Poll interval while waiting for initial readiness.
const READINESS_POLL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct ClientState {
    client: Option<Client>,
    session: Option<Arc<RwLock<Session>>>,
    nodes: Option<NodeSet>,
    initialized: bool,
    connection_lost: bool,
}

/// OPC UA client for the machine PLC.
///
/// Thread-safe: all methods take `&self` and may be called from the
/// scheduler, the poller and the control surface concurrently.
pub struct PlcClient {
    settings: PlcSettings,
    state: Mutex<ClientState>,
    call: Mutex<()>,
    events: EventBus,
}

impl PlcClient {
    /// Create a client for an endpoint. No connection happens here.
    pub fn new(settings: PlcSettings, events: EventBus) -> Self {
        Self {
            settings,
            state: Mutex::new(ClientState::default()),
            call: Mutex::new(()),
            events,
        }
    }

    /// The settings this client was built with.
    pub fn settings(&self) -> &PlcSettings {
        &self.settings
    }

    /// Connect to the endpoint and build the node handles.
    ///
    /// Idempotent while a session is healthy; after a connection loss a new
    /// call re-initializes from scratch.
    pub fn initialize(&self) -> Result<(), PlcError> {
        let mut state = self.lock_state();
        if state.initialized && !state.connection_lost {
            return Ok(());
        }

        tracing::info!("connecting to OPC UA server at {}", self.settings.endpoint_url);

        state.client = None;
        state.session = None;
        state.connection_lost = false;

        let mut client = ClientBuilder::new()
            .application_name("marc-control")
            .application_uri("urn:marc:control")
            .product_uri("urn:marc:control")
            .trust_server_certs(true)
            .create_sample_keypair(false)
            .session_retry_limit(1)
            .client()
            .ok_or_else(|| PlcError::Connect("invalid client configuration".to_string()))?;

        let endpoint: EndpointDescription = (
            self.settings.endpoint_url.as_str(),
            "None",
            MessageSecurityMode::None,
            UserTokenPolicy::anonymous(),
        )
            .into();

        let session = client
            .connect_to_endpoint(endpoint, IdentityToken::Anonymous)
            .map_err(|status| PlcError::Connect(format!("{status:?}")))?;

        state.client = Some(client);
        state.session = Some(session);
        state.nodes = Some(NodeSet::new(self.settings.namespace_index));
        state.initialized = true;

        tracing::info!(
            "OPC UA session established (namespace index {})",
            self.settings.namespace_index
        );
        Ok(())
    }

    /// Whether an initialized, healthy session exists.
    pub fn is_connected(&self) -> bool {
        let state = self.lock_state();
        state.initialized && !state.connection_lost
    }

    /// Close the session and drop every node handle.
    ///
    /// Safe to call repeatedly and in any state.
    pub fn disconnect(&self) {
        let (session, client) = {
            let mut state = self.lock_state();
            state.initialized = false;
            state.nodes = None;
            (state.session.take(), state.client.take())
        };

        if let Some(session) = session {
            let _call = self.lock_call();
            session.read().disconnect();
        }
        drop(client);
        tracing::info!("OPC UA session closed");
    }

    /// Poll the PLC until a snapshot read succeeds.
    ///
    /// Used for the initial readiness gate before a production run starts.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<(), PlcError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.read_snapshot() {
                Ok(_) => return Ok(()),
                Err(PlcError::ConnectionLost) => return Err(PlcError::ConnectionLost),
                Err(_) if Instant::now() < deadline => std::thread::sleep(READINESS_POLL),
                Err(_) => return Err(PlcError::Timeout { what: "readiness" }),
            }
        }
    }

    // ── Typed primitives ──

    /// Read an `Int32` tag.
    pub fn read_i32(&self, node: &NodeId, op: &'static str) -> Result<i32, PlcError> {
        let value = self.read_variant(node, op)?;
        variant_to_i32(op, value)
    }

    /// Read a `Boolean` tag.
    pub fn read_bool(&self, node: &NodeId, op: &'static str) -> Result<bool, PlcError> {
        let value = self.read_variant(node, op)?;
        variant_to_bool(op, value)
    }

    /// Write an `Int32` tag.
    pub fn write_i32(&self, node: &NodeId, value: i32, op: &'static str) -> Result<(), PlcError> {
        self.write_variant(node, Variant::Int32(value), op)
    }

    /// Write a `Boolean` tag.
    pub fn write_bool(&self, node: &NodeId, value: bool, op: &'static str) -> Result<(), PlcError> {
        self.write_variant(node, Variant::Boolean(value), op)
    }

    /// The node handles (available while initialized).
    pub fn nodes(&self) -> Result<NodeSet, PlcError> {
        let state = self.lock_state();
        if state.connection_lost {
            return Err(PlcError::ConnectionLost);
        }
        state.nodes.clone().ok_or(PlcError::NotConnected)
    }

    // ── High-level operations ──

    /// Request or clear the machine startup sequence.
    pub fn write_startup(&self, value: bool) -> Result<(), PlcError> {
        let nodes = self.nodes()?;
        self.write_bool(&nodes.start_up, value, "write_startup")?;
        tracing::info!("startup command sent to PLC (StartUp={value})");
        Ok(())
    }

    /// Start the powder-fill sequence.
    ///
    /// Write order and pacing follow the PLC program's expectations; the
    /// gaps give the runtime time to latch each value before the trigger.
    pub fn write_powder_fill(
        &self,
        layers: i32,
        delta_source: i32,
        delta_sink: i32,
    ) -> Result<(), PlcError> {
        let nodes = self.nodes()?;
        self.write_i32(&nodes.z_stacks, layers, "write_powder_fill")?;
        self.write_i32(&nodes.lay_stacks, layers, "write_powder_fill")?;
        std::thread::sleep(OPERATION_GAP);
        self.write_i32(&nodes.delta_source, delta_source, "write_powder_fill")?;
        std::thread::sleep(OPERATION_GAP);
        self.write_i32(&nodes.delta_sink, delta_sink, "write_powder_fill")?;
        std::thread::sleep(OPERATION_GAP);
        self.write_bool(&nodes.start_surfaces, true, "write_powder_fill")?;
        std::thread::sleep(POWDER_FILL_SETTLE);

        tracing::info!("powder fill parameters sent to PLC");
        Ok(())
    }

    /// Request preparation of the next layer (recoater + platform motion).
    pub fn write_layer_parameters(
        &self,
        layers: i32,
        delta_source: i32,
        delta_sink: i32,
    ) -> Result<(), PlcError> {
        let nodes = self.nodes()?;
        self.write_i32(&nodes.lay_stacks, layers, "write_layer_parameters")?;
        std::thread::sleep(OPERATION_GAP);
        self.write_i32(&nodes.step_source, delta_source, "write_layer_parameters")?;
        std::thread::sleep(OPERATION_GAP);
        self.write_i32(&nodes.step_sink, delta_sink, "write_layer_parameters")?;
        std::thread::sleep(OPERATION_GAP);
        self.write_bool(&nodes.lay_surface, true, "write_layer_parameters")?;
        std::thread::sleep(LAYER_SETTLE);

        tracing::debug!("layer parameters sent to PLC (stacks={layers}, step={delta_source}/{delta_sink})");
        Ok(())
    }

    /// Like [`PlcClient::write_layer_parameters`] but with the slower pacing
    /// the first layers on a fresh plate need.
    pub fn write_bottom_layer_parameters(
        &self,
        layers: i32,
        delta_source: i32,
        delta_sink: i32,
    ) -> Result<(), PlcError> {
        let nodes = self.nodes()?;
        self.write_i32(&nodes.lay_stacks, layers, "write_bottom_layer_parameters")?;
        std::thread::sleep(BOTTOM_LAYER_GAP);
        self.write_i32(&nodes.step_source, delta_source, "write_bottom_layer_parameters")?;
        std::thread::sleep(BOTTOM_LAYER_GAP);
        self.write_i32(&nodes.step_sink, delta_sink, "write_bottom_layer_parameters")?;
        std::thread::sleep(BOTTOM_LAYER_GAP);
        self.write_bool(&nodes.lay_surface, true, "write_bottom_layer_parameters")?;
        std::thread::sleep(BOTTOM_LAYER_SETTLE);

        tracing::info!("bottom layer parameters sent to PLC");
        Ok(())
    }

    /// Tell the PLC the optics finished the current layer.
    pub fn write_layer_execution_complete(&self, layer_number: u32) -> Result<(), PlcError> {
        let nodes = self.nodes()?;
        self.write_bool(&nodes.lay_surface, false, "write_layer_execution_complete")?;
        tracing::debug!("layer {layer_number} execution complete sent to PLC (LaySurface=false)");
        Ok(())
    }

    /// Emergency stop: clear the surface enable, best effort.
    ///
    /// Always logs the stop, whatever the connection state; a write failure
    /// never masks the emergency path.
    pub fn write_emergency_stop(&self) -> Result<(), PlcError> {
        match self.nodes().and_then(|nodes| {
            self.write_bool(&nodes.start_surfaces, false, "write_emergency_stop")
        }) {
            Ok(()) => {}
            Err(e) => tracing::warn!("emergency stop write not delivered: {e}"),
        }
        tracing::warn!("EMERGENCY STOP signal sent to PLC");
        Ok(())
    }

    /// Write one cylinder's actual-position tag directly.
    pub fn write_cylinder_position(&self, is_source: bool, position: i32) -> Result<(), PlcError> {
        let nodes = self.nodes()?;
        let node = if is_source {
            &nodes.source_cylinder_position
        } else {
            &nodes.sink_cylinder_position
        };
        self.write_i32(node, position, "write_cylinder_position")?;
        tracing::info!(
            "cylinder position ({}) written: {position}",
            if is_source { "source" } else { "sink" }
        );
        Ok(())
    }

    /// Read the eight data tags in one call set.
    pub fn read_snapshot(&self) -> Result<OpcSnapshot, PlcError> {
        const OP: &str = "read_snapshot";
        let nodes = self.nodes()?;
        let session = self.session()?;

        let reads: Vec<ReadValueId> = nodes
            .snapshot_nodes()
            .into_iter()
            .map(Into::into)
            .collect();

        let result = {
            let _call = self.lock_call();
            let session = session.read();
            session.read(&reads, TimestampsToReturn::Neither, 0.0)
        };
        let values = result.map_err(|status| self.fail(status, OP))?;
        if values.len() != reads.len() {
            return Err(PlcError::Bad {
                status: StatusCode::BadUnexpectedError,
                op: OP,
            });
        }

        let mut scalars = Vec::with_capacity(values.len());
        for value in values {
            scalars.push(self.unwrap_data_value(value, OP)?);
        }

        Ok(OpcSnapshot {
            source_cylinder_position: variant_to_i32(OP, scalars[0].clone())?,
            sink_cylinder_position: variant_to_i32(OP, scalars[1].clone())?,
            g_source_cylinder_position: variant_to_i32(OP, scalars[2].clone())?,
            g_sink_cylinder_position: variant_to_i32(OP, scalars[3].clone())?,
            stacks_remaining: variant_to_i32(OP, scalars[4].clone())?,
            ready_to_powder: variant_to_bool(OP, scalars[5].clone())? as i32,
            startup_done: variant_to_bool(OP, scalars[6].clone())? as i32,
            powder_surface_done: variant_to_bool(OP, scalars[7].clone())? as i32,
        })
    }

    // ── Internal ──

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_call(&self) -> MutexGuard<'_, ()> {
        self.call.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session(&self) -> Result<Arc<RwLock<Session>>, PlcError> {
        let state = self.lock_state();
        if state.connection_lost {
            return Err(PlcError::ConnectionLost);
        }
        if !state.initialized {
            return Err(PlcError::NotConnected);
        }
        state
            .session
            .as_ref()
            .map(Arc::clone)
            .ok_or(PlcError::NotConnected)
    }

    fn read_variant(&self, node: &NodeId, op: &'static str) -> Result<Variant, PlcError> {
        let session = self.session()?;

        let result = {
            let _call = self.lock_call();
            let session = session.read();
            session.read(&[node.clone().into()], TimestampsToReturn::Neither, 0.0)
        };
        let mut values = result.map_err(|status| self.fail(status, op))?;
        if values.is_empty() {
            return Err(PlcError::Bad {
                status: StatusCode::BadUnexpectedError,
                op,
            });
        }
        self.unwrap_data_value(values.remove(0), op)
    }

    fn write_variant(
        &self,
        node: &NodeId,
        value: Variant,
        op: &'static str,
    ) -> Result<(), PlcError> {
        let session = self.session()?;

        let write = WriteValue {
            node_id: node.clone(),
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            value: DataValue::value_only(value),
        };

        let result = {
            let _call = self.lock_call();
            let session = session.read();
            session.write(&[write])
        };
        let statuses = result.map_err(|status| self.fail(status, op))?;
        let status = statuses
            .first()
            .copied()
            .unwrap_or(StatusCode::BadUnexpectedError);
        if !status.is_good() {
            return Err(self.fail(status, op));
        }
        Ok(())
    }

    fn unwrap_data_value(&self, value: DataValue, op: &'static str) -> Result<Variant, PlcError> {
        if let Some(status) = value.status {
            if !status.is_good() {
                return Err(self.fail(status, op));
            }
        }
        value.value.ok_or(PlcError::TypeMismatch {
            op,
            got: "empty value".to_string(),
        })
    }

    /// Map a bad status code, latching connection loss when the session is
    /// gone.
    fn fail(&self, status: StatusCode, op: &'static str) -> PlcError {
        if is_connection_loss(status) {
            self.latch_connection_loss(status);
            PlcError::ConnectionLost
        } else {
            PlcError::Bad { status, op }
        }
    }

    fn latch_connection_loss(&self, status: StatusCode) {
        let first_detection = {
            let mut state = self.lock_state();
            if state.connection_lost {
                false
            } else {
                state.connection_lost = true;
                state.initialized = false;
                true
            }
        };
        // Event emission happens outside both mutexes.
        if first_detection {
            tracing::error!("OPC UA connection lost: {status:?}");
            self.events.connection_lost();
        }
    }
}

fn is_connection_loss(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BadConnectionClosed
            | StatusCode::BadSessionClosed
            | StatusCode::BadSessionIdInvalid
            | StatusCode::BadServerNotConnected
            | StatusCode::BadCommunicationError
            | StatusCode::BadNotConnected
    )
}

fn variant_to_i32(op: &'static str, value: Variant) -> Result<i32, PlcError> {
    match value {
        Variant::Int32(v) => Ok(v),
        // PLC INT tags surface as Int16.
        Variant::Int16(v) => Ok(i32::from(v)),
        other => Err(PlcError::TypeMismatch {
            op,
            got: format!("{other:?}"),
        }),
    }
}

fn variant_to_bool(op: &'static str, value: Variant) -> Result<bool, PlcError> {
    match value {
        Variant::Boolean(v) => Ok(v),
        other => Err(PlcError::TypeMismatch {
            op,
            got: format!("{other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marc_common::config::PlcSettings;

    fn offline_client() -> PlcClient {
        PlcClient::new(PlcSettings::default(), EventBus::new())
    }

    #[test]
    fn primitives_fail_without_a_session() {
        let client = offline_client();
        assert!(!client.is_connected());
        assert!(matches!(client.nodes(), Err(PlcError::NotConnected)));
        assert!(matches!(
            client.read_snapshot(),
            Err(PlcError::NotConnected)
        ));
        assert!(matches!(
            client.write_layer_parameters(1, 200, 200),
            Err(PlcError::NotConnected)
        ));
    }

    #[test]
    fn emergency_stop_succeeds_even_when_disconnected() {
        let client = offline_client();
        assert!(client.write_emergency_stop().is_ok());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let client = offline_client();
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
    }

    #[test]
    fn variant_conversions() {
        assert_eq!(variant_to_i32("t", Variant::Int32(7)).unwrap(), 7);
        assert_eq!(variant_to_i32("t", Variant::Int16(-3)).unwrap(), -3);
        assert!(variant_to_i32("t", Variant::Boolean(true)).is_err());
        assert!(variant_to_bool("t", Variant::Boolean(true)).unwrap());
        assert!(variant_to_bool("t", Variant::Int32(1)).is_err());
    }

    #[test]
    fn connection_loss_statuses_are_latching() {
        assert!(is_connection_loss(StatusCode::BadConnectionClosed));
        assert!(is_connection_loss(StatusCode::BadSessionClosed));
        assert!(!is_connection_loss(StatusCode::BadNodeIdUnknown));
    }
}
