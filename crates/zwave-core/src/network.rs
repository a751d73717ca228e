//! Z-Wave network management

use crate::config::NetworkConfig;
use crate::controller::{Controller, ControllerHandle, NetworkPolicy};
use crate::device::{switch_binary_set, switch_multilevel_set, DeviceKind, ZWaveNode, MAX_LEVEL};
use crate::registry::DeviceRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use zwave_protocol::constants::value;
use zwave_protocol::{Frame, FunctionId, Job, JobHandle, LinkTransport, ProtocolError};

/// How long the controller gets to answer MEMORY_GET_ID
pub const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Device not found: node {0}")]
    DeviceNotFound(u8),

    #[error("Node {node_id} ({kind}) does not support {operation}")]
    Unsupported {
        node_id: u8,
        kind: DeviceKind,
        operation: &'static str,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Controller did not answer within {0:?}")]
    NoResponse(Duration),
}

/// Network events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The controller holds the SUC/SIS role
    ControllerInitialized { node_id: u8 },
    /// Protocol info received for a node
    NodeDiscovered {
        node_id: u8,
        generic_type: u8,
        specific_type: u8,
        sleeping: bool,
    },
    /// A node's initialization request completed
    NodeInitialized { node_id: u8 },
    /// A node finished initialization for the first time
    NodeAdded { node_id: u8 },
    /// Every enumerated node is initialized
    ControllerReady,
    /// A node reported a value
    DeviceReport {
        node_id: u8,
        command_class: u8,
        command: Option<u8>,
        value: Option<u8>,
    },
    /// A protocol step gave up
    StepFailed {
        function: FunctionId,
        node_id: Option<u8>,
        reason: String,
    },
}

/// Network status information
#[derive(Debug, Clone, serde::Serialize)]
pub struct NetworkStatus {
    pub port: Option<String>,
    pub home_id: String,
    pub node_id: u8,
    pub ready: bool,
    pub device_count: usize,
}

/// Z-Wave network manager
pub struct ZWaveNetwork {
    /// Low-level transport
    transport: Arc<LinkTransport>,
    /// Network-management task
    controller: ControllerHandle,
    /// Known nodes
    registry: DeviceRegistry,
    /// Event broadcaster
    event_tx: broadcast::Sender<NetworkEvent>,
    home_id: u32,
    node_id: u8,
    ready: Arc<AtomicBool>,
}

impl ZWaveNetwork {
    /// Open the controller and start bring-up
    #[allow(clippy::missing_errors_doc)]
    pub async fn open(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let network = Self::connect(config).await?;
        network.initialize();
        Ok(network)
    }

    /// Open the first port with an answering controller, without starting bring-up
    #[allow(clippy::missing_errors_doc)]
    pub async fn connect(config: &NetworkConfig) -> Result<Self, NetworkError> {
        for port in &config.preferred_ports {
            let Ok(transport) = LinkTransport::open(std::slice::from_ref(port)).await else {
                continue;
            };
            match Self::with_transport(transport).await {
                Ok(network) => return Ok(network),
                Err(e) => tracing::warn!(port = %port, "No controller answering: {}", e),
            }
        }
        Err(ProtocolError::PortUnavailable(config.preferred_ports.clone()).into())
    }

    /// Identify the controller behind a running transport
    #[allow(clippy::missing_errors_doc)]
    pub async fn with_transport(transport: LinkTransport) -> Result<Self, NetworkError> {
        let transport = Arc::new(transport);
        let (home_id, node_id) = Self::identify(&transport).await?;
        tracing::info!("Home id {:08X}, controller node id {}", home_id, node_id);

        let (event_tx, _) = broadcast::channel(64);
        let registry = DeviceRegistry::new();
        let ready = Arc::new(AtomicBool::new(false));

        let controller = Controller::spawn(
            node_id,
            transport.clone(),
            registry.clone(),
            event_tx.clone(),
            ready.clone(),
        );

        Ok(Self {
            transport,
            controller,
            registry,
            event_tx,
            home_id,
            node_id,
            ready,
        })
    }

    /// MEMORY_GET_ID: home id (bytes 4-7, big endian) and node id (byte 8)
    async fn identify(transport: &LinkTransport) -> Result<(u32, u8), NetworkError> {
        let handle = transport.send(Job::new(Frame::request(FunctionId::MemoryGetId)))?;
        let job = handle.id();
        let response = match tokio::time::timeout(IDENTIFY_TIMEOUT, handle.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                transport.cancel(job);
                return Err(NetworkError::NoResponse(IDENTIFY_TIMEOUT));
            }
        };

        let bytes = response.serialize();
        if bytes.len() < 10 {
            return Err(NetworkError::InvalidResponse(format!(
                "MEMORY_GET_ID response too short: {bytes:02X?}"
            )));
        }
        let home_id = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok((home_id, bytes[8]))
    }

    /// Start bring-up: SUC/SIS election, discovery, node initialization
    pub fn initialize(&self) {
        self.controller.initialize();
    }

    /// Let new nodes join
    pub fn add_node_start(&self) {
        self.controller.add_node_start();
    }

    pub fn add_node_stop(&self) {
        self.controller.add_node_stop();
    }

    /// Factory reset the controller and run bring-up again
    pub fn reset(&self) {
        self.controller.reset();
    }

    /// Get the underlying transport
    #[must_use]
    pub fn transport(&self) -> &LinkTransport {
        &self.transport
    }

    /// Subscribe to network events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn home_id(&self) -> u32 {
        self.home_id
    }

    #[must_use]
    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// All enumerated nodes are initialized
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn status(&self) -> NetworkStatus {
        NetworkStatus {
            port: self.transport.port_name().map(ToString::to_string),
            home_id: format!("{:08X}", self.home_id),
            node_id: self.node_id,
            ready: self.is_ready(),
            device_count: self.registry.len(),
        }
    }

    /// Get all known devices
    #[must_use]
    pub fn get_devices(&self) -> Vec<ZWaveNode> {
        self.registry.list()
    }

    /// Get a specific device by node id
    #[must_use]
    pub fn get_device(&self, node_id: u8) -> Option<ZWaveNode> {
        self.registry.get(node_id)
    }

    /// Library version string reported by the controller
    #[allow(clippy::missing_errors_doc)]
    pub async fn get_version(&self) -> Result<String, NetworkError> {
        let response = self
            .transport
            .request(Frame::request(FunctionId::GetVersion))
            .await?;

        let text: Vec<u8> = response
            .parameters
            .iter()
            .copied()
            .take_while(|&b| b != 0)
            .collect();
        Ok(String::from_utf8_lossy(&text).into_owned())
    }

    /// Submit a job through the shared transport
    #[allow(clippy::missing_errors_doc)]
    pub fn send(&self, job: Job) -> Result<JobHandle, NetworkError> {
        Ok(self.transport.send(job)?)
    }

    /// Send a SEND_DATA request and wait for its callback
    async fn send_command(&self, request: Frame) -> Result<(), NetworkError> {
        let policy = NetworkPolicy::for_request(&request);
        self.transport
            .send(Job::with_policy(request, policy))?
            .wait()
            .await?;
        Ok(())
    }

    fn require(&self, node_id: u8) -> Result<ZWaveNode, NetworkError> {
        self.registry
            .get(node_id)
            .ok_or(NetworkError::DeviceNotFound(node_id))
    }

    /// Switch a node on or off
    #[allow(clippy::missing_errors_doc)]
    pub async fn set_switch(&self, node_id: u8, on: bool) -> Result<(), NetworkError> {
        let node = self.require(node_id)?;
        let level = if on { value::ON } else { value::OFF };
        let request = match node.kind {
            DeviceKind::SwitchBinary => switch_binary_set(node_id, on),
            DeviceKind::SwitchMultilevel => switch_multilevel_set(node_id, level),
            kind => {
                return Err(NetworkError::Unsupported {
                    node_id,
                    kind,
                    operation: "on/off",
                })
            }
        };

        tracing::info!("Turning {} {}", node.display_name(), if on { "on" } else { "off" });
        self.send_command(request).await?;
        self.registry.update(node_id, |node| node.state = Some(level));
        Ok(())
    }

    /// Turn a device on
    #[allow(clippy::missing_errors_doc)]
    pub async fn turn_on(&self, node_id: u8) -> Result<(), NetworkError> {
        self.set_switch(node_id, true).await
    }

    /// Turn a device off
    #[allow(clippy::missing_errors_doc)]
    pub async fn turn_off(&self, node_id: u8) -> Result<(), NetworkError> {
        self.set_switch(node_id, false).await
    }

    /// Toggle a device; unknown state counts as off
    #[allow(clippy::missing_errors_doc)]
    pub async fn toggle_device(&self, node_id: u8) -> Result<(), NetworkError> {
        let node = self.require(node_id)?;
        let on = !node.is_on().unwrap_or(false);
        self.set_switch(node_id, on).await
    }

    /// Set a multilevel switch to `level` (0-99)
    #[allow(clippy::missing_errors_doc)]
    pub async fn set_level(&self, node_id: u8, level: u8) -> Result<(), NetworkError> {
        let node = self.require(node_id)?;
        if node.kind != DeviceKind::SwitchMultilevel {
            return Err(NetworkError::Unsupported {
                node_id,
                kind: node.kind,
                operation: "dimming",
            });
        }

        let level = level.min(MAX_LEVEL);
        tracing::info!("Setting {} to level {}", node.display_name(), level);
        self.send_command(switch_multilevel_set(node_id, level))
            .await?;
        self.registry.update(node_id, |node| node.state = Some(level));
        Ok(())
    }

    /// Ask a node for its current value; the report arrives as an event
    #[allow(clippy::missing_errors_doc)]
    pub async fn refresh(&self, node_id: u8) -> Result<(), NetworkError> {
        let node = self.require(node_id)?;
        let request = node
            .kind
            .get_request(node_id)
            .ok_or(NetworkError::Unsupported {
                node_id,
                kind: node.kind,
                operation: "refresh",
            })?;
        self.send_command(request).await
    }

    /// Stop the controller and the link
    pub fn close(&self) {
        self.controller.shutdown();
        self.transport.close();
    }
}
