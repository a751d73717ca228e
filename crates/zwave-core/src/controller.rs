//! Network management: SUC/SIS election, node discovery and inclusion
//!
//! The controller runs as its own task. It submits one job per protocol
//! step and decides the next step when that job finishes. Job outcomes and
//! unsolicited frames both arrive on the task, so the readiness tracker
//! and node table writes have a single owner.

use crate::device::{wake_up_interval_set, ZWaveNode};
use crate::network::NetworkEvent;
use crate::registry::DeviceRegistry;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use zwave_protocol::constants::{
    add_node, command_class, MAX_NODE_ID, SUC_FUNC_NODEID_SERVER, WAKE_UP_INTERVAL_SECS,
};
use zwave_protocol::{
    Frame, FunctionId, Job, LinkEvent, LinkTransport, MessageType, ProtocolError, ResponsePolicy,
    Verdict,
};

/// How long inclusion waits for LEARN_READY before resending
pub const ADD_NODE_TIMEOUT: Duration = Duration::from_millis(3000);

const NODE_MASK_LENGTH_OFFSET: usize = 6;
const NODE_MASK_OFFSET: usize = 7;
/// 29 bytes cover node ids 1-232
const MAX_NODE_MASK_BYTES: usize = 29;

/// Listening flag in the GET_NODE_PROTOCOL_INFO capability byte
const CAPABILITY_LISTENING: u8 = 0x80;
/// Size of a complete GET_NODE_PROTOCOL_INFO response
const PROTOCOL_INFO_LEN: usize = 11;
/// Size of a GET_SUC_NODE_ID response carrying its node id
const SUC_NODE_ID_LEN: usize = 6;

/// Response handling for network management requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPolicy {
    /// Bring-up steps: the same function completes, anything else is a resend
    Strict,
    /// Inclusion start: LEARN_READY completes, otherwise wait and resend
    Inclusion,
    /// Inclusion stop: any ADD_NODE_TO_NETWORK frame completes
    InclusionStop,
    /// The same function completes, anything else is ignored
    SameFunction,
    /// SEND_DATA completes on the short callback frame
    SendData,
}

impl NetworkPolicy {
    /// Policy for a request
    #[must_use]
    pub fn for_request(request: &Frame) -> Self {
        match request.function {
            FunctionId::GetSucNodeId
            | FunctionId::EnableSuc
            | FunctionId::SetSucNodeId
            | FunctionId::SerialApiInitData
            | FunctionId::GetNodeProtocolInfo => NetworkPolicy::Strict,
            FunctionId::AddNodeToNetwork
                if request.parameters.first() == Some(&add_node::STOP) =>
            {
                NetworkPolicy::InclusionStop
            }
            FunctionId::AddNodeToNetwork => NetworkPolicy::Inclusion,
            FunctionId::SendData => NetworkPolicy::SendData,
            _ => NetworkPolicy::SameFunction,
        }
    }
}

impl ResponsePolicy for NetworkPolicy {
    fn evaluate(&mut self, request: &Frame, response: &Frame) -> Verdict {
        let same_function = response.function == request.function;
        match self {
            NetworkPolicy::Strict if same_function => Verdict::Done,
            NetworkPolicy::Strict => Verdict::Resend,
            NetworkPolicy::Inclusion
                if same_function && response.command_class == Some(add_node::LEARN_READY) =>
            {
                Verdict::Done
            }
            NetworkPolicy::Inclusion => Verdict::RetryAfter(ADD_NODE_TIMEOUT),
            NetworkPolicy::SendData if same_function && response.wire_len() - 2 == 5 => {
                Verdict::Done
            }
            NetworkPolicy::InclusionStop | NetworkPolicy::SameFunction if same_function => {
                Verdict::Done
            }
            NetworkPolicy::InclusionStop | NetworkPolicy::SameFunction | NetworkPolicy::SendData => {
                Verdict::Pending
            }
        }
    }
}

/// Node ids set in a SERIAL_API_INIT_DATA response, ascending, without `own_node_id`
///
/// The mask length comes from the response and never runs into the checksum.
#[must_use]
pub fn extract_node_ids(response: &Frame, own_node_id: u8) -> Vec<u8> {
    let bytes = response.serialize();
    let declared = bytes
        .get(NODE_MASK_LENGTH_OFFSET)
        .map_or(0, |&len| usize::from(len))
        .min(MAX_NODE_MASK_BYTES);
    let end = (NODE_MASK_OFFSET + declared).min(bytes.len().saturating_sub(1));
    let mask = bytes.get(NODE_MASK_OFFSET..end).unwrap_or(&[]);

    mask.iter()
        .enumerate()
        .flat_map(|(index, &byte)| {
            (0..8)
                .filter(move |&bit| byte & (1u8 << bit) != 0)
                .map(move |bit| (index * 8 + bit + 1) as u8)
        })
        .filter(|&node_id| node_id != own_node_id)
        .collect()
}

/// SUC node id from a GET_SUC_NODE_ID response; None if the response is too short
#[must_use]
pub fn suc_node_id(response: &Frame) -> Option<u8> {
    if response.wire_len() < SUC_NODE_ID_LEN {
        return None;
    }
    response.byte(4)
}

/// Tracks which enumerated nodes finished initialization
///
/// Ready fires once per controller lifetime, even when discovery reruns.
#[derive(Debug, Default)]
pub struct Readiness {
    expected: BTreeSet<u8>,
    initialized: BTreeSet<u8>,
    enumerated: bool,
    fired: bool,
}

impl Readiness {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the nodes to wait for; returns true if ready fires now
    pub fn enumerate(&mut self, node_ids: &[u8]) -> bool {
        self.expected = node_ids.iter().copied().collect();
        self.enumerated = true;
        self.check()
    }

    /// Record an initialized node
    ///
    /// Returns (first time this node initialized, ready fires now).
    pub fn node_initialized(&mut self, node_id: u8) -> (bool, bool) {
        let newly = self.initialized.insert(node_id);
        (newly, self.check())
    }

    /// Stop waiting for a node; returns true if ready fires now
    pub fn node_dropped(&mut self, node_id: u8) -> bool {
        self.expected.remove(&node_id);
        self.check()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.fired
    }

    fn check(&mut self) -> bool {
        if self.fired || !self.enumerated {
            return false;
        }
        if self.expected.is_subset(&self.initialized) {
            self.fired = true;
            return true;
        }
        false
    }
}

/// A protocol step, tied to the job that carries it out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SucQuery,
    EnableSuc,
    SetSuc,
    Discovery,
    ProtocolInfo(u8),
    WakeUpInterval(u8),
    DeviceInit(u8),
    InclusionStart,
    InclusionStop,
    Reset,
}

impl Step {
    #[must_use]
    pub fn node_id(self) -> Option<u8> {
        match self {
            Step::ProtocolInfo(id) | Step::WakeUpInterval(id) | Step::DeviceInit(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum ControllerCommand {
    Initialize,
    AddNodeStart,
    AddNodeStop,
    Reset,
    Shutdown,
}

enum ControllerMsg {
    StepFinished {
        step: Step,
        function: FunctionId,
        result: Result<Frame, ProtocolError>,
    },
    Command(ControllerCommand),
}

/// Handle for driving the controller task
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerMsg>,
}

impl ControllerHandle {
    /// Start bring-up from the SUC/SIS query
    pub fn initialize(&self) {
        self.command(ControllerCommand::Initialize);
    }

    /// Put the controller in inclusion mode
    pub fn add_node_start(&self) {
        self.command(ControllerCommand::AddNodeStart);
    }

    /// Leave inclusion mode
    pub fn add_node_stop(&self) {
        self.command(ControllerCommand::AddNodeStop);
    }

    /// Factory reset, followed by a fresh bring-up
    pub fn reset(&self) {
        self.command(ControllerCommand::Reset);
    }

    pub fn shutdown(&self) {
        self.command(ControllerCommand::Shutdown);
    }

    fn command(&self, command: ControllerCommand) {
        if self.tx.send(ControllerMsg::Command(command)).is_err() {
            tracing::warn!("Controller task is not running");
        }
    }
}

/// Network-management coordinator for the controller node
pub struct Controller {
    node_id: u8,
    transport: Arc<LinkTransport>,
    registry: DeviceRegistry,
    event_tx: broadcast::Sender<NetworkEvent>,
    readiness: Readiness,
    ready: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<ControllerMsg>,
}

impl Controller {
    /// Start the controller task
    pub fn spawn(
        node_id: u8,
        transport: Arc<LinkTransport>,
        registry: DeviceRegistry,
        event_tx: broadcast::Sender<NetworkEvent>,
        ready: Arc<AtomicBool>,
    ) -> ControllerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let link_rx = transport.subscribe();

        let controller = Self {
            node_id,
            transport,
            registry,
            event_tx,
            readiness: Readiness::new(),
            ready,
            tx: tx.clone(),
        };
        tokio::spawn(controller.run(rx, link_rx));

        ControllerHandle { tx }
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<ControllerMsg>,
        mut link_rx: broadcast::Receiver<LinkEvent>,
    ) {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(ControllerMsg::StepFinished { step, function, result }) => {
                        self.step_finished(step, function, result);
                    }
                    Some(ControllerMsg::Command(ControllerCommand::Shutdown)) | None => break,
                    Some(ControllerMsg::Command(command)) => self.handle_command(command),
                },
                event = link_rx.recv() => match event {
                    Ok(LinkEvent::FrameReceived(frame)) => self.handle_unsolicited(&frame),
                    Ok(LinkEvent::JobCancelled { job, function }) => {
                        tracing::debug!(job = %job, "Link gave up on {}", function);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Controller lagged by {} link events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("Controller task shutting down");
    }

    fn handle_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::Initialize => self.initialize(),
            ControllerCommand::AddNodeStart => {
                tracing::info!("Starting inclusion");
                self.submit(
                    Step::InclusionStart,
                    Frame::request(FunctionId::AddNodeToNetwork).with_parameter(add_node::NODE_ANY),
                );
            }
            ControllerCommand::AddNodeStop => self.add_node_stop(),
            ControllerCommand::Reset => {
                tracing::info!("Resetting controller to factory defaults");
                self.submit(Step::Reset, Frame::request(FunctionId::SetDefault));
            }
            ControllerCommand::Shutdown => {}
        }
    }

    fn initialize(&mut self) {
        tracing::info!("Initializing controller, node id {}", self.node_id);
        self.submit(Step::SucQuery, Frame::request(FunctionId::GetSucNodeId));
    }

    fn add_node_stop(&mut self) {
        tracing::info!("Stopping inclusion");
        self.submit(
            Step::InclusionStop,
            Frame::request(FunctionId::AddNodeToNetwork).with_parameter(add_node::STOP),
        );
    }

    /// Queue a step's job and forward its outcome back to this task
    fn submit(&mut self, step: Step, request: Frame) {
        let function = request.function;
        let policy = NetworkPolicy::for_request(&request);

        match self.transport.send(Job::with_policy(request, policy)) {
            Ok(handle) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = handle.wait().await;
                    let _ = tx.send(ControllerMsg::StepFinished {
                        step,
                        function,
                        result,
                    });
                });
            }
            Err(e) => self.step_failed(step, function, &e),
        }
    }

    fn step_finished(&mut self, step: Step, function: FunctionId, result: Result<Frame, ProtocolError>) {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.step_failed(step, function, &e);
                return;
            }
        };
        tracing::debug!("{:?} finished: {}", step, response);

        match step {
            Step::SucQuery => self.on_suc_query(&response),
            Step::EnableSuc => tracing::info!("SUC enabled"),
            Step::SetSuc => {
                tracing::info!("Controller is now SUC/SIS");
                self.controller_initialized();
                self.discover();
            }
            Step::Discovery => self.on_node_list(&response),
            Step::ProtocolInfo(node_id) => self.on_protocol_info(node_id, &response),
            Step::WakeUpInterval(node_id) => {
                tracing::debug!(node_id, "Wake-up interval set");
            }
            Step::DeviceInit(node_id) => self.on_node_initialized(node_id),
            Step::InclusionStart => tracing::info!("Controller ready to include nodes"),
            Step::InclusionStop => tracing::info!("Inclusion stopped"),
            Step::Reset => {
                tracing::info!("Controller reset, restarting bring-up");
                self.initialize();
            }
        }
    }

    fn step_failed(&mut self, step: Step, function: FunctionId, error: &ProtocolError) {
        tracing::error!("{:?} ({}) failed: {}", step, function, error);
        let _ = self.event_tx.send(NetworkEvent::StepFailed {
            function,
            node_id: step.node_id(),
            reason: error.to_string(),
        });

        if let Step::ProtocolInfo(node_id) | Step::DeviceInit(node_id) = step {
            self.node_dropped(node_id);
        }
    }

    fn on_suc_query(&mut self, response: &Frame) {
        if suc_node_id(response) == Some(self.node_id) {
            tracing::info!("Controller is SUC/SIS");
            self.controller_initialized();
            self.discover();
        } else {
            tracing::info!("Controller is not SUC/SIS, requesting the role");
            self.submit(Step::EnableSuc, Frame::request(FunctionId::EnableSuc));
            self.submit(
                Step::SetSuc,
                Frame::request(FunctionId::SetSucNodeId).with_parameters(&[
                    self.node_id,
                    0x01, // SIS
                    0x00, // no low power
                    SUC_FUNC_NODEID_SERVER,
                ]),
            );
        }
    }

    fn controller_initialized(&self) {
        let _ = self.event_tx.send(NetworkEvent::ControllerInitialized {
            node_id: self.node_id,
        });
    }

    fn discover(&mut self) {
        tracing::info!("Performing node discovery");
        self.submit(Step::Discovery, Frame::request(FunctionId::SerialApiInitData));
    }

    fn on_node_list(&mut self, response: &Frame) {
        let node_ids = extract_node_ids(response, self.node_id);
        if node_ids.is_empty() {
            tracing::warn!("No nodes were found");
        } else {
            tracing::info!("Found {} nodes: {:?}", node_ids.len(), node_ids);
        }

        for &node_id in &node_ids {
            self.submit(
                Step::ProtocolInfo(node_id),
                Frame::request(FunctionId::GetNodeProtocolInfo).with_node(node_id),
            );
        }

        if self.readiness.enumerate(&node_ids) {
            self.fire_ready();
        }
    }

    fn on_protocol_info(&mut self, node_id: u8, response: &Frame) {
        if response.wire_len() < PROTOCOL_INFO_LEN {
            tracing::warn!(node_id, "Protocol info response too short: {}", response);
            self.node_dropped(node_id);
            return;
        }

        let capability = response.byte(4).unwrap_or(0);
        let sleeping = capability & CAPABILITY_LISTENING == 0;
        let basic = response.byte(7).unwrap_or(0);
        let generic = response.byte(8).unwrap_or(0);
        let specific = response.byte(9).unwrap_or(0);

        let _ = self.event_tx.send(NetworkEvent::NodeDiscovered {
            node_id,
            generic_type: generic,
            specific_type: specific,
            sleeping,
        });

        let node = ZWaveNode::new(node_id, sleeping, basic, generic, specific);
        let kind = node.kind;
        let Some(init_request) = kind.get_request(node_id) else {
            tracing::warn!(
                "Unknown node found: node {} generic type {:#04X}",
                node_id,
                generic
            );
            self.node_dropped(node_id);
            return;
        };

        tracing::info!(
            node_id,
            sleeping,
            "Node found: {} specific type {:#04X}",
            kind,
            specific
        );
        if !self.registry.insert_if_absent(node) {
            tracing::debug!(node_id, "Node already known");
        }

        if sleeping {
            self.submit(
                Step::WakeUpInterval(node_id),
                wake_up_interval_set(node_id, WAKE_UP_INTERVAL_SECS, self.node_id),
            );
        }
        self.submit(Step::DeviceInit(node_id), init_request);
    }

    fn on_node_initialized(&mut self, node_id: u8) {
        self.registry.update(node_id, |node| {
            node.initialized = true;
            node.last_seen = Some(Instant::now());
        });
        let _ = self
            .event_tx
            .send(NetworkEvent::NodeInitialized { node_id });

        let (newly, ready) = self.readiness.node_initialized(node_id);
        if newly {
            tracing::info!(node_id, "Node added");
            let _ = self.event_tx.send(NetworkEvent::NodeAdded { node_id });
        }
        if ready {
            self.fire_ready();
        }
    }

    fn node_dropped(&mut self, node_id: u8) {
        if self.readiness.node_dropped(node_id) {
            self.fire_ready();
        }
    }

    fn fire_ready(&self) {
        tracing::info!("Controller ready, {} nodes", self.registry.len());
        self.ready.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(NetworkEvent::ControllerReady);
    }

    fn handle_unsolicited(&mut self, frame: &Frame) {
        match frame.function {
            FunctionId::AddNodeToNetwork if frame.message_type == MessageType::Request => {
                self.on_inclusion_status(frame);
            }
            FunctionId::ApplicationCommandHandler => self.on_application_command(frame),
            _ => tracing::trace!("Not handled here: {}", frame),
        }
    }

    fn on_inclusion_status(&mut self, frame: &Frame) {
        match frame.command_class {
            Some(add_node::STATUS_ADDING_SLAVE) => {
                match frame.byte(add_node::NODE_ID_OFFSET) {
                    Some(node_id)
                        if (1..=MAX_NODE_ID).contains(&node_id) && node_id != self.node_id =>
                    {
                        tracing::info!(node_id, "New node found");
                        self.submit(
                            Step::ProtocolInfo(node_id),
                            Frame::request(FunctionId::GetNodeProtocolInfo).with_node(node_id),
                        );
                    }
                    other => tracing::warn!("Inclusion reported invalid node id {:?}", other),
                }
            }
            Some(add_node::STATUS_PROTOCOL_DONE) => {
                tracing::info!("Inclusion protocol done");
                self.add_node_stop();
            }
            Some(add_node::STATUS_NODE_FOUND) => tracing::info!("Inclusion: node found"),
            Some(add_node::STATUS_FAILED) => tracing::warn!("Inclusion failed"),
            status => tracing::trace!("Inclusion status {:?}", status),
        }
    }

    fn on_application_command(&mut self, frame: &Frame) {
        let (Some(node_id), Some(cc)) = (frame.node_id, frame.command_class) else {
            tracing::trace!("Incomplete application command: {}", frame);
            return;
        };

        match cc {
            command_class::WAKE_UP
            | command_class::SWITCH_BINARY
            | command_class::SWITCH_MULTILEVEL
            | command_class::METER
            | command_class::METER_PULSE
            | command_class::SENSOR_MULTILEVEL
            | command_class::MANUFACTURER_SPECIFIC => {
                tracing::debug!(node_id, "{} from node", command_class::name(cc));
            }
            _ => {
                tracing::trace!(node_id, "Ignoring command class {:#04X}", cc);
                return;
            }
        }

        match self.registry.update(node_id, |node| node.apply_report(frame)) {
            Some(value) => {
                let _ = self.event_tx.send(NetworkEvent::DeviceReport {
                    node_id,
                    command_class: cc,
                    command: frame.command,
                    value,
                });
            }
            None => tracing::debug!(node_id, "Report from unknown node"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zwave_protocol::constants::command;

    fn frame(message_type: MessageType, function: FunctionId, payload: &[u8]) -> Frame {
        Frame::from_payload(message_type, function, payload).unwrap()
    }

    fn init_data(mask: &[u8]) -> Frame {
        let mut payload = vec![0x05, 0x08, MAX_NODE_MASK_BYTES as u8];
        let mut bitmask = mask.to_vec();
        bitmask.resize(MAX_NODE_MASK_BYTES, 0);
        payload.extend_from_slice(&bitmask);
        payload.extend_from_slice(&[0x05, 0x00]);
        frame(MessageType::Response, FunctionId::SerialApiInitData, &payload)
    }

    #[test]
    fn test_node_mask_ascending_without_self() {
        // nodes 1 (controller), 2, 5 and 9
        let response = init_data(&[0b0001_0011, 0b0000_0001]);
        assert_eq!(extract_node_ids(&response, 1), vec![2, 5, 9]);
    }

    #[test]
    fn test_node_mask_last_node() {
        let mut mask = vec![0; MAX_NODE_MASK_BYTES];
        mask[MAX_NODE_MASK_BYTES - 1] = 0x80;
        assert_eq!(extract_node_ids(&init_data(&mask), 1), vec![232]);
    }

    #[test]
    fn test_short_node_mask_stops_before_checksum() {
        // Declares 29 mask bytes but carries only one
        let response = frame(
            MessageType::Response,
            FunctionId::SerialApiInitData,
            &[0x05, 0x08, 0x1D, 0b0000_0110],
        );
        assert_eq!(extract_node_ids(&response, 1), vec![2, 3]);
    }

    #[test]
    fn test_suc_node_id() {
        let own = frame(MessageType::Response, FunctionId::GetSucNodeId, &[0x01]);
        let none = frame(MessageType::Response, FunctionId::GetSucNodeId, &[0x00]);
        assert_eq!(suc_node_id(&own), Some(0x01));
        assert_eq!(suc_node_id(&none), Some(0x00));
    }

    #[test]
    fn test_empty_suc_response_is_not_a_node_id() {
        // Byte 4 of an empty response is its checksum
        let empty = frame(MessageType::Response, FunctionId::GetSucNodeId, &[]);
        assert_eq!(empty.wire_len(), 5);
        assert!(empty.byte(4).is_some());
        assert_eq!(suc_node_id(&empty), None);
    }

    #[test]
    fn test_strict_policy() {
        let request = Frame::request(FunctionId::GetSucNodeId);
        let mut policy = NetworkPolicy::for_request(&request);
        assert_eq!(policy, NetworkPolicy::Strict);

        let matching = frame(MessageType::Response, FunctionId::GetSucNodeId, &[0x01]);
        let other = frame(MessageType::Response, FunctionId::GetVersion, &[0x01]);
        assert_eq!(policy.evaluate(&request, &matching), Verdict::Done);
        assert_eq!(policy.evaluate(&request, &other), Verdict::Resend);
    }

    #[test]
    fn test_inclusion_policy() {
        let request =
            Frame::request(FunctionId::AddNodeToNetwork).with_parameter(add_node::NODE_ANY);
        let mut policy = NetworkPolicy::for_request(&request);
        assert_eq!(policy, NetworkPolicy::Inclusion);

        let ready = frame(
            MessageType::Request,
            FunctionId::AddNodeToNetwork,
            &[0x01, add_node::LEARN_READY, 0x00, 0x00],
        );
        let found = frame(
            MessageType::Request,
            FunctionId::AddNodeToNetwork,
            &[0x01, add_node::STATUS_NODE_FOUND, 0x00, 0x00],
        );
        assert_eq!(policy.evaluate(&request, &ready), Verdict::Done);
        assert_eq!(
            policy.evaluate(&request, &found),
            Verdict::RetryAfter(ADD_NODE_TIMEOUT)
        );
    }

    #[test]
    fn test_inclusion_stop_policy() {
        let request = Frame::request(FunctionId::AddNodeToNetwork).with_parameter(add_node::STOP);
        let mut policy = NetworkPolicy::for_request(&request);
        assert_eq!(policy, NetworkPolicy::InclusionStop);

        let callback = frame(
            MessageType::Request,
            FunctionId::AddNodeToNetwork,
            &[0x01, add_node::STATUS_DONE, 0x00, 0x00],
        );
        let report = frame(
            MessageType::Request,
            FunctionId::ApplicationCommandHandler,
            &[0x00, 0x02, 0x02, command_class::WAKE_UP, 0x07],
        );
        assert_eq!(policy.evaluate(&request, &callback), Verdict::Done);
        assert_eq!(policy.evaluate(&request, &report), Verdict::Pending);
    }

    #[test]
    fn test_send_data_policy_waits_for_callback() {
        let request = crate::device::switch_binary_set(4, true);
        let mut policy = NetworkPolicy::for_request(&request);
        assert_eq!(policy, NetworkPolicy::SendData);

        let response = frame(MessageType::Response, FunctionId::SendData, &[0x01]);
        let callback = frame(MessageType::Request, FunctionId::SendData, &[0x01, 0x00]);
        assert_eq!(policy.evaluate(&request, &response), Verdict::Pending);
        assert_eq!(policy.evaluate(&request, &callback), Verdict::Done);
    }

    #[test]
    fn test_reset_policy_ignores_other_frames() {
        let request = Frame::request(FunctionId::SetDefault);
        let mut policy = NetworkPolicy::for_request(&request);
        let report = frame(
            MessageType::Request,
            FunctionId::ApplicationCommandHandler,
            &[
                0x00,
                0x02,
                0x03,
                command_class::SWITCH_BINARY,
                command::SWITCH_BINARY_REPORT,
                0x00,
            ],
        );
        let done = frame(MessageType::Response, FunctionId::SetDefault, &[0x01]);
        assert_eq!(policy.evaluate(&request, &report), Verdict::Pending);
        assert_eq!(policy.evaluate(&request, &done), Verdict::Done);
    }

    #[test]
    fn test_readiness_fires_once_after_all_nodes() {
        let mut readiness = Readiness::new();
        assert!(!readiness.enumerate(&[2, 5, 9]));

        assert_eq!(readiness.node_initialized(2), (true, false));
        assert_eq!(readiness.node_initialized(2), (false, false));
        assert_eq!(readiness.node_initialized(5), (true, false));
        assert_eq!(readiness.node_initialized(9), (true, true));
        assert_eq!(readiness.node_initialized(9), (false, false));
        assert!(readiness.is_ready());

        // A rerun of discovery does not fire again
        assert!(!readiness.enumerate(&[2, 5, 9]));
    }

    #[test]
    fn test_readiness_without_nodes() {
        let mut readiness = Readiness::new();
        assert!(readiness.enumerate(&[]));
        assert!(!readiness.enumerate(&[]));
    }

    #[test]
    fn test_readiness_skips_dropped_nodes() {
        let mut readiness = Readiness::new();
        readiness.enumerate(&[3, 4]);
        assert_eq!(readiness.node_initialized(3), (true, false));
        assert!(readiness.node_dropped(4));
    }

    #[test]
    fn test_nodes_before_enumeration_do_not_fire() {
        let mut readiness = Readiness::new();
        assert_eq!(readiness.node_initialized(7), (true, false));
        assert!(!readiness.node_dropped(7));
        assert!(readiness.enumerate(&[7]));
    }
}
