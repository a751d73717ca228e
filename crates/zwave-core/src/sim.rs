//! Scripted Z-Wave controller for exercising the host stack over an in-memory link

use tokio::sync::mpsc;
use zwave_protocol::constants::{add_node, ACK, NAK, SOF};
use zwave_protocol::{Frame, FunctionId, LinkPeer, MessageType};

pub(crate) const HOME_ID: u32 = 0xC0FF_EE01;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SimNode {
    pub id: u8,
    pub listening: bool,
    pub generic: u8,
    /// Reported by SERIAL_API_INIT_DATA (false for nodes that join later)
    pub in_mask: bool,
}

impl SimNode {
    pub fn listening(id: u8, generic: u8) -> Self {
        Self {
            id,
            listening: true,
            generic,
            in_mask: true,
        }
    }

    pub fn sleeping(id: u8, generic: u8) -> Self {
        Self {
            listening: false,
            ..Self::listening(id, generic)
        }
    }
}

pub(crate) struct StickSimulator {
    pub node_id: u8,
    pub suc_node: u8,
    pub nodes: Vec<SimNode>,
    /// Requests with this function are NAKed
    pub refuse: Option<FunctionId>,
}

pub(crate) struct SimHandle {
    /// Every frame the host sent, in order
    pub requests: mpsc::UnboundedReceiver<Frame>,
    /// Frames to push to the host unprompted
    pub inject: mpsc::UnboundedSender<Frame>,
}

enum SimInput {
    Host(Option<Vec<u8>>),
    Inject(Option<Frame>),
}

fn response(function: FunctionId, payload: &[u8]) -> Frame {
    Frame::from_payload(MessageType::Response, function, payload).unwrap()
}

fn callback(function: FunctionId, payload: &[u8]) -> Frame {
    Frame::from_payload(MessageType::Request, function, payload).unwrap()
}

impl StickSimulator {
    pub fn new(nodes: Vec<SimNode>) -> Self {
        Self {
            node_id: 1,
            suc_node: 0,
            nodes,
            refuse: None,
        }
    }

    pub fn spawn(self, mut peer: LinkPeer) -> SimHandle {
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (inject, mut inject_rx) = mpsc::unbounded_channel::<Frame>();

        tokio::spawn(async move {
            loop {
                let input = tokio::select! {
                    written = peer.recv() => SimInput::Host(written),
                    frame = inject_rx.recv() => SimInput::Inject(frame),
                };

                match input {
                    SimInput::Host(None) | SimInput::Inject(None) => break,
                    SimInput::Host(Some(bytes)) => {
                        // Link-level bytes from the host
                        if bytes.first() != Some(&SOF) {
                            continue;
                        }
                        let Ok(request) = Frame::deserialize(&bytes) else {
                            let _ = peer.send(&[NAK]).await;
                            continue;
                        };
                        let refused = self.refuse == Some(request.function);
                        let replies = self.replies(&request);
                        let _ = request_tx.send(request);

                        if refused {
                            let _ = peer.send(&[NAK]).await;
                            continue;
                        }
                        let _ = peer.send(&[ACK]).await;
                        for reply in replies {
                            let _ = peer.send(&reply.serialize()).await;
                        }
                    }
                    SimInput::Inject(Some(frame)) => {
                        let _ = peer.send(&frame.serialize()).await;
                    }
                }
            }
        });

        SimHandle { requests, inject }
    }

    fn replies(&self, request: &Frame) -> Vec<Frame> {
        match request.function {
            FunctionId::MemoryGetId => {
                let [a, b, c, d] = HOME_ID.to_be_bytes();
                vec![response(FunctionId::MemoryGetId, &[a, b, c, d, self.node_id])]
            }
            FunctionId::GetVersion => {
                vec![response(FunctionId::GetVersion, b"Z-Wave 4.05\0\x01")]
            }
            FunctionId::GetSucNodeId => vec![response(FunctionId::GetSucNodeId, &[self.suc_node])],
            FunctionId::EnableSuc | FunctionId::SetSucNodeId => {
                vec![response(request.function, &[0x01])]
            }
            FunctionId::SerialApiInitData => vec![self.init_data()],
            FunctionId::GetNodeProtocolInfo => {
                let node_id = request.byte(4).unwrap_or(0);
                let payload = match self.nodes.iter().find(|node| node.id == node_id) {
                    Some(node) => {
                        let capability = if node.listening { 0xD3 } else { 0x53 };
                        [capability, 0x1C, 0x00, 0x04, node.generic, 0x01]
                    }
                    None => [0x00; 6],
                };
                vec![response(FunctionId::GetNodeProtocolInfo, &payload)]
            }
            FunctionId::SendData => vec![
                response(FunctionId::SendData, &[0x01]),
                callback(FunctionId::SendData, &[0x00, 0x00]),
            ],
            FunctionId::SetDefault => vec![callback(FunctionId::SetDefault, &[0x01])],
            FunctionId::AddNodeToNetwork => {
                let status = if request.parameters.first() == Some(&add_node::STOP) {
                    add_node::STATUS_DONE
                } else {
                    add_node::LEARN_READY
                };
                vec![callback(
                    FunctionId::AddNodeToNetwork,
                    &[0x01, status, 0x00, 0x00],
                )]
            }
            _ => Vec::new(),
        }
    }

    fn init_data(&self) -> Frame {
        let mut mask = [0u8; 29];
        let members = self
            .nodes
            .iter()
            .filter(|node| node.in_mask)
            .map(|node| node.id)
            .chain(std::iter::once(self.node_id));
        for id in members {
            let index = usize::from(id - 1);
            mask[index / 8] |= 1 << (index % 8);
        }

        let mut payload = vec![0x05, 0x08, 29];
        payload.extend_from_slice(&mask);
        payload.extend_from_slice(&[0x05, 0x00]);
        response(FunctionId::SerialApiInitData, &payload)
    }
}

/// APPLICATION_COMMAND_HANDLER frame from `node_id`
pub(crate) fn application_command(node_id: u8, command_class: u8, command: u8, value: u8) -> Frame {
    callback(
        FunctionId::ApplicationCommandHandler,
        &[0x00, node_id, 0x03, command_class, command, value],
    )
}

/// ADD_NODE_TO_NETWORK status callback
pub(crate) fn inclusion_status(status: u8, node_id: u8) -> Frame {
    callback(FunctionId::AddNodeToNetwork, &[0x01, status, node_id, 0x00])
}
