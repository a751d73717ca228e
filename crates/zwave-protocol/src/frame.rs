//! Z-Wave serial API frame structure and checksum handling

use crate::constants::{command_class, FunctionId, MessageType, SOF, TRANSMIT_OPTIONS};
use crate::types::ProtocolError;
use bytes::Bytes;
use std::fmt;

/// Minimum frame size: sof(1) + len(1) + type(1) + function(1) + checksum(1) = 5
pub const MIN_FRAME_SIZE: usize = 5;

/// Offset of the first byte after the function code
pub const PAYLOAD_OFFSET: usize = 4;

/// Z-Wave serial API frame
///
/// Frame format:
/// ```text
/// [SOF: 0x01]
/// [Length: 1 byte] (total frame size minus SOF and length)
/// [Type: 1 byte] (0x00 request, 0x01 response)
/// [Function: 1 byte]
/// [Node ID: 1 byte, optional]
/// [Magic, Command Class, Command: 3 bytes, optional]
/// [Parameters: variable]
/// [Transmit Options: 1 byte] (outgoing frames only)
/// [Checksum: 1 byte] (XOR of bytes 1.. seeded with 0xFF)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub function: FunctionId,
    pub node_id: Option<u8>,
    pub command_class: Option<u8>,
    pub command: Option<u8>,
    pub parameters: Vec<u8>,
    /// Bytes the frame was parsed from (received frames only)
    raw: Option<Bytes>,
}

impl Frame {
    /// Create a new frame without addressing or parameters
    #[must_use]
    pub fn new(message_type: MessageType, function: FunctionId) -> Self {
        Self {
            message_type,
            function,
            node_id: None,
            command_class: None,
            command: None,
            parameters: Vec::new(),
            raw: None,
        }
    }

    /// Create a request frame
    #[must_use]
    pub fn request(function: FunctionId) -> Self {
        Self::new(MessageType::Request, function)
    }

    /// Address the frame to a node (0 leaves it unaddressed)
    #[must_use]
    pub fn with_node(mut self, node_id: u8) -> Self {
        self.node_id = (node_id != 0).then_some(node_id);
        self
    }

    /// Attach a command class and command (command class 0 leaves the group out)
    #[must_use]
    pub fn with_command(mut self, command_class: u8, command: u8) -> Self {
        self.command_class = (command_class != 0).then_some(command_class);
        self.command = Some(command);
        self
    }

    /// Append a parameter byte
    #[must_use]
    pub fn with_parameter(mut self, param: u8) -> Self {
        self.parameters.push(param);
        self
    }

    /// Append parameter bytes
    #[must_use]
    pub fn with_parameters(mut self, params: &[u8]) -> Self {
        self.parameters.extend_from_slice(params);
        self
    }

    /// Build a frame the way the controller sends it: no transmit options byte.
    ///
    /// The result is parsed back, so its fields follow the receive-side layout.
    #[allow(clippy::missing_errors_doc)]
    pub fn from_payload(
        message_type: MessageType,
        function: FunctionId,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        let length = u8::try_from(payload.len() + 3).map_err(|_| {
            ProtocolError::InvalidFrame(format!("payload of {} bytes", payload.len()))
        })?;

        let mut data = Vec::with_capacity(payload.len() + MIN_FRAME_SIZE);
        data.push(SOF);
        data.push(length);
        data.push(message_type as u8);
        data.push(function.into());
        data.extend_from_slice(payload);
        data.push(Self::calculate_checksum(&data));

        Self::deserialize(&data)
    }

    /// Serialize frame to wire bytes
    ///
    /// A parsed frame reproduces the bytes it was parsed from.
    #[must_use]
    #[allow(clippy::missing_panics_doc)] // Panic only on protocol-violating parameter size
    pub fn serialize(&self) -> Vec<u8> {
        if let Some(raw) = &self.raw {
            return raw.to_vec();
        }

        let mut data = Vec::with_capacity(self.parameters.len() + 11);

        // Header, length filled in below
        data.push(SOF);
        data.push(0x00);
        data.push(self.message_type as u8);
        data.push(self.function.into());

        if let Some(node_id) = self.node_id.filter(|&id| id != 0) {
            data.push(node_id);
        }

        if let Some(cc) = self.command_class.filter(|&cc| cc != 0) {
            data.push(Self::magic_byte(cc));
            data.push(cc);
            data.push(self.command.unwrap_or(0));
        }

        data.extend_from_slice(&self.parameters);
        data.push(TRANSMIT_OPTIONS);

        // Length covers everything after itself, checksum included
        data[1] = u8::try_from(data.len() - 1).expect("frame exceeds protocol maximum");

        let checksum = Self::calculate_checksum(&data);
        data.push(checksum);

        data
    }

    /// Deserialize frame from wire bytes
    #[allow(clippy::missing_errors_doc)]
    pub fn deserialize(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < MIN_FRAME_SIZE {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }

        // Verify checksum first
        let (body, trailer) = data.split_at(data.len() - 1);
        let calculated = Self::calculate_checksum(body);
        if trailer[0] != calculated {
            return Err(ProtocolError::ChecksumInvalid {
                expected: calculated,
                actual: trailer[0],
            });
        }

        if data[0] != SOF {
            return Err(ProtocolError::InvalidFrame(format!(
                "Expected SOF, got {:#04X}",
                data[0]
            )));
        }

        let expected_total = usize::from(data[1]) + 2;
        if expected_total != data.len() {
            return Err(ProtocolError::InvalidFrame(format!(
                "Frame length mismatch: header says {} (+2 = {}), actual {}",
                data[1],
                expected_total,
                data.len()
            )));
        }

        let message_type = MessageType::try_from(data[2]).map_err(|v| {
            ProtocolError::InvalidFrame(format!("Unknown message type: {v:#04X}"))
        })?;
        let function = FunctionId::from(data[3]);

        // Field positions depend on the function; the checksum is never a field
        let at = |index: usize| body.get(index).copied().filter(|&b| b != 0);
        let (command_class, command) = match function {
            FunctionId::SendData => (at(4), None),
            FunctionId::ApplicationCommandHandler => (at(7), body.get(8).copied()),
            FunctionId::AddNodeToNetwork | FunctionId::RemoveNodeFromNetwork => (at(5), None),
            _ => (None, None),
        };

        let node_id = match message_type {
            MessageType::Request => at(5),
            MessageType::Response => None,
        };

        Ok(Self {
            message_type,
            function,
            node_id,
            command_class,
            command,
            parameters: body[PAYLOAD_OFFSET..].to_vec(),
            raw: Some(Bytes::copy_from_slice(data)),
        })
    }

    /// Calculate the XOR checksum of everything after the SOF byte
    #[must_use]
    pub fn calculate_checksum(data: &[u8]) -> u8 {
        data.iter().skip(1).fold(0xFF, |acc, &b| acc ^ b)
    }

    /// The byte written before the command class
    ///
    /// Meter classes use 0x02, everything else 0x03.
    #[must_use]
    pub fn magic_byte(command_class: u8) -> u8 {
        match command_class {
            command_class::METER | command_class::METER_PULSE => 0x02,
            _ => 0x03,
        }
    }

    /// Bytes this frame was parsed from
    #[must_use]
    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    /// Byte at a fixed wire offset
    #[must_use]
    pub fn byte(&self, offset: usize) -> Option<u8> {
        match &self.raw {
            Some(raw) => raw.get(offset).copied(),
            None => self.serialize().get(offset).copied(),
        }
    }

    /// Total size on the wire
    #[must_use]
    pub fn wire_len(&self) -> usize {
        match &self.raw {
            Some(raw) => raw.len(),
            None => self.serialize().len(),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.message_type {
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
        };
        write!(f, "{kind} {}", self.function)?;
        if let Some(node_id) = self.node_id {
            write!(f, " node={node_id}")?;
        }
        if let Some(cc) = self.command_class {
            write!(f, " cc={}({cc:#04X})", command_class::name(cc))?;
        }
        if let Some(command) = self.command {
            write!(f, " cmd={command:#04X}")?;
        }
        write!(f, " [{:02X?}]", self.serialize())
    }
}
