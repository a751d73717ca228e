//! Z-Wave serial API definitions

/// Start of frame
pub const SOF: u8 = 0x01;
/// Frame accepted
pub const ACK: u8 = 0x06;
/// Frame rejected (checksum or parity failure)
pub const NAK: u8 = 0x15;
/// Frame dropped by the controller
pub const CAN: u8 = 0x18;

/// Request the radio to acknowledge the transmission
pub const TRANSMIT_OPTION_ACK: u8 = 0x01;
/// Let the controller pick a route
pub const TRANSMIT_OPTION_AUTO_ROUTE: u8 = 0x04;
/// Transmission options appended to every outgoing frame
pub const TRANSMIT_OPTIONS: u8 = TRANSMIT_OPTION_ACK | TRANSMIT_OPTION_AUTO_ROUTE;

/// Message type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0x00,
    Response = 0x01,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(MessageType::Request),
            0x01 => Ok(MessageType::Response),
            _ => Err(value),
        }
    }
}

/// Serial API function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionId {
    /// Node bitmask and controller capabilities
    SerialApiInitData,
    /// Incoming command class frame from a node
    ApplicationCommandHandler,
    /// Serial API capabilities
    SerialApiGetCapabilities,
    /// Transmit a command class frame to a node
    SendData,
    /// Library version string
    GetVersion,
    /// Home id and controller node id
    MemoryGetId,
    /// Listening flag and device class of a node
    GetNodeProtocolInfo,
    /// Factory reset of the controller
    SetDefault,
    /// Neighbor discovery for a node
    RequestNodeNeighborUpdate,
    /// Inclusion
    AddNodeToNetwork,
    /// Exclusion
    RemoveNodeFromNetwork,
    /// Enable SUC/SIS functionality
    EnableSuc,
    /// Assign the SUC/SIS role
    SetSucNodeId,
    /// Query the current SUC/SIS node
    GetSucNodeId,
    /// Any function code this stack does not drive
    Unknown(u8),
}

impl From<u8> for FunctionId {
    fn from(value: u8) -> Self {
        match value {
            0x02 => FunctionId::SerialApiInitData,
            0x04 => FunctionId::ApplicationCommandHandler,
            0x07 => FunctionId::SerialApiGetCapabilities,
            0x13 => FunctionId::SendData,
            0x15 => FunctionId::GetVersion,
            0x20 => FunctionId::MemoryGetId,
            0x41 => FunctionId::GetNodeProtocolInfo,
            0x42 => FunctionId::SetDefault,
            0x48 => FunctionId::RequestNodeNeighborUpdate,
            0x4A => FunctionId::AddNodeToNetwork,
            0x4B => FunctionId::RemoveNodeFromNetwork,
            0x52 => FunctionId::EnableSuc,
            0x54 => FunctionId::SetSucNodeId,
            0x56 => FunctionId::GetSucNodeId,
            v => FunctionId::Unknown(v),
        }
    }
}

impl From<FunctionId> for u8 {
    fn from(value: FunctionId) -> Self {
        match value {
            FunctionId::SerialApiInitData => 0x02,
            FunctionId::ApplicationCommandHandler => 0x04,
            FunctionId::SerialApiGetCapabilities => 0x07,
            FunctionId::SendData => 0x13,
            FunctionId::GetVersion => 0x15,
            FunctionId::MemoryGetId => 0x20,
            FunctionId::GetNodeProtocolInfo => 0x41,
            FunctionId::SetDefault => 0x42,
            FunctionId::RequestNodeNeighborUpdate => 0x48,
            FunctionId::AddNodeToNetwork => 0x4A,
            FunctionId::RemoveNodeFromNetwork => 0x4B,
            FunctionId::EnableSuc => 0x52,
            FunctionId::SetSucNodeId => 0x54,
            FunctionId::GetSucNodeId => 0x56,
            FunctionId::Unknown(v) => v,
        }
    }
}

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionId::SerialApiInitData => f.write_str("SERIAL_API_INIT_DATA"),
            FunctionId::ApplicationCommandHandler => f.write_str("APPLICATION_COMMAND_HANDLER"),
            FunctionId::SerialApiGetCapabilities => f.write_str("SERIAL_API_GET_CAPABILITIES"),
            FunctionId::SendData => f.write_str("SEND_DATA"),
            FunctionId::GetVersion => f.write_str("GET_VERSION"),
            FunctionId::MemoryGetId => f.write_str("MEMORY_GET_ID"),
            FunctionId::GetNodeProtocolInfo => f.write_str("GET_NODE_PROTOCOL_INFO"),
            FunctionId::SetDefault => f.write_str("SET_DEFAULT"),
            FunctionId::RequestNodeNeighborUpdate => f.write_str("REQUEST_NODE_NEIGHBOR_UPDATE"),
            FunctionId::AddNodeToNetwork => f.write_str("ADD_NODE_TO_NETWORK"),
            FunctionId::RemoveNodeFromNetwork => f.write_str("REMOVE_NODE_FROM_NETWORK"),
            FunctionId::EnableSuc => f.write_str("ENABLE_SUC"),
            FunctionId::SetSucNodeId => f.write_str("SET_SUC_NODE_ID"),
            FunctionId::GetSucNodeId => f.write_str("GET_SUC_NODE_ID"),
            FunctionId::Unknown(v) => write!(f, "UNKNOWN({v:#04X})"),
        }
    }
}

/// Command class IDs
pub mod command_class {
    pub const SWITCH_BINARY: u8 = 0x25;
    pub const SWITCH_MULTILEVEL: u8 = 0x26;
    pub const SENSOR_BINARY: u8 = 0x30;
    pub const SENSOR_MULTILEVEL: u8 = 0x31;
    pub const METER: u8 = 0x32;
    pub const METER_PULSE: u8 = 0x35;
    pub const MANUFACTURER_SPECIFIC: u8 = 0x72;
    pub const WAKE_UP: u8 = 0x84;

    /// Human readable name for logging
    #[must_use]
    pub fn name(command_class: u8) -> &'static str {
        match command_class {
            SWITCH_BINARY => "SWITCH_BINARY",
            SWITCH_MULTILEVEL => "SWITCH_MULTILEVEL",
            SENSOR_BINARY => "SENSOR_BINARY",
            SENSOR_MULTILEVEL => "SENSOR_MULTILEVEL",
            METER => "METER",
            METER_PULSE => "METER_PULSE",
            MANUFACTURER_SPECIFIC => "MANUFACTURER_SPECIFIC",
            WAKE_UP => "WAKE_UP",
            _ => "UNKNOWN",
        }
    }
}

/// Commands within their command class
pub mod command {
    pub const WAKE_UP_INTERVAL_SET: u8 = 0x04;

    pub const SWITCH_BINARY_SET: u8 = 0x01;
    pub const SWITCH_BINARY_GET: u8 = 0x02;
    pub const SWITCH_BINARY_REPORT: u8 = 0x03;

    pub const SWITCH_MULTILEVEL_SET: u8 = 0x01;
    pub const SWITCH_MULTILEVEL_GET: u8 = 0x02;
    pub const SWITCH_MULTILEVEL_REPORT: u8 = 0x03;

    pub const SENSOR_BINARY_GET: u8 = 0x02;

    pub const METER_REPORT_GET: u8 = 0x01;
}

/// ADD_NODE_TO_NETWORK modes and callback statuses.
///
/// The status travels in the command class position of the frame.
pub mod add_node {
    pub const NODE_ANY: u8 = 0x01;
    pub const STOP: u8 = 0x05;

    pub const LEARN_READY: u8 = 0x01;
    pub const STATUS_NODE_FOUND: u8 = 0x02;
    pub const STATUS_ADDING_SLAVE: u8 = 0x03;
    pub const STATUS_PROTOCOL_DONE: u8 = 0x05;
    pub const STATUS_DONE: u8 = 0x06;
    pub const STATUS_FAILED: u8 = 0x07;

    /// Offset of the included node id in an ADD_NODE_TO_NETWORK callback
    pub const NODE_ID_OFFSET: usize = 6;
}

/// Generic device classes
pub mod generic_type {
    pub const SWITCH_BINARY: u8 = 0x10;
    pub const SWITCH_MULTILEVEL: u8 = 0x11;
    pub const SENSOR_BINARY: u8 = 0x20;
    pub const SENSOR_MULTILEVEL: u8 = 0x21;
    pub const METER: u8 = 0x31;
}

/// Switch values
pub mod value {
    pub const ON: u8 = 0xFF;
    pub const OFF: u8 = 0x00;
}

/// SUC capability flag sent with SET_SUC_NODE_ID
pub const SUC_FUNC_NODEID_SERVER: u8 = 0x01;

/// Wake-up interval assigned to sleeping nodes (seconds)
pub const WAKE_UP_INTERVAL_SECS: u32 = 600;

/// Highest node id in a Z-Wave network
pub const MAX_NODE_ID: u8 = 232;
