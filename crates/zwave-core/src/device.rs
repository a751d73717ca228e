//! Z-Wave node representation

use serde::{Deserialize, Serialize};
use std::time::Instant;
use zwave_protocol::constants::{command, command_class, generic_type, value};
use zwave_protocol::{Frame, FunctionId};

/// Highest level accepted by SWITCH_MULTILEVEL_SET
pub const MAX_LEVEL: u8 = 99;

/// Offset of the reported value in an APPLICATION_COMMAND_HANDLER frame
const REPORT_VALUE_OFFSET: usize = 9;

/// Device behaviour selected from the generic device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    SwitchBinary,
    SensorBinary,
    Meter,
    SwitchMultilevel,
    Unknown,
}

impl DeviceKind {
    /// Map a generic device class to a device kind
    ///
    /// Multilevel sensors are driven as binary sensors.
    #[must_use]
    pub fn from_generic_type(generic: u8) -> Self {
        match generic {
            generic_type::SWITCH_BINARY => DeviceKind::SwitchBinary,
            generic_type::SENSOR_BINARY | generic_type::SENSOR_MULTILEVEL => {
                DeviceKind::SensorBinary
            }
            generic_type::METER => DeviceKind::Meter,
            generic_type::SWITCH_MULTILEVEL => DeviceKind::SwitchMultilevel,
            _ => DeviceKind::Unknown,
        }
    }

    /// Command class and GET command used to read the current value
    #[must_use]
    pub fn get_command(self) -> Option<(u8, u8)> {
        match self {
            DeviceKind::SwitchBinary => {
                Some((command_class::SWITCH_BINARY, command::SWITCH_BINARY_GET))
            }
            DeviceKind::SwitchMultilevel => Some((
                command_class::SWITCH_MULTILEVEL,
                command::SWITCH_MULTILEVEL_GET,
            )),
            DeviceKind::SensorBinary => {
                Some((command_class::SENSOR_BINARY, command::SENSOR_BINARY_GET))
            }
            DeviceKind::Meter => Some((command_class::METER, command::METER_REPORT_GET)),
            DeviceKind::Unknown => None,
        }
    }

    /// Request that reads the node's current value
    #[must_use]
    pub fn get_request(self, node_id: u8) -> Option<Frame> {
        self.get_command()
            .map(|(cc, cmd)| send_data(node_id, cc, cmd, &[]))
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceKind::SwitchBinary => "binary switch",
            DeviceKind::SensorBinary => "binary sensor",
            DeviceKind::Meter => "meter",
            DeviceKind::SwitchMultilevel => "multilevel switch",
            DeviceKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A node on the Z-Wave network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZWaveNode {
    /// Node id (1-232)
    pub node_id: u8,
    /// Battery powered node that only listens after waking up
    pub is_sleeping: bool,
    pub basic_type: u8,
    pub generic_type: u8,
    pub specific_type: u8,
    pub kind: DeviceKind,
    /// Last value reported or set
    #[serde(default)]
    pub state: Option<u8>,
    /// Command class of the last report
    #[serde(default)]
    pub last_report_class: Option<u8>,
    /// Initialization GET completed
    pub initialized: bool,
    /// Last time the node was heard from
    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl ZWaveNode {
    /// Create a node from its protocol info
    #[must_use]
    pub fn new(
        node_id: u8,
        is_sleeping: bool,
        basic_type: u8,
        generic_type: u8,
        specific_type: u8,
    ) -> Self {
        Self {
            node_id,
            is_sleeping,
            basic_type,
            generic_type,
            specific_type,
            kind: DeviceKind::from_generic_type(generic_type),
            state: None,
            last_report_class: None,
            initialized: false,
            last_seen: None,
        }
    }

    /// Record an APPLICATION_COMMAND_HANDLER report; returns the reported value
    pub fn apply_report(&mut self, frame: &Frame) -> Option<u8> {
        let reported = frame.byte(REPORT_VALUE_OFFSET);
        // The last byte of a frame is its checksum, not a value
        let reported = reported.filter(|_| REPORT_VALUE_OFFSET + 1 < frame.wire_len());
        self.last_seen = Some(Instant::now());
        self.last_report_class = frame.command_class;
        if reported.is_some() {
            self.state = reported;
        }
        reported
    }

    /// Switch state, if known
    #[must_use]
    pub fn is_on(&self) -> Option<bool> {
        self.state.map(|level| level != value::OFF)
    }

    /// Display name for logs
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("node {} ({})", self.node_id, self.kind)
    }
}

/// SEND_DATA request carrying a command class frame
#[must_use]
pub fn send_data(node_id: u8, command_class: u8, command: u8, params: &[u8]) -> Frame {
    Frame::request(FunctionId::SendData)
        .with_node(node_id)
        .with_command(command_class, command)
        .with_parameters(params)
}

/// SWITCH_BINARY_SET with on (0xFF) or off (0x00)
#[must_use]
pub fn switch_binary_set(node_id: u8, on: bool) -> Frame {
    let level = if on { value::ON } else { value::OFF };
    send_data(
        node_id,
        command_class::SWITCH_BINARY,
        command::SWITCH_BINARY_SET,
        &[level],
    )
}

/// SWITCH_MULTILEVEL_SET, level capped at 99 unless it is 0xFF (restore last level)
#[must_use]
pub fn switch_multilevel_set(node_id: u8, level: u8) -> Frame {
    let level = if level == value::ON {
        level
    } else {
        level.min(MAX_LEVEL)
    };
    send_data(
        node_id,
        command_class::SWITCH_MULTILEVEL,
        command::SWITCH_MULTILEVEL_SET,
        &[level],
    )
}

/// WAKE_UP_INTERVAL_SET: 24-bit interval in seconds, then the node to notify
#[must_use]
pub fn wake_up_interval_set(node_id: u8, seconds: u32, notify_node: u8) -> Frame {
    let [_, high, mid, low] = seconds.to_be_bytes();
    send_data(
        node_id,
        command_class::WAKE_UP,
        command::WAKE_UP_INTERVAL_SET,
        &[high, mid, low, notify_node],
    )
}
