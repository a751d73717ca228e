//! Network configuration

/// Serial ports tried when `ZWAVE_PORTS` is not set
pub const DEFAULT_PORTS: &[&str] = &["/dev/ttyACM0", "/dev/ttyUSB0"];

/// Settings for opening a Z-Wave network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Serial ports to try, in order
    pub preferred_ports: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            preferred_ports: DEFAULT_PORTS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl NetworkConfig {
    /// Read configuration from the environment
    ///
    /// `ZWAVE_PORTS` is a comma separated list of serial ports.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("ZWAVE_PORTS") {
            Ok(value) => Self::from_port_list(&value),
            Err(_) => Self::default(),
        }
    }

    /// Parse a comma separated port list, falling back to the defaults when empty
    #[must_use]
    pub fn from_port_list(value: &str) -> Self {
        let preferred_ports: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|port| !port.is_empty())
            .map(ToString::to_string)
            .collect();

        if preferred_ports.is_empty() {
            Self::default()
        } else {
            Self { preferred_ports }
        }
    }
}
