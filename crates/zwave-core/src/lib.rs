//! Z-Wave network layer
//!
//! This crate provides controller bring-up, node management and device
//! control on top of the low-level Z-Wave serial protocol.

pub mod config;
pub mod controller;
pub mod device;
pub mod network;
pub mod registry;

#[cfg(test)]
mod sim;

pub use config::NetworkConfig;
pub use controller::{Controller, ControllerHandle, NetworkPolicy, Readiness};
pub use device::{DeviceKind, ZWaveNode};
pub use network::{NetworkError, NetworkEvent, NetworkStatus, ZWaveNetwork};
pub use registry::DeviceRegistry;
