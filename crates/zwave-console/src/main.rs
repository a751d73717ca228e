//! Z-Wave Console - brings up a Z-Wave controller and logs network activity

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zwave_core::{NetworkConfig, NetworkEvent, ZWaveNetwork};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "zwave_console=debug,zwave_core=debug,zwave_protocol=debug,info".into()
            }),
        )
        .init();

    tracing::info!("Starting Z-Wave console");

    let config = NetworkConfig::from_env();
    let include = std::env::var("ZWAVE_INCLUDE").is_ok();

    tracing::info!("Opening controller on {:?}", config.preferred_ports);
    let network = Arc::new(ZWaveNetwork::connect(&config).await?);
    let mut events = network.subscribe();

    match network.get_version().await {
        Ok(version) => tracing::info!("Controller library: {}", version),
        Err(e) => tracing::warn!("Failed to query library version: {}", e),
    }

    let status = network.status();
    tracing::info!(
        "Network status: port={:?}, home id={}, node id={}",
        status.port,
        status.home_id,
        status.node_id
    );

    network.initialize();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => handle_event(&network, &event, include),
                Err(RecvError::Lagged(n)) => tracing::warn!("Missed {} network events", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    network.close();
    Ok(())
}

fn handle_event(network: &ZWaveNetwork, event: &NetworkEvent, include: bool) {
    match event {
        NetworkEvent::ControllerInitialized { node_id } => {
            tracing::info!("Controller {} holds the SUC/SIS role", node_id);
            if include {
                network.add_node_start();
            }
        }
        NetworkEvent::NodeDiscovered {
            node_id,
            generic_type,
            specific_type,
            sleeping,
        } => tracing::info!(
            "Discovered node {}: generic {:#04X} specific {:#04X}{}",
            node_id,
            generic_type,
            specific_type,
            if *sleeping { " (sleeping)" } else { "" }
        ),
        NetworkEvent::NodeInitialized { node_id } => {
            tracing::debug!("Node {} initialized", node_id);
        }
        NetworkEvent::NodeAdded { node_id } => tracing::info!("Node {} added", node_id),
        NetworkEvent::ControllerReady => {
            let devices = network.get_devices();
            match serde_json::to_string_pretty(&devices) {
                Ok(json) => tracing::info!("Network ready, devices:\n{}", json),
                Err(e) => tracing::warn!("Failed to encode device list: {}", e),
            }
        }
        NetworkEvent::DeviceReport {
            node_id,
            command_class,
            value,
            ..
        } => tracing::info!(
            "Report from node {}: class {:#04X} value {:?}",
            node_id,
            command_class,
            value
        ),
        NetworkEvent::StepFailed {
            function,
            node_id,
            reason,
        } => tracing::error!("{} failed for node {:?}: {}", function, node_id, reason),
    }
}
