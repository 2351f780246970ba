//! Thingwire projector demo
//!
//! Registers a single projector device, answers SSDP searches on the
//! multicast group and says goodbye on ctrl-c.
//!
//! Environment variables:
//! - THINGWIRE_CONFIG: path to a TOML gateway configuration (optional)
//! - THINGWIRE_INTERFACE: IPv4 address of the interface joining the group
//!   (default 0.0.0.0)
//! - THINGWIRE_LOG: tracing filter (default "info")

use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::Arc;

use thingwire_protocol::config::GatewayConfig;
use thingwire_protocol::core::{CancelSource, GatewayError, Result};
use thingwire_protocol::discovery::{DeviceRegistry, DiscoveryServer};
use thingwire_protocol::transport::UdpSocketTransport;
use thingwire_protocol::wire::{Device, Policy, Resource};
use tracing_subscriber::EnvFilter;

const DEVICE_ID: &str = "12345-67890";

fn projector() -> Device {
    let mut device = Device::new(DEVICE_ID);
    device.manufacturer = Some("Thingwire".to_string());
    device.model_name = Some("Projector".to_string());
    device.device_type = Some("urn:io.iopa:demo:devices".to_string());
    device.with_resource(Resource {
        resource_type: Some("urn:io.iopa:resource:projector".to_string()),
        interface: Some("if.switch.binary".to_string()),
        name: Some("Projector".to_string()),
        value: Some(serde_json::Value::Bool(false)),
        policy: Some(Policy {
            observable: Some(true),
            ..Policy::default()
        }),
        ..Resource::new("/media/projector")
    })
}

fn load_config() -> Result<GatewayConfig> {
    match std::env::var("THINGWIRE_CONFIG") {
        Ok(path) => GatewayConfig::from_toml_str(&std::fs::read_to_string(path)?),
        Err(_) => Ok(GatewayConfig::default()),
    }
}

async fn run() -> Result<()> {
    let config = load_config()?;
    let interface = match std::env::var("THINGWIRE_INTERFACE") {
        Ok(value) => value
            .parse::<Ipv4Addr>()
            .map_err(|e| GatewayError::Config(format!("THINGWIRE_INTERFACE: {e}")))?,
        Err(_) => Ipv4Addr::UNSPECIFIED,
    };

    let socket = Arc::new(
        UdpSocketTransport::bind_multicast(config.ssdp_multicast_addr, config.ssdp_port, interface)
            .await?,
    );
    let server = DiscoveryServer::new(DeviceRegistry::new(), socket.clone(), config.ssdp());

    let device = server.register(projector())?;
    tracing::info!(device_id = device.id(), location = %server.location(&device)?, "projector online");

    let shutdown = CancelSource::new();
    let token = shutdown.token();
    let serving = server.serve(&socket, token);
    tokio::pin!(serving);

    tokio::select! {
        result = &mut serving => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            shutdown.cancel();
            serving.await?;
        }
    }

    server.unregister(DEVICE_ID)?;
    tracing::info!(device_id = DEVICE_ID, "projector offline");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = std::env::var("THINGWIRE_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
