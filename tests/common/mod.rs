//! Shared test utilities

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thingwire_protocol::transport::{ChannelTransport, Endpoint, Envelope, Message, TimingParams};
use thingwire_protocol::wire::{Device, Policy, Resource};
use tokio::sync::mpsc::UnboundedReceiver;

pub const SERVER_ADDR: &str = "127.0.0.1:5683";
pub const CLIENT_ADDR: &str = "127.0.0.1:40000";

/// Parse a socket address literal
#[must_use]
pub fn addr(s: &str) -> SocketAddr {
    s.parse().expect("valid socket address")
}

/// Two endpoints whose transports deliver into each other.
pub struct Link {
    pub server: Arc<Endpoint>,
    pub client: Arc<Endpoint>,
}

/// Create a server and a client endpoint joined by in-process channels
///
/// Each direction is pumped by a spawned task feeding `handle_inbound`.
#[must_use]
pub fn link() -> Link {
    let (server_transport, server_out) = ChannelTransport::<Message>::new(addr(SERVER_ADDR));
    let (client_transport, client_out) = ChannelTransport::<Message>::new(addr(CLIENT_ADDR));
    let server = Endpoint::new(Arc::new(server_transport), TimingParams::default());
    let client = Endpoint::new(Arc::new(client_transport), TimingParams::default());

    pump(server_out, Arc::clone(&client));
    pump(client_out, Arc::clone(&server));
    Link { server, client }
}

fn pump(mut outbound: UnboundedReceiver<Envelope<Message>>, to: Arc<Endpoint>) {
    tokio::spawn(async move {
        while let Some(envelope) = outbound.recv().await {
            let _ = to.handle_inbound(envelope.payload, envelope.from);
        }
    });
}

/// Poll `condition` until it holds, failing the test after `limit`
pub async fn eventually<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// The projector device used across scenarios
#[must_use]
pub fn projector(id: &str) -> Device {
    let mut device = Device::new(id);
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
