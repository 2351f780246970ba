//! Well-known wire discovery resources.
//!
//! `GET /.iopa/resources` lists every registered device with its resource
//! links; `GET /.iopa/device?id=<id>` returns one device's detail record.
//! Both bodies are JSON built from the wire codec. [`WireDiscovery`] is the
//! client side: it walks the listing and fetches each detail record.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::form_urlencoded;

use super::registry::DeviceRegistry;
use crate::core::constants::{WELL_KNOWN_BASE, WELL_KNOWN_DEVICE, WELL_KNOWN_RESOURCES};
use crate::core::{Result, WireError};
use crate::server::{Capability, Flow, Handler, RequestContext};
use crate::transport::{Endpoint, Message, Method};
use crate::wire::{self, Device, DeviceField, ResourceField, WireObject};

/// Path of the resource listing.
pub fn resources_path() -> String {
    format!("{WELL_KNOWN_BASE}{WELL_KNOWN_RESOURCES}")
}

/// Path of the device detail resource.
pub fn device_path() -> String {
    format!("{WELL_KNOWN_BASE}{WELL_KNOWN_DEVICE}")
}

/// Pipeline stage serving the well-known resources from a registry.
#[derive(Debug, Clone)]
pub struct WellKnownHandler {
    registry: DeviceRegistry,
}

impl WellKnownHandler {
    /// Serve `registry`.
    pub fn new(registry: DeviceRegistry) -> Self {
        Self { registry }
    }

    fn listing(&self) -> Value {
        self.registry
            .list()
            .iter()
            .map(|device| {
                Value::Object(wire::to_wire_with(
                    device,
                    DeviceField::SUMMARY,
                    ResourceField::SUMMARY,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl Handler for WellKnownHandler {
    fn name(&self) -> &'static str {
        "well-known"
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::WellKnown]
    }

    async fn invoke(&self, ctx: Arc<RequestContext>) -> Result<Flow> {
        let request = ctx.request();
        if request.method != Some(Method::Get) {
            return Ok(Flow::Continue);
        }

        let body = if request.path == resources_path() {
            self.listing()
        } else if request.path == device_path() {
            let device = request.query_param("id").and_then(|id| self.registry.get(&id));
            match device {
                Some(device) => Value::Object(wire::to_wire(&device, DeviceField::DETAIL)),
                None => return Ok(Flow::Continue),
            }
        } else {
            return Ok(Flow::Continue);
        };

        ctx.response().write_final(serde_json::to_vec(&body)?)?;
        Ok(Flow::Handled)
    }
}

/// Client for the well-known resources of a peer.
#[derive(Debug, Clone)]
pub struct WireDiscovery {
    endpoint: Arc<Endpoint>,
}

impl WireDiscovery {
    /// Create a client on `endpoint`.
    pub fn new(endpoint: Arc<Endpoint>) -> Self {
        Self { endpoint }
    }

    /// Fetch every device `peer` lists, calling `callback` with each one.
    ///
    /// Devices whose detail request fails or whose record does not decode
    /// are logged and skipped. Returns the number reported.
    pub async fn probe<F>(&self, peer: SocketAddr, callback: F) -> Result<usize>
    where
        F: Fn(Device),
    {
        let listing = self.get(&resources_path(), peer).await?;
        let Value::Array(entries) = listing else {
            return Err(WireError::NotAnObject("resource listing").into());
        };

        let mut reported = 0;
        for entry in entries {
            let Value::Object(summary) = entry else {
                continue;
            };
            let Some(id) = summary.get(DeviceField::Id.wire_key()).and_then(Value::as_str) else {
                continue;
            };

            let target = device_target(id);
            let detail = match self.get(&target, peer).await {
                Ok(Value::Object(detail)) => detail,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(peer = %peer, device_id = id, error = %e, "device detail unavailable");
                    continue;
                }
            };

            let device = match wire::from_wire(&merge(summary.clone(), detail)) {
                Ok(device) => device,
                Err(e) => {
                    tracing::warn!(peer = %peer, device_id = id, error = %e, "skipping malformed device record");
                    continue;
                }
            };
            callback(device);
            reported += 1;
        }
        Ok(reported)
    }

    async fn get(&self, target: &str, peer: SocketAddr) -> Result<Value> {
        let request = Message::request(Method::Get, target).with_confirmable(true);
        let response = self.endpoint.request(request, peer).await?;
        match response.code {
            Some(code) if code.is_success() => Ok(serde_json::from_slice(&response.body)?),
            code => Err(crate::core::GatewayError::Validation(format!(
                "{target} answered {}",
                code.map_or_else(|| "nothing".to_string(), |c| c.to_string())
            ))),
        }
    }
}

/// Detail request target for `id`, with the id form-encoded.
fn device_target(id: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("id", id)
        .finish();
    format!("{}?{}", device_path(), query)
}

/// Detail keys win; the listing contributes what the detail lacks (links).
fn merge(mut summary: WireObject, detail: WireObject) -> WireObject {
    summary.extend(detail);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{AutoAckHandler, Pipeline};
    use crate::transport::{ChannelTransport, Code, Envelope, TimingParams};
    use crate::wire::{Policy, Resource};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn registry() -> DeviceRegistry {
        let registry = DeviceRegistry::new();
        let mut device = Device::new("D1");
        device.model_name = Some("Projector".into());
        registry.insert_if_absent(device.with_resource(Resource {
            resource_type: Some("urn:io.iopa:resource:projector".into()),
            interface: Some("if.switch.binary".into()),
            policy: Some(Policy {
                observable: Some(true),
                ..Policy::default()
            }),
            ..Resource::new("/media/projector")
        }));
        registry
    }

    fn server() -> (Arc<Endpoint>, UnboundedReceiver<Envelope<Message>>) {
        let (transport, rx) = ChannelTransport::<Message>::new("127.0.0.1:5683".parse().unwrap());
        let endpoint = Endpoint::new(Arc::new(transport), TimingParams::default());
        let pipeline = Pipeline::builder()
            .handler(AutoAckHandler::default())
            .handler(WellKnownHandler::new(registry()))
            .build()
            .unwrap();
        endpoint.set_pipeline(pipeline).unwrap();
        (endpoint, rx)
    }

    async fn get(target: &str) -> Message {
        let (endpoint, mut rx) = server();
        let mut request = Message::request(Method::Get, target).with_confirmable(true);
        request.message_id = Some(1);
        endpoint
            .handle_inbound(request, "127.0.0.1:40000".parse().unwrap())
            .unwrap();
        rx.recv().await.unwrap().payload
    }

    #[tokio::test]
    async fn test_resource_listing() {
        let response = get("/.iopa/resources").await;
        assert_eq!(response.code, Some(Code::CONTENT));

        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!([{
                "uuid": "D1",
                "links": [{
                    "href": "/media/projector",
                    "rt": "urn:io.iopa:resource:projector",
                    "if": "if.switch.binary",
                    "pol": {"obs": true}
                }]
            }])
        );
    }

    #[tokio::test]
    async fn test_device_detail() {
        let response = get("/.iopa/device?id=D1").await;
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body, serde_json::json!({"uuid": "D1", "mn": "Projector"}));
    }

    #[tokio::test]
    async fn test_unknown_device_falls_through() {
        let response = get("/.iopa/device?id=nope").await;
        assert_eq!(response.code, Some(Code::NOT_FOUND));
    }

    #[test]
    fn test_device_target_encodes_id() {
        assert_eq!(device_target("D1"), "/.iopa/device?id=D1");
        let target = device_target("a&b c=#");
        assert_eq!(target, "/.iopa/device?id=a%26b+c%3D%23");
        let request = Message::request(Method::Get, &target);
        assert_eq!(request.path, device_path());
        assert_eq!(request.query_param("id").as_deref(), Some("a&b c=#"));
    }

    #[test]
    fn test_merge_keeps_links() {
        let serde_json::Value::Object(summary) = serde_json::json!({"uuid": "D1", "links": []}) else {
            unreachable!()
        };
        let serde_json::Value::Object(detail) = serde_json::json!({"uuid": "D1", "mn": "M"}) else {
            unreachable!()
        };
        let merged = merge(summary, detail);
        assert_eq!(merged.len(), 3);
    }
}
