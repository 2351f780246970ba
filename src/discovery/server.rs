//! SSDP advertiser and search responder.

use std::net::SocketAddr;
use std::sync::Arc;

use url::Url;

use super::registry::DeviceRegistry;
use super::ssdp::{SsdpKind, SsdpMessage};
use super::SsdpConfig;
use crate::core::constants::{
    NTS_ALIVE, NTS_BYEBYE, NTS_UPDATE, ST_ALL, UPNP_DEVICE_DOCUMENT, UPNP_DEVICE_SCHEMA,
    UPNP_PROTOCOL, UPNP_RESOURCE_SCHEMA, UPNP_ROOTDEVICE, UPNP_UUID, UPNP_WELL_KNOWN,
};
use crate::core::{CancelToken, DatagramTransport, GatewayError, Result};
use crate::transport::{DEFAULT_RECV_BUFFER_SIZE, UdpSocketTransport};
use crate::wire::Device;

/// Advertises registered devices and answers searches.
pub struct DiscoveryServer {
    registry: DeviceRegistry,
    transport: Arc<dyn DatagramTransport>,
    config: SsdpConfig,
}

impl std::fmt::Debug for DiscoveryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryServer")
            .field("devices", &self.registry.len())
            .field("local_addr", &self.transport.local_addr())
            .field("multicast", &self.config.multicast_addr)
            .finish()
    }
}

impl DiscoveryServer {
    /// Create an advertiser sending through `transport`.
    pub fn new(
        registry: DeviceRegistry,
        transport: Arc<dyn DatagramTransport>,
        config: SsdpConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            config,
        }
    }

    /// The registry being advertised.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Register `device` and announce it.
    ///
    /// A device whose id is already registered is not replaced; the
    /// announcement describes the stored device.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Validation`] if the id is empty (nothing changes),
    /// or the transport error of an announcement.
    pub fn register(&self, device: Device) -> Result<Device> {
        if device.id().is_empty() {
            return Err(GatewayError::Validation("device id must be specified".into()));
        }

        let (device, inserted) = self.registry.insert_if_absent(device);
        if inserted {
            tracing::info!(device_id = device.id(), "device registered");
        }
        self.announce(&device, NTS_ALIVE)?;
        Ok(device)
    }

    /// Remove a device and say goodbye. Unknown ids are a silent no-op.
    pub fn unregister(&self, id: &str) -> Result<String> {
        let Some(device) = self.registry.remove(id) else {
            return Ok(id.to_string());
        };
        tracing::info!(device_id = %id, "device unregistered");

        let nt = device
            .primary_resource()
            .and_then(|r| r.interface.clone())
            .unwrap_or_else(|| format!("{UPNP_UUID}{id}"));
        let location = match &device.url {
            Some(url) => url.clone(),
            None => self.location(&device)?.to_string(),
        };

        let bye = self
            .notification(NTS_BYEBYE)
            .with_header("NT", nt)
            .with_header("USN", id)
            .with_header("LOCATION", location);
        self.send(&bye, self.config.multicast_addr)?;
        Ok(id.to_string())
    }

    /// Re-announce a registered device with `ssdp:update`.
    ///
    /// Returns `false` for unknown ids.
    pub fn update(&self, id: &str) -> Result<bool> {
        match self.registry.get(id) {
            Some(device) => {
                self.announce(&device, NTS_UPDATE)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Handle one inbound datagram. Returns the number of responses sent.
    ///
    /// A search is answered once per registered device matching its `ST`.
    /// Malformed datagrams are logged and dropped. A response that fails to
    /// go out is logged and the remaining devices are still answered.
    pub fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) -> Result<usize> {
        let message = match SsdpMessage::parse(datagram) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(from = %from, error = %e, "dropping malformed ssdp datagram");
                return Ok(0);
            }
        };

        if *message.kind() != SsdpKind::MSearch {
            return Ok(0);
        }

        let target = message.header("ST").unwrap_or(ST_ALL);
        let mut answered = 0;
        for device in self.registry.list() {
            if !matches_target(&device, target) {
                continue;
            }
            match self.search_response(&message, &device) {
                Ok(response) => match self.send(&response, from) {
                    Ok(()) => answered += 1,
                    Err(e) => {
                        tracing::warn!(from = %from, device_id = device.id(), error = %e, "failed to send search response");
                    }
                },
                Err(e) => {
                    tracing::warn!(device_id = device.id(), error = %e, "cannot describe device");
                }
            }
        }

        tracing::debug!(from = %from, search_target = target, responses = answered, "answered search");
        Ok(answered)
    }

    fn search_response(&self, search: &SsdpMessage, device: &Device) -> Result<SsdpMessage> {
        let mut response = SsdpMessage::ok();
        if let Some(correlator) = search.header("S") {
            response.set_header("S", correlator);
        }
        if let Some(target) = search.header("ST") {
            response.set_header("ST", target);
        }
        Ok(response
            .with_header("USN", device.id())
            .with_header("LOCATION", self.location(device)?.as_str())
            .with_header("SERVER", self.server_header(device))
            .with_header("CACHE-CONTROL", self.cache_control())
            .with_header("EXT", ""))
    }

    /// Receive and answer searches on `socket` until `shutdown` fires.
    pub async fn serve(&self, socket: &UdpSocketTransport, shutdown: CancelToken) -> Result<()> {
        let mut buf = vec![0u8; DEFAULT_RECV_BUFFER_SIZE];
        tracing::info!(local_addr = %socket.local_addr(), "ssdp responder listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    if let Err(e) = self.handle_datagram(&buf[..len], from) {
                        tracing::warn!(from = %from, error = %e, "failed to answer search");
                    }
                }
            }
        }
        Ok(())
    }

    /// Description document URL of `device`.
    ///
    /// The id is percent-encoded as one path segment.
    pub fn location(&self, device: &Device) -> Result<Url> {
        let addr = self
            .config
            .description_addr
            .unwrap_or_else(|| self.transport.local_addr());
        let mut url = Url::parse(&format!("http://{addr}/"))?;
        url.path_segments_mut()
            .map_err(|()| GatewayError::Validation("description address cannot carry a path".into()))?
            .clear()
            .extend(UPNP_WELL_KNOWN.split('/').filter(|s| !s.is_empty()))
            .push(device.id())
            .push(UPNP_DEVICE_DOCUMENT);
        Ok(url)
    }

    fn server_header(&self, device: &Device) -> String {
        format!(
            "{}, {}, {}/{}",
            device.platform_os.as_deref().unwrap_or(std::env::consts::OS),
            UPNP_PROTOCOL,
            device.platform_name.as_deref().unwrap_or(&self.config.product),
            device
                .platform_firmware
                .as_deref()
                .unwrap_or(env!("CARGO_PKG_VERSION")),
        )
    }

    fn cache_control(&self) -> String {
        format!("max-age={}", self.config.max_age)
    }

    fn notification(&self, nts: &str) -> SsdpMessage {
        SsdpMessage::notify()
            .with_header("HOST", self.config.multicast_addr.to_string())
            .with_header("NTS", nts)
            .with_header("CACHE-CONTROL", self.cache_control())
    }

    fn announce(&self, device: &Device, nts: &str) -> Result<()> {
        let uuid = format!("{UPNP_UUID}{}", device.id());
        let mut targets = vec![
            (UPNP_ROOTDEVICE.to_string(), format!("{uuid}::{UPNP_ROOTDEVICE}")),
            (uuid.clone(), uuid.clone()),
        ];
        if let Some(device_type) = &device.device_type {
            let nt = format!("{UPNP_DEVICE_SCHEMA}{device_type}");
            targets.push((nt.clone(), format!("{uuid}::{nt}")));
        }
        for resource_type in device.resources().iter().filter_map(|r| r.resource_type.as_ref()) {
            let nt = format!("{UPNP_RESOURCE_SCHEMA}{resource_type}");
            targets.push((nt.clone(), format!("{uuid}::{nt}")));
        }

        let location = self.location(device)?;
        let server = self.server_header(device);
        for (nt, usn) in targets {
            let message = self
                .notification(nts)
                .with_header("NT", nt)
                .with_header("USN", usn)
                .with_header("LOCATION", location.as_str())
                .with_header("SERVER", server.as_str());
            self.send(&message, self.config.multicast_addr)?;
        }
        tracing::debug!(device_id = device.id(), nts, "announcement burst sent");
        Ok(())
    }

    fn send(&self, message: &SsdpMessage, to: SocketAddr) -> Result<()> {
        self.transport.send_to(&message.to_bytes(), to)?;
        Ok(())
    }
}

/// Check whether `device` answers a search for `target`.
///
/// `ssdp:all` and `upnp:rootdevice` match every device, `uuid:<id>` only
/// that id. Any other target names a device type, resource type or
/// interface, with or without its `urn:schemas.iopa.io:` prefix.
fn matches_target(device: &Device, target: &str) -> bool {
    if target == ST_ALL || target == UPNP_ROOTDEVICE {
        return true;
    }
    if let Some(id) = target.strip_prefix(UPNP_UUID) {
        return id == device.id();
    }

    let device_type = target.strip_prefix(UPNP_DEVICE_SCHEMA).unwrap_or(target);
    if device.device_type.as_deref() == Some(device_type) {
        return true;
    }
    let resource_type = target.strip_prefix(UPNP_RESOURCE_SCHEMA).unwrap_or(target);
    device.resources().iter().any(|r| {
        r.resource_type.as_deref() == Some(resource_type) || r.interface.as_deref() == Some(target)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::core::TransportError;
    use crate::transport::{ChannelTransport, Envelope};
    use crate::wire::Resource;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Refuses the first search response, passes everything else through.
    struct RefuseFirstResponse {
        inner: ChannelTransport<Vec<u8>>,
        refused: AtomicBool,
    }

    impl DatagramTransport for RefuseFirstResponse {
        fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> std::result::Result<(), TransportError> {
            if datagram.starts_with(b"HTTP/1.1 200") && !self.refused.swap(true, Ordering::SeqCst) {
                return Err(TransportError::Rejected("interface down".into()));
            }
            self.inner.send_to(datagram, peer)
        }

        fn local_addr(&self) -> SocketAddr {
            self.inner.local_addr()
        }
    }

    fn server() -> (DiscoveryServer, UnboundedReceiver<Envelope<Vec<u8>>>) {
        let (transport, rx) = ChannelTransport::<Vec<u8>>::new("192.168.1.10:1900".parse().unwrap());
        let server = DiscoveryServer::new(
            DeviceRegistry::new(),
            Arc::new(transport),
            SsdpConfig::default(),
        );
        (server, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Envelope<Vec<u8>>>) -> Vec<(SocketAddr, SsdpMessage)> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            out.push((envelope.to, SsdpMessage::parse(&envelope.payload).unwrap()));
        }
        out
    }

    fn projector() -> Device {
        let mut device = Device::new("12345-67890");
        device.device_type = Some("urn:io.iopa:demo:devices".into());
        device.platform_os = Some("linux".into());
        device.platform_name = Some("IOPA Device Stick".into());
        device.platform_firmware = Some("1.0".into());
        device.url = Some("coap://192.168.1.10:5683".into());
        device.with_resource(Resource {
            resource_type: Some("urn:io.iopa:resource:projector".into()),
            interface: Some("if.switch.binary".into()),
            ..Resource::new("/media/projector")
        })
    }

    #[test]
    fn test_register_requires_id() {
        let (server, mut rx) = server();
        let result = server.register(Device::default());
        assert!(matches!(result, Err(GatewayError::Validation(_))));
        assert!(server.registry().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_register_sends_alive_burst() {
        let (server, mut rx) = server();
        server.register(projector()).unwrap();

        let sent = drain(&mut rx);
        let nts: Vec<_> = sent.iter().map(|(_, m)| m.header("NT").unwrap().to_string()).collect();
        assert_eq!(
            nts,
            vec![
                "upnp:rootdevice",
                "uuid:12345-67890",
                "urn:schemas.iopa.io:device:urn:io.iopa:demo:devices",
                "urn:schemas.iopa.io:resource:urn:io.iopa:resource:projector",
            ]
        );

        let (to, first) = &sent[0];
        assert_eq!(*to, "239.255.255.250:1900".parse().unwrap());
        assert_eq!(first.kind(), &SsdpKind::Notify);
        assert_eq!(first.header("NTS"), Some("ssdp:alive"));
        assert_eq!(first.header("USN"), Some("uuid:12345-67890::upnp:rootdevice"));
        assert_eq!(first.header("CACHE-CONTROL"), Some("max-age=1800"));
        assert_eq!(
            first.header("LOCATION"),
            Some("http://192.168.1.10:1900/iopa/upnp/12345-67890/device.xml")
        );
        assert_eq!(first.header("SERVER"), Some("linux, UPnP/1.0, IOPA Device Stick/1.0"));
    }

    #[test]
    fn test_register_is_idempotent() {
        let (server, mut rx) = server();
        server.register(projector()).unwrap();
        server.register(projector()).unwrap();
        assert_eq!(server.registry().len(), 1);
        assert_eq!(drain(&mut rx).len(), 8);
    }

    #[test]
    fn test_unregister_sends_one_bye() {
        let (server, mut rx) = server();
        server.register(projector()).unwrap();
        drain(&mut rx);

        assert_eq!(server.unregister("12345-67890").unwrap(), "12345-67890");
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        let bye = &sent[0].1;
        assert_eq!(bye.header("NTS"), Some("ssdp:byebye"));
        assert_eq!(bye.header("NT"), Some("if.switch.binary"));
        assert_eq!(bye.header("USN"), Some("12345-67890"));
        assert_eq!(bye.header("LOCATION"), Some("coap://192.168.1.10:5683"));

        server.unregister("12345-67890").unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_search_answered_per_device() {
        let (server, mut rx) = server();
        server.register(projector()).unwrap();
        server.register(Device::new("second")).unwrap();
        drain(&mut rx);

        let search = SsdpMessage::search()
            .with_header("ST", "ssdp:all")
            .with_header("S", "app:7")
            .with_header("MAN", "\"ssdp:discover\"");
        let from: SocketAddr = "192.168.1.20:50000".parse().unwrap();
        assert_eq!(server.handle_datagram(&search.to_bytes(), from).unwrap(), 2);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        let (to, response) = &sent[0];
        assert_eq!(*to, from);
        assert!(matches!(response.kind(), SsdpKind::Response { status: 200, .. }));
        assert_eq!(response.header("S"), Some("app:7"));
        assert_eq!(response.header("ST"), Some("ssdp:all"));
        assert_eq!(response.header("USN"), Some("12345-67890"));
        assert_eq!(response.header("EXT"), Some(""));
        assert_eq!(sent[1].1.header("USN"), Some("second"));
    }

    #[test]
    fn test_malformed_and_notify_ignored() {
        let (server, mut rx) = server();
        server.register(projector()).unwrap();
        drain(&mut rx);

        let from: SocketAddr = "192.168.1.20:50000".parse().unwrap();
        assert_eq!(server.handle_datagram(b"garbage", from).unwrap(), 0);
        let notify = SsdpMessage::notify().with_header("NTS", "ssdp:alive");
        assert_eq!(server.handle_datagram(&notify.to_bytes(), from).unwrap(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_update_burst() {
        let (server, mut rx) = server();
        assert!(!server.update("missing").unwrap());
        server.register(projector()).unwrap();
        drain(&mut rx);

        assert!(server.update("12345-67890").unwrap());
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|(_, m)| m.header("NTS") == Some("ssdp:update")));
    }

    fn search(target: &str) -> Vec<u8> {
        SsdpMessage::search()
            .with_header("ST", target)
            .with_header("S", "app:1")
            .with_header("MAN", "\"ssdp:discover\"")
            .to_bytes()
    }

    #[test]
    fn test_search_filters_by_target() {
        let (server, mut rx) = server();
        server.register(projector()).unwrap();
        let mut lamp = Device::new("lamp");
        lamp.device_type = Some("urn:io.iopa:demo:lamps".into());
        server.register(lamp).unwrap();
        drain(&mut rx);
        let from: SocketAddr = "192.168.1.20:50000".parse().unwrap();

        let cases = [
            ("urn:io.iopa:demo:devices", vec!["12345-67890"]),
            ("urn:schemas.iopa.io:device:urn:io.iopa:demo:lamps", vec!["lamp"]),
            ("uuid:lamp", vec!["lamp"]),
            ("urn:io.iopa:resource:projector", vec!["12345-67890"]),
            ("if.switch.binary", vec!["12345-67890"]),
            ("upnp:rootdevice", vec!["12345-67890", "lamp"]),
            ("urn:io.iopa:demo:nothing", vec![]),
        ];
        for (target, expected) in cases {
            let answered = server.handle_datagram(&search(target), from).unwrap();
            let usns: Vec<_> = drain(&mut rx)
                .into_iter()
                .map(|(_, m)| m.header("USN").unwrap().to_string())
                .collect();
            assert_eq!(usns, expected, "search target {target}");
            assert_eq!(answered, expected.len());
        }
    }

    #[test]
    fn test_failed_response_does_not_stop_search() {
        let (inner, mut rx) = ChannelTransport::<Vec<u8>>::new("192.168.1.10:1900".parse().unwrap());
        let transport = RefuseFirstResponse {
            inner,
            refused: AtomicBool::new(false),
        };
        let server = DiscoveryServer::new(DeviceRegistry::new(), Arc::new(transport), SsdpConfig::default());
        for id in ["a", "b", "c"] {
            server.register(Device::new(id)).unwrap();
        }
        drain(&mut rx);

        let from: SocketAddr = "192.168.1.20:50000".parse().unwrap();
        assert_eq!(server.handle_datagram(&search("ssdp:all"), from).unwrap(), 2);
        let usns: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|(_, m)| m.header("USN").unwrap().to_string())
            .collect();
        assert_eq!(usns, vec!["b", "c"]);
    }

    #[test]
    fn test_location_encodes_id() {
        let (server, _rx) = server();
        let location = server.location(&Device::new("a b/c")).unwrap();
        assert_eq!(
            location.as_str(),
            "http://192.168.1.10:1900/iopa/upnp/a%20b%2Fc/device.xml"
        );
        assert_eq!(location.path_segments().unwrap().nth(2), Some("a%20b%2Fc"));
    }
}
