//! Device discovery.
//!
//! Two complementary mechanisms share one [`DeviceRegistry`]:
//!
//! - SSDP ([`DiscoveryServer`], [`DiscoveryClient`]): multicast `NOTIFY`
//!   announcements and `M-SEARCH` queries answered over unicast.
//! - Well-known wire resources ([`WellKnownHandler`], [`WireDiscovery`]):
//!   JSON device records served through the request pipeline.

mod client;
mod registry;
mod server;
mod ssdp;
mod wellknown;

use std::net::{SocketAddr, SocketAddrV4};

pub use client::{DeviceContext, DiscoveryClient, SearchHandle};
pub use registry::DeviceRegistry;
pub use server::DiscoveryServer;
pub use ssdp::{SsdpKind, SsdpMessage};
pub use wellknown::{WellKnownHandler, WireDiscovery, device_path, resources_path};

use crate::core::constants::{SSDP_MAX_AGE, SSDP_MULTICAST_V4, SSDP_MX, SSDP_PORT};

/// SSDP settings shared by the discovery server and client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpConfig {
    /// Multicast group and port announcements and searches go to.
    pub multicast_addr: SocketAddr,
    /// `CACHE-CONTROL: max-age` in seconds.
    pub max_age: u32,
    /// `MX` sent with searches.
    pub mx: u32,
    /// Product token for the `SERVER` header when a device names no platform.
    pub product: String,
    /// Prefix of search correlators (`S: <app_id>:<seq>`).
    pub app_id: String,
    /// Address advertised in `LOCATION`; the transport's local address when unset.
    pub description_addr: Option<SocketAddr>,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            multicast_addr: SocketAddr::V4(SocketAddrV4::new(SSDP_MULTICAST_V4, SSDP_PORT)),
            max_age: SSDP_MAX_AGE,
            mx: SSDP_MX,
            product: "thingwire".to_string(),
            app_id: "thingwire".to_string(),
            description_addr: None,
        }
    }
}
