//! Protocol constants for Thingwire.
//!
//! Values here are fixed by the CoAP (RFC 7252) transmission model and the
//! UPnP/SSDP discovery conventions. Tunable timing lives in
//! [`TimingParams`](crate::transport::TimingParams).

use std::net::Ipv4Addr;
use std::time::Duration;

// =============================================================================
// COAP TRANSMISSION DEFAULTS (RFC 7252 §4.8)
// =============================================================================

/// Default ACK_TIMEOUT.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default ACK_RANDOM_FACTOR.
pub const DEFAULT_ACK_RANDOM_FACTOR: f64 = 1.5;

/// Default MAX_RETRANSMIT.
pub const DEFAULT_MAX_RETRANSMIT: u32 = 4;

/// Default NSTART (outstanding interactions per peer).
pub const DEFAULT_NSTART: u32 = 1;

/// Default DEFAULT_LEISURE for multicast responses.
pub const DEFAULT_LEISURE: Duration = Duration::from_secs(5);

/// Default PROBING_RATE in bytes per second.
pub const DEFAULT_PROBING_RATE: u32 = 1;

/// Default MAX_LATENCY: longest a datagram is expected to be in flight.
pub const DEFAULT_MAX_LATENCY: Duration = Duration::from_secs(100);

/// Upper bound accepted for MAX_RETRANSMIT (keeps `2^n` well inside f64).
pub const MAX_RETRANSMIT_LIMIT: u32 = 20;

// =============================================================================
// SERVER AUTO-ACK
// =============================================================================

/// Time the handler chain gets to piggyback its response on the ACK.
pub const AUTO_ACK_GRACE: Duration = Duration::from_millis(50);

// =============================================================================
// COAP OPTIONS AND CODES
// =============================================================================

/// Observe option, carried as a header.
pub const HEADER_OBSERVE: &str = "Observe";

/// Token length used by endpoints when minting request tokens.
pub const TOKEN_LENGTH: usize = 4;

// =============================================================================
// SSDP (UPnP Device Architecture 1.0)
// =============================================================================

/// SSDP IPv4 multicast group.
pub const SSDP_MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// SSDP port.
pub const SSDP_PORT: u16 = 1900;

/// CACHE-CONTROL value for announcements.
pub const SSDP_MAX_AGE: u32 = 1800;

/// Multicast TTL for announcements.
pub const SSDP_TTL: u32 = 128;

/// MX (seconds a device may wait before answering a search).
pub const SSDP_MX: u32 = 2;

/// Notification subtype: resource became available.
pub const NTS_ALIVE: &str = "ssdp:alive";

/// Notification subtype: resource is leaving.
pub const NTS_BYEBYE: &str = "ssdp:byebye";

/// Notification subtype: resource description changed.
pub const NTS_UPDATE: &str = "ssdp:update";

/// MAN value for searches (quotes are part of the value).
pub const MAN_DISCOVER: &str = "\"ssdp:discover\"";

/// Search target matching everything.
pub const ST_ALL: &str = "ssdp:all";

/// Abstract root device notification type.
pub const UPNP_ROOTDEVICE: &str = "upnp:rootdevice";

/// Prefix for device-type notification types.
pub const UPNP_DEVICE_SCHEMA: &str = "urn:schemas.iopa.io:device:";

/// Prefix for resource-type notification types.
pub const UPNP_RESOURCE_SCHEMA: &str = "urn:schemas.iopa.io:resource:";

/// Prefix for unique service names.
pub const UPNP_UUID: &str = "uuid:";

/// Protocol token used in the SERVER header.
pub const UPNP_PROTOCOL: &str = "UPnP/1.0";

/// Path under which device descriptions are served.
pub const UPNP_WELL_KNOWN: &str = "/iopa/upnp";

/// Description document name.
pub const UPNP_DEVICE_DOCUMENT: &str = "device.xml";

// =============================================================================
// WELL-KNOWN WIRE DISCOVERY RESOURCES
// =============================================================================

/// Root of the well-known discovery resources.
pub const WELL_KNOWN_BASE: &str = "/.iopa";

/// Resource listing endpoint (relative to [`WELL_KNOWN_BASE`]).
pub const WELL_KNOWN_RESOURCES: &str = "/resources";

/// Device detail endpoint (relative to [`WELL_KNOWN_BASE`]), queried by `?id=`.
pub const WELL_KNOWN_DEVICE: &str = "/device";
