//! Gateway configuration.
//!
//! [`GatewayConfig`] collects the tunable base values in one place. It can be
//! built in code through [`GatewayConfigBuilder`] or read from TOML:
//!
//! ```
//! use thingwire_protocol::config::GatewayConfig;
//!
//! let config = GatewayConfig::from_toml_str(
//!     r#"
//!     ack_timeout_ms = 1000
//!     max_retransmit = 3
//!     ssdp_app_id = "hub"
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.timing().unwrap().max_retransmit(), 3);
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::core::constants;
use crate::core::Result;
use crate::server::AutoAckHandler;
use crate::transport::TimingParams;

/// Gateway configuration. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// ACK_TIMEOUT.
    pub ack_timeout_ms: u64,

    /// ACK_RANDOM_FACTOR.
    pub ack_random_factor: f64,

    /// MAX_RETRANSMIT.
    pub max_retransmit: u32,

    /// NSTART.
    pub nstart: u32,

    /// DEFAULT_LEISURE.
    pub default_leisure_ms: u64,

    /// PROBING_RATE in bytes per second.
    pub probing_rate: u32,

    /// MAX_LATENCY.
    pub max_latency_ms: u64,

    /// Time handlers get to piggyback a response on the ACK.
    pub auto_ack_grace_ms: u64,

    /// SSDP multicast group.
    pub ssdp_multicast_addr: Ipv4Addr,

    /// SSDP port.
    pub ssdp_port: u16,

    /// `CACHE-CONTROL: max-age` of announcements, in seconds.
    pub ssdp_max_age: u32,

    /// `MX` of searches, in seconds.
    pub ssdp_mx: u32,

    /// Product token for the `SERVER` header.
    pub ssdp_product: String,

    /// Prefix of search correlators.
    pub ssdp_app_id: String,

    /// Address advertised in `LOCATION`.
    pub ssdp_description_addr: Option<SocketAddr>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: millis(constants::DEFAULT_ACK_TIMEOUT),
            ack_random_factor: constants::DEFAULT_ACK_RANDOM_FACTOR,
            max_retransmit: constants::DEFAULT_MAX_RETRANSMIT,
            nstart: constants::DEFAULT_NSTART,
            default_leisure_ms: millis(constants::DEFAULT_LEISURE),
            probing_rate: constants::DEFAULT_PROBING_RATE,
            max_latency_ms: millis(constants::DEFAULT_MAX_LATENCY),
            auto_ack_grace_ms: millis(constants::AUTO_ACK_GRACE),
            ssdp_multicast_addr: constants::SSDP_MULTICAST_V4,
            ssdp_port: constants::SSDP_PORT,
            ssdp_max_age: constants::SSDP_MAX_AGE,
            ssdp_mx: constants::SSDP_MX,
            ssdp_product: "thingwire".to_string(),
            ssdp_app_id: "thingwire".to_string(),
            ssdp_description_addr: None,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl GatewayConfig {
    /// Start a builder seeded with the defaults.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::new()
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Toml`](crate::core::GatewayError::Toml) on
    /// malformed input or unknown keys.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Validate the timing base values.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`](crate::core::GatewayError::Config)
    /// when a value is out of range.
    pub fn timing(&self) -> Result<TimingParams> {
        TimingParams::builder()
            .ack_timeout(Duration::from_millis(self.ack_timeout_ms))
            .ack_random_factor(self.ack_random_factor)
            .max_retransmit(self.max_retransmit)
            .nstart(self.nstart)
            .default_leisure(Duration::from_millis(self.default_leisure_ms))
            .probing_rate(self.probing_rate)
            .max_latency(Duration::from_millis(self.max_latency_ms))
            .build()
    }

    /// Auto-acknowledgement stage with the configured grace period.
    pub fn auto_ack(&self) -> AutoAckHandler {
        AutoAckHandler::new(Duration::from_millis(self.auto_ack_grace_ms))
    }

    /// SSDP settings for the discovery server and client.
    #[cfg(feature = "discovery")]
    pub fn ssdp(&self) -> crate::discovery::SsdpConfig {
        crate::discovery::SsdpConfig {
            multicast_addr: SocketAddr::from((self.ssdp_multicast_addr, self.ssdp_port)),
            max_age: self.ssdp_max_age,
            mx: self.ssdp_mx,
            product: self.ssdp_product.clone(),
            app_id: self.ssdp_app_id.clone(),
            description_addr: self.ssdp_description_addr,
        }
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug, Clone, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a builder with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set ACK_TIMEOUT.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout_ms = millis(timeout);
        self
    }

    /// Set ACK_RANDOM_FACTOR.
    pub fn ack_random_factor(mut self, factor: f64) -> Self {
        self.config.ack_random_factor = factor;
        self
    }

    /// Set MAX_RETRANSMIT.
    pub fn max_retransmit(mut self, count: u32) -> Self {
        self.config.max_retransmit = count;
        self
    }

    /// Set MAX_LATENCY.
    pub fn max_latency(mut self, latency: Duration) -> Self {
        self.config.max_latency_ms = millis(latency);
        self
    }

    /// Set the auto-ack grace period.
    pub fn auto_ack_grace(mut self, grace: Duration) -> Self {
        self.config.auto_ack_grace_ms = millis(grace);
        self
    }

    /// Set the SSDP multicast group and port.
    pub fn ssdp_multicast(mut self, group: Ipv4Addr, port: u16) -> Self {
        self.config.ssdp_multicast_addr = group;
        self.config.ssdp_port = port;
        self
    }

    /// Set the announcement max-age in seconds.
    pub fn ssdp_max_age(mut self, seconds: u32) -> Self {
        self.config.ssdp_max_age = seconds;
        self
    }

    /// Set the `SERVER` product token.
    pub fn ssdp_product(mut self, product: impl Into<String>) -> Self {
        self.config.ssdp_product = product.into();
        self
    }

    /// Set the search correlator prefix.
    pub fn ssdp_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.ssdp_app_id = app_id.into();
        self
    }

    /// Set the address advertised in `LOCATION`.
    pub fn ssdp_description_addr(mut self, addr: SocketAddr) -> Self {
        self.config.ssdp_description_addr = Some(addr);
        self
    }

    /// Validate the timing values and return the configuration.
    pub fn build(self) -> Result<GatewayConfig> {
        self.config.timing()?;
        Ok(self.config)
    }
}
