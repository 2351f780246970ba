//! # Thingwire Protocol
//!
//! Gateway-side protocol layer for discovering and talking to IoT devices
//! over constrained, unreliable networks. It provides:
//!
//! - **Reliability**: confirmable messages with exponential-backoff
//!   retransmission and exchange-lifetime expiry (RFC 7252 timing)
//! - **Acknowledgement**: piggybacked or separate ACKs for inbound requests
//! - **Publish/subscribe**: observe relationships with monotonic sequence
//!   numbers, and client sessions that survive reconnects
//! - **Discovery**: SSDP announcements and searches, plus well-known JSON
//!   device records using compact wire keys
//!
//! Binary CoAP framing is not part of the crate. Message-level I/O goes
//! through [`MessageTransport`](core::MessageTransport) and raw datagrams
//! through [`DatagramTransport`](core::DatagramTransport).
//!
//! ## Feature Flags
//!
//! - `discovery` (default): SSDP and well-known wire discovery
//!
//! ## Modules
//!
//! - [`core`]: constants, errors, cancellation and transport traits
//! - [`transport`]: timing parameters, messages, endpoints and transports
//! - [`reliable`]: confirmable delivery engine
//! - [`server`]: request pipeline, auto-ack and the observe publisher
//! - [`client`]: subscriber sessions
//! - [`wire`]: device model and compact wire codec
//! - [`discovery`]: device registry and discovery protocols
//! - [`config`]: gateway configuration
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use thingwire_protocol::prelude::*;
//!
//! # async fn run() -> thingwire_protocol::core::Result<()> {
//! let (transport, _outbound) = ChannelTransport::<Message>::new("127.0.0.1:5683".parse().unwrap());
//! let endpoint = Endpoint::new(Arc::new(transport), TimingParams::default());
//!
//! let publisher = Publisher::new();
//! let pipeline = Pipeline::builder()
//!     .handler(AutoAckHandler::default())
//!     .handler(publisher.handler())
//!     .build()?;
//! endpoint.set_pipeline(pipeline)?;
//!
//! publisher.publish("/media/projector", b"on".to_vec()).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod config;
pub mod core;
pub mod reliable;
pub mod server;
pub mod transport;
pub mod wire;

// Discovery (feature-gated)
#[cfg(feature = "discovery")]
#[cfg_attr(docsrs, doc(cfg(feature = "discovery")))]
pub mod discovery;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::client::{ClientSession, SessionStore, SubscriberClient};
    pub use crate::config::{GatewayConfig, GatewayConfigBuilder};
    pub use crate::reliable::{ConfirmableSender, ExchangeHandle, ExchangeState};
    pub use crate::server::{
        AutoAckHandler, Capability, Flow, Handler, Pipeline, Publisher, RequestContext,
    };
    pub use crate::transport::{
        ChannelTransport, Code, Endpoint, Message, Method, TimingParams, UdpSocketTransport,
    };
    pub use crate::wire::{Device, Policy, Resource};

    #[cfg(feature = "discovery")]
    pub use crate::discovery::{
        DeviceRegistry, DiscoveryClient, DiscoveryServer, SsdpConfig, WellKnownHandler,
        WireDiscovery,
    };
}

pub use core::{GatewayError, Result};
