//! Thingwire - Transport Layer
//!
//! Everything between a [`Message`] and the wire:
//!
//! - **Timing**: [`TimingParams`], the validated RFC 7252 transmission constants
//! - **Messages**: [`Message`], [`Method`], [`Code`]
//! - **Transports**: [`ChannelTransport`] (in-process) and [`UdpSocketTransport`]
//! - **Endpoint**: [`Endpoint`], which assigns message ids and tokens, drives
//!   confirmable delivery and routes inbound traffic
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Publisher / Subscriber / Discovery    │
//! ├─────────────────────────────────────────┤
//! │        Endpoint + Pipeline              │  ← This module (endpoint)
//! ├─────────────────────────────────────────┤
//! │   Confirmable delivery (reliable)       │
//! ├─────────────────────────────────────────┤
//! │   MessageTransport / DatagramTransport  │
//! └─────────────────────────────────────────┘
//! ```

mod channel;
mod endpoint;
mod message;
mod socket;
mod timing;

pub use channel::{ChannelTransport, Envelope};
pub use endpoint::{Endpoint, ObserveCallback, Observation};
pub use message::{Code, Message, Method};
pub use socket::{DEFAULT_RECV_BUFFER_SIZE, UdpSocketTransport};
pub use timing::{TimingParams, TimingParamsBuilder};
