//! Capability traits consumed from the host's transport.
//!
//! The protocol layer never owns sockets directly. Hosts hand it a
//! [`MessageTransport`] for the CoAP side (binary framing is theirs) and a
//! [`DatagramTransport`] for SSDP text datagrams.

use std::net::SocketAddr;

use super::error::TransportError;
use crate::transport::Message;

/// Sends typed CoAP-style messages to a peer.
///
/// `send` must not block: it either hands the message to the socket or
/// queues it. A failure is reported but the caller decides whether it is
/// fatal (the confirmable engine only logs failed resends).
pub trait MessageTransport: Send + Sync + 'static {
    /// Emit `message` towards `peer`.
    fn send(&self, message: &Message, peer: SocketAddr) -> Result<(), TransportError>;

    /// Local address the transport is bound to.
    fn local_addr(&self) -> SocketAddr;
}

/// Sends raw datagrams, unicast or to a multicast group.
pub trait DatagramTransport: Send + Sync + 'static {
    /// Emit `datagram` towards `peer`.
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> Result<(), TransportError>;

    /// Local address the transport is bound to.
    fn local_addr(&self) -> SocketAddr;
}
