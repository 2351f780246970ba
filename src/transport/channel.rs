//! In-process transport backed by an unbounded tokio channel.
//!
//! Every send becomes an [`Envelope`] on the receiver returned by
//! [`ChannelTransport::new`]. Hosts use it to wire endpoints together inside
//! one process; tests use it to observe exactly what went on the wire.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::core::{DatagramTransport, MessageTransport, TransportError};
use crate::transport::Message;

/// A payload together with its addressing.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Sender's local address.
    pub from: SocketAddr,
    /// Destination address.
    pub to: SocketAddr,
    /// The message or datagram.
    pub payload: T,
}

/// Channel-backed transport for messages (`T = Message`) or datagrams
/// (`T = Vec<u8>`).
#[derive(Debug, Clone)]
pub struct ChannelTransport<T> {
    local_addr: SocketAddr,
    tx: mpsc::UnboundedSender<Envelope<T>>,
}

impl<T> ChannelTransport<T> {
    /// Create a transport bound to `local_addr` and the receiver of
    /// everything it sends.
    pub fn new(local_addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Envelope<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { local_addr, tx }, rx)
    }

    fn push(&self, payload: T, to: SocketAddr) -> Result<(), TransportError> {
        self.tx
            .send(Envelope {
                from: self.local_addr,
                to,
                payload,
            })
            .map_err(|_| TransportError::Closed)
    }
}

impl MessageTransport for ChannelTransport<Message> {
    fn send(&self, message: &Message, peer: SocketAddr) -> Result<(), TransportError> {
        self.push(message.clone(), peer)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl DatagramTransport for ChannelTransport<Vec<u8>> {
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> Result<(), TransportError> {
        self.push(datagram.to_vec(), peer)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Method;

    #[test]
    fn test_message_envelope() {
        let local: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let (transport, mut rx) = ChannelTransport::<Message>::new(local);

        let msg = Message::request(Method::Get, "/projector");
        transport.send(&msg, peer).unwrap();

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.from, local);
        assert_eq!(envelope.to, peer);
        assert_eq!(envelope.payload, msg);
    }

    #[test]
    fn test_closed_receiver() {
        let local: SocketAddr = "127.0.0.1:1900".parse().unwrap();
        let (transport, rx) = ChannelTransport::<Vec<u8>>::new(local);
        drop(rx);

        let result = transport.send_to(b"NOTIFY", local);
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
