//! Async UDP socket wrapper used as a [`DatagramTransport`].
//!
//! Wraps a tokio [`UdpSocket`] and optionally joins the SSDP multicast
//! group. Sends never await: a full socket buffer is reported as an error
//! and the caller decides what to do with it.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::core::constants::SSDP_TTL;
use crate::core::{DatagramTransport, TransportError};

/// Default receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

/// UDP datagram transport.
#[derive(Debug, Clone)]
pub struct UdpSocketTransport {
    /// The underlying UDP socket.
    socket: Arc<UdpSocket>,
    /// Cached local address.
    local_addr: SocketAddr,
}

impl UdpSocketTransport {
    /// Bind a unicast socket to `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Self::from_socket(socket)
    }

    /// Bind `0.0.0.0:port` and join `group` on `interface`.
    pub async fn bind_multicast(
        group: Ipv4Addr,
        port: u16,
        interface: Ipv4Addr,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
        socket.join_multicast_v4(group, interface)?;
        socket.set_multicast_ttl_v4(SSDP_TTL)?;
        socket.set_multicast_loop_v4(true)?;
        Self::from_socket(socket)
    }

    /// Wrap an existing socket.
    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    /// Receive one datagram into `buf`.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    /// Get a reference to the underlying socket.
    pub fn inner(&self) -> &UdpSocket {
        &self.socket
    }

    /// Get a clone of the Arc-wrapped socket.
    pub fn socket_arc(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

impl DatagramTransport for UdpSocketTransport {
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> Result<(), TransportError> {
        self.socket.try_send_to(datagram, peer)?;
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unicast_roundtrip() {
        let a = UdpSocketTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let b = UdpSocketTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        a.send_to(b"M-SEARCH * HTTP/1.1\r\n\r\n", b.local_addr())
            .unwrap();

        let mut buf = vec![0u8; DEFAULT_RECV_BUFFER_SIZE];
        let (len, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, a.local_addr());
        assert!(buf[..len].starts_with(b"M-SEARCH"));
    }
}
