//! SSDP search client.
//!
//! A search multicasts one `M-SEARCH` tagged with a correlator
//! (`S: <app id>:<seq>`). Unicast responses carrying the same correlator are
//! reported as [`DeviceContext`]s until the [`SearchHandle`] is dropped.
//! There is no retry; callers wanting completeness apply their own timeout.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use super::ssdp::{SsdpKind, SsdpMessage};
use super::SsdpConfig;
use crate::core::constants::{MAN_DISCOVER, ST_ALL, UPNP_UUID};
use crate::core::{CancelToken, DatagramTransport, Result};
use crate::transport::{DEFAULT_RECV_BUFFER_SIZE, UdpSocketTransport};

/// A device that answered a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    /// Address the response came from.
    pub remote: SocketAddr,
    /// Description URL (`LOCATION`). `None` when absent or not a URL.
    pub location: Option<Url>,
    /// Device id (`USN`).
    pub id: Option<String>,
    /// Search target the device answered for (`ST`).
    pub interface: Option<String>,
}

type SearchCallback = Arc<dyn Fn(DeviceContext) + Send + Sync>;

struct Search {
    usn: Option<String>,
    callback: SearchCallback,
}

type SearchTable = Arc<Mutex<HashMap<String, Search>>>;

/// Issues searches and collects their responses.
pub struct DiscoveryClient {
    transport: Arc<dyn DatagramTransport>,
    config: SsdpConfig,
    seq: AtomicU64,
    searches: SearchTable,
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("app_id", &self.config.app_id)
            .field("active_searches", &self.searches.lock().len())
            .finish()
    }
}

impl DiscoveryClient {
    /// Create a client sending through `transport`.
    pub fn new(transport: Arc<dyn DatagramTransport>, config: SsdpConfig) -> Self {
        Self {
            transport,
            config,
            seq: AtomicU64::new(0),
            searches: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Search for `query` (default `ssdp:all`); `callback` runs once per
    /// matching response.
    pub fn probe<F>(&self, query: Option<&str>, callback: F) -> Result<SearchHandle>
    where
        F: Fn(DeviceContext) + Send + Sync + 'static,
    {
        self.search(query.unwrap_or(ST_ALL), None, Arc::new(callback))
    }

    /// Search for one device id; only responses whose `USN` equals `id`
    /// are reported.
    pub fn resolve<F>(&self, id: &str, callback: F) -> Result<SearchHandle>
    where
        F: Fn(DeviceContext) + Send + Sync + 'static,
    {
        let target = format!("{UPNP_UUID}{id}");
        self.search(&target, Some(id.to_string()), Arc::new(callback))
    }

    /// Handle one inbound datagram. Returns `true` if it completed a search
    /// callback.
    pub fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) -> bool {
        let message = match SsdpMessage::parse(datagram) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(from = %from, error = %e, "dropping malformed ssdp datagram");
                return false;
            }
        };
        if !matches!(message.kind(), SsdpKind::Response { .. }) {
            return false;
        }
        let Some(correlator) = message.header("S") else {
            return false;
        };

        let callback = {
            let searches = self.searches.lock();
            let Some(search) = searches.get(correlator) else {
                return false;
            };
            if let Some(usn) = &search.usn {
                if message.header("USN") != Some(usn.as_str()) {
                    return false;
                }
            }
            Arc::clone(&search.callback)
        };

        callback(DeviceContext {
            remote: from,
            location: message.header("LOCATION").and_then(|l| Url::parse(l).ok()),
            id: message.header("USN").map(str::to_string),
            interface: message.header("ST").map(str::to_string),
        });
        true
    }

    /// Receive responses on `socket` until `shutdown` fires.
    pub async fn listen(&self, socket: &UdpSocketTransport, shutdown: CancelToken) -> Result<()> {
        let mut buf = vec![0u8; DEFAULT_RECV_BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    self.handle_datagram(&buf[..len], from);
                }
            }
        }
        Ok(())
    }

    /// Number of searches still collecting.
    pub fn active_searches(&self) -> usize {
        self.searches.lock().len()
    }

    fn search(&self, target: &str, usn: Option<String>, callback: SearchCallback) -> Result<SearchHandle> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let correlator = format!("{}:{}", self.config.app_id, seq);

        self.searches
            .lock()
            .insert(correlator.clone(), Search { usn, callback });
        let handle = SearchHandle {
            correlator: correlator.clone(),
            searches: Arc::clone(&self.searches),
        };

        let message = SsdpMessage::search()
            .with_header("HOST", self.config.multicast_addr.to_string())
            .with_header("MAN", MAN_DISCOVER)
            .with_header("MX", self.config.mx.to_string())
            .with_header("ST", target)
            .with_header("S", correlator.as_str());
        self.transport
            .send_to(&message.to_bytes(), self.config.multicast_addr)?;

        tracing::debug!(search_target = target, correlator = %correlator, "search sent");
        Ok(handle)
    }
}

/// Keeps a search collecting responses. Dropping it ends the search.
pub struct SearchHandle {
    correlator: String,
    searches: SearchTable,
}

impl std::fmt::Debug for SearchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchHandle")
            .field("correlator", &self.correlator)
            .finish()
    }
}

impl SearchHandle {
    /// The `S` correlator of the search.
    pub fn correlator(&self) -> &str {
        &self.correlator
    }
}

impl Drop for SearchHandle {
    fn drop(&mut self) {
        self.searches.lock().remove(&self.correlator);
    }
}
