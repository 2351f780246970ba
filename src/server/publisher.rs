//! Server-side observe registry and publish fan-out.
//!
//! A `GET` carrying an `Observe` option registers a subscription for
//! (client address, path) and holds the request open. [`Publisher::publish`]
//! writes a notification to every subscriber of a topic, stamping each with
//! its own, strictly increasing observation sequence number.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::pipeline::{Capability, Flow, Handler, RequestContext};
use super::response::ResponseStream;
use crate::core::constants::HEADER_OBSERVE;
use crate::core::{CancelSource, Result};
use crate::transport::Method;

/// One (client, topic) observation.
struct Subscription {
    stream: Arc<ResponseStream>,
    seq: u32,
    cancel: CancelSource,
}

#[derive(Default)]
struct SubscriptionTable {
    /// client -> topic -> subscription
    clients: HashMap<SocketAddr, HashMap<String, Subscription>>,
    /// topic -> clients, in registration order
    topics: HashMap<String, Vec<SocketAddr>>,
}

/// Observe subscription registry. Cloning shares the table.
#[derive(Clone, Default)]
pub struct Publisher {
    table: Arc<Mutex<SubscriptionTable>>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("Publisher")
            .field("clients", &table.clients.len())
            .field("topics", &table.topics.len())
            .finish()
    }
}

impl Publisher {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline stage that registers observe requests with this publisher.
    pub fn handler(&self) -> ObserveHandler {
        ObserveHandler {
            publisher: self.clone(),
        }
    }

    /// Register the observe request in `ctx`.
    ///
    /// Re-subscribing replaces the held stream and keeps the sequence
    /// counter running; the previously held request is released.
    pub fn subscribe(&self, ctx: &RequestContext) {
        let client = ctx.peer();
        let topic = ctx.request().path.clone();

        let replaced = {
            let mut table = self.table.lock();
            let subscriptions = table.clients.entry(client).or_default();
            let previous = subscriptions.get(&topic).map(|s| (s.seq, s.cancel.clone()));

            subscriptions.insert(
                topic.clone(),
                Subscription {
                    stream: Arc::clone(ctx.response()),
                    seq: previous.as_ref().map_or(1, |(seq, _)| *seq),
                    cancel: ctx.cancel_source().clone(),
                },
            );

            let subscribers = table.topics.entry(topic.clone()).or_default();
            if !subscribers.contains(&client) {
                subscribers.push(client);
            }
            previous.map(|(_, cancel)| cancel)
        };

        if let Some(cancel) = replaced {
            cancel.cancel();
        }
        tracing::info!(client = %client, topic = %topic, "observer registered");
    }

    /// Send `payload` to every subscriber of `topic`.
    ///
    /// Unknown topics and stale subscriber entries are skipped. Each write
    /// failure is logged; the fan-out always continues. Sequence numbers
    /// are assigned and written under the table lock, so concurrent
    /// publishes reach each subscriber in sequence order.
    pub async fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) -> Result<()> {
        let payload = payload.as_ref();
        let outcomes: Vec<(SocketAddr, u32, Result<()>)> = {
            let mut table = self.table.lock();
            let SubscriptionTable { clients, topics } = &mut *table;
            let Some(subscribers) = topics.get(topic) else {
                return Ok(());
            };

            subscribers
                .iter()
                .filter_map(|client| {
                    let subscription = clients.get_mut(client)?.get_mut(topic)?;
                    subscription.seq += 1;
                    let seq = subscription.seq;
                    let written = subscription
                        .stream
                        .write_with_header(HEADER_OBSERVE, seq.to_string(), payload.to_vec())
                        .map(drop);
                    Some((*client, seq, written))
                })
                .collect()
        };

        for (client, seq, written) in outcomes {
            match written {
                Ok(()) => tracing::debug!(client = %client, topic, seq, "notification sent"),
                Err(e) => tracing::warn!(client = %client, topic, error = %e, "notification failed"),
            }
        }
        Ok(())
    }

    /// Drop every subscription of `client` and release its held requests.
    pub fn unsubscribe(&self, client: SocketAddr) {
        let removed = {
            let mut table = self.table.lock();
            let Some(subscriptions) = table.clients.remove(&client) else {
                return;
            };
            for topic in subscriptions.keys() {
                if let Some(subscribers) = table.topics.get_mut(topic) {
                    subscribers.retain(|c| *c != client);
                    if subscribers.is_empty() {
                        table.topics.remove(topic);
                    }
                }
            }
            subscriptions
        };

        for subscription in removed.values() {
            subscription.cancel.cancel();
        }
        tracing::info!(client = %client, topics = removed.len(), "observer removed");
    }

    /// Number of clients subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.table.lock().topics.get(topic).map_or(0, Vec::len)
    }

    /// Current observation sequence of (`client`, `topic`).
    pub fn observation_seq(&self, client: SocketAddr, topic: &str) -> Option<u32> {
        self.table
            .lock()
            .clients
            .get(&client)?
            .get(topic)
            .map(|s| s.seq)
    }
}

/// Pipeline stage registering `GET` + `Observe` requests.
#[derive(Debug, Clone)]
pub struct ObserveHandler {
    publisher: Publisher,
}

#[async_trait]
impl Handler for ObserveHandler {
    fn name(&self) -> &'static str {
        "observe"
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::Observe]
    }

    fn requires(&self) -> &[Capability] {
        &[Capability::AutoAck]
    }

    async fn invoke(&self, ctx: Arc<RequestContext>) -> Result<Flow> {
        let request = ctx.request();
        if request.method == Some(Method::Get) && request.header(HEADER_OBSERVE).is_some() {
            self.publisher.subscribe(&ctx);
            ctx.hold_open();
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{AutoAckHandler, Pipeline};
    use crate::transport::{ChannelTransport, Endpoint, Envelope, Message, TimingParams};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn server() -> (Arc<Endpoint>, Publisher, UnboundedReceiver<Envelope<Message>>) {
        let (transport, rx) = ChannelTransport::<Message>::new("127.0.0.1:5683".parse().unwrap());
        let endpoint = Endpoint::new(Arc::new(transport), TimingParams::default());
        let publisher = Publisher::new();
        let pipeline = Pipeline::builder()
            .handler(AutoAckHandler::default())
            .handler(publisher.handler())
            .build()
            .unwrap();
        endpoint.set_pipeline(pipeline).unwrap();
        (endpoint, publisher, rx)
    }

    fn observe(mid: u16) -> Message {
        let mut msg = Message::request(Method::Get, "/media/projector")
            .with_confirmable(true)
            .with_header(HEADER_OBSERVE, "0")
            .with_token(mid.to_be_bytes().to_vec());
        msg.message_id = Some(mid);
        msg
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_without_subscribers() {
        let (_endpoint, publisher, mut rx) = server();
        publisher.publish("/media/projector", b"on").await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(publisher.subscriber_count("/media/projector"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_to_two_subscribers() {
        let (endpoint, publisher, mut rx) = server();
        let a: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:40002".parse().unwrap();

        endpoint.handle_inbound(observe(1), a).unwrap();
        endpoint.handle_inbound(observe(2), b).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        while rx.try_recv().is_ok() {}

        assert_eq!(publisher.subscriber_count("/media/projector"), 2);
        assert_eq!(publisher.observation_seq(a, "/media/projector"), Some(1));

        publisher.publish("/media/projector", b"on").await.unwrap();

        assert_eq!(publisher.observation_seq(a, "/media/projector"), Some(2));
        assert_eq!(publisher.observation_seq(b, "/media/projector"), Some(2));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.to, a);
        assert_eq!(second.to, b);
        for envelope in [first, second] {
            assert_eq!(envelope.payload.observe(), Some(2));
            assert!(envelope.payload.confirmable);
            assert_eq!(envelope.payload.body, b"on".to_vec());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_is_not_duplicated() {
        let (endpoint, publisher, _rx) = server();
        let a: SocketAddr = "127.0.0.1:40001".parse().unwrap();

        endpoint.handle_inbound(observe(1), a).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        publisher.publish("/media/projector", b"on").await.unwrap();

        endpoint.handle_inbound(observe(3), a).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(publisher.subscriber_count("/media/projector"), 1);
        assert_eq!(publisher.observation_seq(a, "/media/projector"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_releases_request() {
        let (endpoint, publisher, mut rx) = server();
        let a: SocketAddr = "127.0.0.1:40001".parse().unwrap();

        endpoint.handle_inbound(observe(1), a).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        while rx.try_recv().is_ok() {}

        publisher.unsubscribe(a);
        publisher.unsubscribe(a);
        assert_eq!(publisher.subscriber_count("/media/projector"), 0);
        assert_eq!(publisher.observation_seq(a, "/media/projector"), None);

        publisher.publish("/media/projector", b"off").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_keep_sequence_order() {
        let (endpoint, publisher, mut rx) = server();
        let a: SocketAddr = "127.0.0.1:40001".parse().unwrap();

        endpoint.handle_inbound(observe(1), a).unwrap();
        while publisher.subscriber_count("/media/projector") == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        while rx.try_recv().is_ok() {}

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let publisher = publisher.clone();
                tokio::spawn(async move { publisher.publish("/media/projector", b"on").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut seqs = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if envelope.to == a && envelope.payload.body == b"on" {
                seqs.push(envelope.payload.observe().unwrap());
            }
        }
        assert_eq!(seqs, (2..=33).collect::<Vec<u32>>());
        assert_eq!(publisher.observation_seq(a, "/media/projector"), Some(33));
    }
}
