//! Client-side observe subscriptions.
//!
//! A [`ClientSession`] remembers which callbacks are registered for which
//! topics. Sessions live in a [`SessionStore`]; a non-clean session
//! outlives its connection and is resumed by the next
//! [`SubscriberClient::connect`] with the same client id, which observes
//! every resumed topic again.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::constants::HEADER_OBSERVE;
use crate::core::{GatewayError, Result};
use crate::reliable::ExchangeHandle;
use crate::transport::{Code, Endpoint, Message, Method, Observation};

/// Callback for observe notifications on a topic.
pub type TopicCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Subscription state of one client id.
pub struct ClientSession {
    client_id: String,
    clean: AtomicBool,
    subscriptions: Mutex<HashMap<String, Vec<TopicCallback>>>,
    pending: Mutex<Vec<Message>>,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("client_id", &self.client_id)
            .field("clean", &self.is_clean())
            .field("topics", &self.topics())
            .finish()
    }
}

impl ClientSession {
    fn new(client_id: &str, clean: bool) -> Self {
        Self {
            client_id: client_id.to_string(),
            clean: AtomicBool::new(clean),
            subscriptions: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Check whether the session is discarded on disconnect.
    pub fn is_clean(&self) -> bool {
        self.clean.load(Ordering::Acquire)
    }

    /// Subscribed topics.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.subscriptions.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of callbacks registered for `topic`.
    pub fn callback_count(&self, topic: &str) -> usize {
        self.subscriptions.lock().get(topic).map_or(0, Vec::len)
    }

    /// Queue a message for delivery once the session is connected again.
    pub fn queue(&self, message: Message) {
        self.pending.lock().push(message);
    }

    /// Number of queued messages.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Take every queued message.
    pub fn take_pending(&self) -> Vec<Message> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Append `callback`; returns `true` if it is the first for `topic`.
    fn add(&self, topic: &str, callback: TopicCallback) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let callbacks = subscriptions.entry(topic.to_string()).or_default();
        callbacks.push(callback);
        callbacks.len() == 1
    }

    fn callbacks(&self, topic: &str) -> Vec<TopicCallback> {
        self.subscriptions
            .lock()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    fn clear(&self) {
        self.subscriptions.lock().clear();
        self.pending.lock().clear();
    }
}

/// Sessions by client id. Cloning shares the store.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Arc<ClientSession>>>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session stored under `client_id`.
    pub fn get(&self, client_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.lock().get(client_id).cloned()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Check whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    fn open(&self, client_id: &str, clean: bool) -> (Arc<ClientSession>, bool) {
        let mut sessions = self.sessions.lock();
        if !clean {
            if let Some(session) = sessions.get(client_id) {
                session.clean.store(false, Ordering::Release);
                return (Arc::clone(session), true);
            }
        }
        let session = Arc::new(ClientSession::new(client_id, clean));
        sessions.insert(client_id.to_string(), Arc::clone(&session));
        (session, false)
    }

    fn remove(&self, client_id: &str) {
        self.sessions.lock().remove(client_id);
    }
}

/// One connection of a client session to a server.
pub struct SubscriberClient {
    store: SessionStore,
    session: Arc<ClientSession>,
    endpoint: Arc<Endpoint>,
    peer: SocketAddr,
    observations: Mutex<HashMap<String, Observation>>,
    connected: AtomicBool,
}

impl std::fmt::Debug for SubscriberClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberClient")
            .field("session", &self.session)
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl SubscriberClient {
    /// Connect `client_id` to `peer`.
    ///
    /// With `clean == false` an existing session is resumed and each of its
    /// topics observed again; queued messages are flushed to `peer`.
    pub fn connect(
        store: &SessionStore,
        endpoint: Arc<Endpoint>,
        peer: SocketAddr,
        client_id: &str,
        clean: bool,
    ) -> Result<Self> {
        let (session, resumed) = store.open(client_id, clean);
        let client = Self {
            store: store.clone(),
            session,
            endpoint,
            peer,
            observations: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        };

        if resumed {
            let topics = client.session.topics();
            tracing::info!(client_id, topics = topics.len(), "resuming session");
            for topic in topics {
                client.observe_topic(&topic)?;
            }
            for message in client.session.take_pending() {
                client.endpoint.send(message, peer)?;
            }
        } else {
            tracing::info!(client_id, clean, "new session");
        }
        Ok(client)
    }

    /// The session behind this connection.
    pub fn session(&self) -> &Arc<ClientSession> {
        &self.session
    }

    /// Check whether [`disconnect`](Self::disconnect) has not run yet.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Register `callback` for notifications on `topic`.
    ///
    /// The first callback for a topic sends `GET` with `Observe: 0`.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Result<()>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let first = self.session.add(topic, Arc::new(callback));
        if first || !self.observations.lock().contains_key(topic) {
            self.observe_topic(topic)?;
        }
        Ok(())
    }

    /// Send `message` to the server.
    ///
    /// While disconnected, a non-clean session queues the message for the
    /// next resuming [`connect`](Self::connect) and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Validation`] when a clean session is disconnected,
    /// or the transport error of the send.
    pub fn send(&self, message: Message) -> Result<Option<ExchangeHandle>> {
        if self.is_connected() {
            return self.endpoint.send(message, self.peer);
        }
        if self.session.is_clean() {
            return Err(GatewayError::Validation("clean session is disconnected".into()));
        }
        tracing::debug!(client_id = self.session.client_id(), path = %message.path, "queued for resume");
        self.session.queue(message);
        Ok(None)
    }

    /// End the connection.
    ///
    /// Observations stop in every case; a clean session is also cleared and
    /// removed from the store.
    pub fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        for (_, observation) in self.observations.lock().drain() {
            observation.cancel();
        }
        if self.session.is_clean() {
            self.session.clear();
            self.store.remove(self.session.client_id());
        }
        tracing::info!(client_id = self.session.client_id(), "disconnected");
    }

    fn observe_topic(&self, topic: &str) -> Result<()> {
        let request = Message::request(Method::Get, topic)
            .with_confirmable(true)
            .with_header(HEADER_OBSERVE, "0");

        let session = Arc::clone(&self.session);
        let key = topic.to_string();
        let observation = self.endpoint.observe(request, self.peer, move |reply| {
            if reply.code == Some(Code::CONTENT) && reply.observe().is_some_and(|seq| seq > 0) {
                for callback in session.callbacks(&key) {
                    callback(reply);
                }
            }
        })?;

        let previous = self
            .observations
            .lock()
            .insert(topic.to_string(), observation);
        if let Some(previous) = previous {
            previous.cancel();
        }
        Ok(())
    }
}

impl Drop for SubscriberClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
