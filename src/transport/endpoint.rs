//! Message endpoint: ids, tokens, confirmable delivery and inbound routing.
//!
//! One [`Endpoint`] sits on one [`MessageTransport`]. Outbound it assigns
//! message ids and tokens and hands confirmable messages to the
//! [`ConfirmableSender`]. Inbound it acknowledges exchanges, answers
//! separate confirmable responses with an empty ACK, completes pending
//! requests and observations by token, and dispatches requests to the
//! server [`Pipeline`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;

use super::{Message, TimingParams};
use crate::core::constants::TOKEN_LENGTH;
use crate::core::{GatewayError, MessageTransport, Result};
use crate::reliable::{ConfirmableSender, ExchangeHandle};
use crate::server::Pipeline;

/// Callback invoked for every reply to an observation.
pub type ObserveCallback = Arc<dyn Fn(&Message) + Send + Sync>;

type ObserverTable = Arc<Mutex<HashMap<Vec<u8>, ObserveCallback>>>;

/// CoAP-style endpoint shared by client and server roles.
pub struct Endpoint {
    transport: Arc<dyn MessageTransport>,
    sender: ConfirmableSender,
    next_message_id: AtomicU16,
    next_token: AtomicU32,
    pending: Mutex<HashMap<Vec<u8>, oneshot::Sender<Message>>>,
    observers: ObserverTable,
    pipeline: OnceLock<Arc<Pipeline>>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("local_addr", &self.local_addr())
            .field("in_flight", &self.sender.in_flight())
            .finish()
    }
}

impl Endpoint {
    /// Create an endpoint on `transport`.
    pub fn new(transport: Arc<dyn MessageTransport>, timing: TimingParams) -> Arc<Self> {
        let mut rng = rand::thread_rng();
        Arc::new(Self {
            transport,
            sender: ConfirmableSender::new(timing),
            next_message_id: AtomicU16::new(rng.r#gen()),
            next_token: AtomicU32::new(rng.r#gen()),
            pending: Mutex::new(HashMap::new()),
            observers: Arc::new(Mutex::new(HashMap::new())),
            pipeline: OnceLock::new(),
        })
    }

    /// Install the pipeline that serves inbound requests.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Config`] if a pipeline is already installed.
    pub fn set_pipeline(&self, pipeline: Pipeline) -> Result<()> {
        self.pipeline
            .set(Arc::new(pipeline))
            .map_err(|_| GatewayError::Config("endpoint already has a pipeline".into()))
    }

    /// Local address of the underlying transport.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// The confirmable delivery engine.
    pub fn sender(&self) -> &ConfirmableSender {
        &self.sender
    }

    /// Timing parameters in use.
    pub fn timing(&self) -> &TimingParams {
        self.sender.timing()
    }

    /// Allocate a message id.
    pub fn next_message_id(&self) -> u16 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate a request token.
    pub fn new_token(&self) -> Vec<u8> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed).to_be_bytes();
        token[..TOKEN_LENGTH.min(token.len())].to_vec()
    }

    /// Send a message, assigning a message id if it has none.
    ///
    /// Confirmable messages are retransmitted until acknowledged; the
    /// returned handle follows that exchange.
    pub fn send(&self, mut message: Message, peer: SocketAddr) -> Result<Option<ExchangeHandle>> {
        let message_id = *message
            .message_id
            .get_or_insert_with(|| self.next_message_id());

        self.transport.send(&message, peer)?;
        tracing::trace!(message_id, peer = %peer, confirmable = message.confirmable, "sent message");

        if !message.confirmable {
            return Ok(None);
        }

        let transport = Arc::clone(&self.transport);
        let handle = self
            .sender
            .start(message_id, move || transport.send(&message, peer));
        Ok(Some(handle))
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// [`GatewayError::DeliveryTimeout`] if neither the exchange nor a
    /// separate response completes within the exchange lifetime.
    pub async fn request(&self, mut message: Message, peer: SocketAddr) -> Result<Message> {
        if message.token.is_empty() {
            message.token = self.new_token();
        }
        let token = message.token.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(token.clone(), tx);

        let handle = match self.send(message, peer) {
            Ok(handle) => handle,
            Err(e) => {
                self.pending.lock().remove(&token);
                return Err(e);
            }
        };

        let lifetime = self.timing().exchange_lifetime();
        let failed = async {
            match &handle {
                Some(handle) => match handle.outcome().await {
                    Err(e) => e,
                    Ok(()) => std::future::pending().await,
                },
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            reply = rx => reply.map_err(|_| GatewayError::Cancelled),
            e = failed => Err(e),
            _ = tokio::time::sleep(lifetime) => Err(GatewayError::DeliveryTimeout { lifetime }),
        };

        self.pending.lock().remove(&token);
        result
    }

    /// Send an observe request; `callback` sees every reply carrying its token.
    pub fn observe<F>(&self, mut message: Message, peer: SocketAddr, callback: F) -> Result<Observation>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        if message.token.is_empty() {
            message.token = self.new_token();
        }
        let token = message.token.clone();
        self.observers
            .lock()
            .insert(token.clone(), Arc::new(callback));

        if let Err(e) = self.send(message, peer) {
            self.observers.lock().remove(&token);
            return Err(e);
        }

        Ok(Observation {
            token,
            peer,
            observers: Arc::clone(&self.observers),
        })
    }

    /// Route one inbound message from `peer`.
    pub fn handle_inbound(self: &Arc<Self>, message: Message, peer: SocketAddr) -> Result<()> {
        if message.ack {
            if let Some(message_id) = message.message_id {
                if self.sender.acknowledge(message_id) {
                    tracing::trace!(message_id, peer = %peer, "exchange acknowledged");
                }
            }
        }

        if message.is_empty_ack() {
            return Ok(());
        }

        if message.is_request() {
            return self.dispatch(message, peer);
        }

        if message.is_response() {
            if message.confirmable {
                if let Some(message_id) = message.message_id {
                    self.transport.send(&Message::empty_ack(message_id), peer)?;
                }
            }
            self.deliver(message, peer);
        }

        Ok(())
    }

    fn dispatch(self: &Arc<Self>, message: Message, peer: SocketAddr) -> Result<()> {
        let Some(pipeline) = self.pipeline.get() else {
            tracing::debug!(peer = %peer, path = %message.path, "no pipeline, dropping request");
            return Ok(());
        };

        let pipeline = Arc::clone(pipeline);
        let endpoint = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.dispatch(endpoint, message, peer).await;
        });
        Ok(())
    }

    fn deliver(&self, message: Message, peer: SocketAddr) {
        let waiter = self.pending.lock().remove(&message.token);
        if let Some(waiter) = waiter {
            let _ = waiter.send(message);
            return;
        }

        let observer = self.observers.lock().get(&message.token).cloned();
        match observer {
            Some(callback) => callback(&message),
            None => tracing::debug!(
                peer = %peer,
                message_id = ?message.message_id,
                "response with unknown token"
            ),
        }
    }
}

/// A registered observation. Cancelling stops callbacks for its token.
#[derive(Clone)]
pub struct Observation {
    token: Vec<u8>,
    peer: SocketAddr,
    observers: ObserverTable,
}

impl std::fmt::Debug for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observation")
            .field("token", &self.token)
            .field("peer", &self.peer)
            .finish()
    }
}

impl Observation {
    /// Token of the observe request.
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Observed peer.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Check whether the observation still receives replies.
    pub fn is_active(&self) -> bool {
        self.observers.lock().contains_key(&self.token)
    }

    /// Stop delivering replies. Idempotent.
    pub fn cancel(&self) -> bool {
        self.observers.lock().remove(&self.token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, Code, Envelope, Method};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn endpoint(port: u16) -> (Arc<Endpoint>, UnboundedReceiver<Envelope<Message>>) {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let (transport, rx) = ChannelTransport::<Message>::new(addr);
        (Endpoint::new(Arc::new(transport), TimingParams::default()), rx)
    }

    #[tokio::test]
    async fn test_send_assigns_message_id() {
        let (ep, mut rx) = endpoint(5683);
        let peer: SocketAddr = "127.0.0.1:6000".parse().unwrap();

        let handle = ep.send(Message::request(Method::Get, "/a"), peer).unwrap();
        assert!(handle.is_none());

        let sent = rx.recv().await.unwrap();
        assert!(sent.payload.message_id.is_some());
        assert_eq!(sent.to, peer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmable_acked_by_inbound_ack() {
        let (ep, mut rx) = endpoint(5683);
        let peer: SocketAddr = "127.0.0.1:6000".parse().unwrap();

        let msg = Message::request(Method::Post, "/a").with_confirmable(true);
        let handle = ep.send(msg, peer).unwrap().unwrap();
        let sent = rx.recv().await.unwrap().payload;

        ep.handle_inbound(Message::empty_ack(sent.message_id.unwrap()), peer)
            .unwrap();
        assert!(handle.outcome().await.is_ok());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_matches_response_by_token() {
        let (ep, mut rx) = endpoint(5683);
        let peer: SocketAddr = "127.0.0.1:6000".parse().unwrap();

        let client = Arc::clone(&ep);
        let request = tokio::spawn(async move {
            client
                .request(Message::request(Method::Get, "/a").with_confirmable(true), peer)
                .await
        });

        let sent = rx.recv().await.unwrap().payload;
        let mut reply = Message::response(Code::CONTENT).with_token(sent.token.clone());
        reply.ack = true;
        reply.message_id = sent.message_id;
        ep.handle_inbound(reply, peer).unwrap();

        let response = request.await.unwrap().unwrap();
        assert_eq!(response.code, Some(Code::CONTENT));
        assert_eq!(ep.sender().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let (ep, _rx) = endpoint(5683);
        let peer: SocketAddr = "127.0.0.1:6000".parse().unwrap();

        let result = ep
            .request(Message::request(Method::Get, "/a").with_confirmable(true), peer)
            .await;
        assert!(matches!(result, Err(GatewayError::DeliveryTimeout { .. })));
    }

    #[tokio::test]
    async fn test_separate_response_is_acknowledged() {
        let (ep, mut rx) = endpoint(5683);
        let peer: SocketAddr = "127.0.0.1:6000".parse().unwrap();

        let mut response = Message::response(Code::CONTENT)
            .with_confirmable(true)
            .with_token(vec![1, 2, 3, 4]);
        response.message_id = Some(77);
        ep.handle_inbound(response, peer).unwrap();

        let ack = rx.recv().await.unwrap();
        assert!(ack.payload.is_empty_ack());
        assert_eq!(ack.payload.message_id, Some(77));
        assert_eq!(ack.to, peer);
    }

    #[tokio::test]
    async fn test_observation_callbacks_until_cancelled() {
        let (ep, mut rx) = endpoint(5683);
        let peer: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let observation = ep
            .observe(Message::request(Method::Get, "/a"), peer, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let sent = rx.recv().await.unwrap().payload;

        let notify = Message::response(Code::CONTENT).with_token(sent.token.clone());
        ep.handle_inbound(notify.clone(), peer).unwrap();
        ep.handle_inbound(notify.clone(), peer).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        assert!(observation.cancel());
        assert!(!observation.cancel());
        ep.handle_inbound(notify, peer).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
