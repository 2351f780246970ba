//! Automatic acknowledgement of confirmable requests.
//!
//! Handlers get [`AUTO_ACK_GRACE`] to write their first response. If they
//! make it, the response rides on the ACK. Otherwise a bare ACK goes out
//! when the grace period ends and the response follows later as a separate
//! confirmable message.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::pipeline::{Capability, Flow, Handler, RequestContext};
use crate::core::Result;
use crate::core::constants::AUTO_ACK_GRACE;
use crate::transport::{Endpoint, Message};

/// Acknowledgement state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// Nothing sent yet.
    Awaiting,
    /// The first response carried the ACK.
    AckedPiggyback,
    /// A bare ACK was sent; responses are separate.
    AckedSeparate,
}

/// Decides once between piggybacked and separate acknowledgement.
pub struct AckGate {
    endpoint: Arc<Endpoint>,
    peer: SocketAddr,
    message_id: u16,
    state: Mutex<AckState>,
    done: watch::Sender<bool>,
}

impl std::fmt::Debug for AckGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckGate")
            .field("peer", &self.peer)
            .field("message_id", &self.message_id)
            .field("state", &self.state())
            .finish()
    }
}

impl AckGate {
    /// Create a gate for the request `message_id` from `peer`.
    pub fn new(endpoint: Arc<Endpoint>, peer: SocketAddr, message_id: u16) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            endpoint,
            peer,
            message_id,
            state: Mutex::new(AckState::Awaiting),
            done,
        }
    }

    /// Current state.
    pub fn state(&self) -> AckState {
        *self.state.lock()
    }

    /// Claim the ACK for a piggybacked response.
    ///
    /// Returns `false` once the gate has decided either way.
    pub fn claim_piggyback(&self) -> bool {
        let mut state = self.state.lock();
        if *state != AckState::Awaiting {
            return false;
        }
        *state = AckState::AckedPiggyback;
        drop(state);

        self.done.send_replace(true);
        true
    }

    /// Grace period over: send a bare ACK unless a response already did.
    ///
    /// The ACK is sent before the state lock is released, so a racing
    /// first write sees `AckedSeparate` only once the ACK is out.
    pub fn elapse(&self) -> bool {
        let mut state = self.state.lock();
        if *state != AckState::Awaiting {
            return false;
        }

        if let Err(e) = self
            .endpoint
            .send(Message::empty_ack(self.message_id), self.peer)
        {
            tracing::warn!(message_id = self.message_id, peer = %self.peer, error = %e, "failed to send ACK");
        } else {
            tracing::debug!(message_id = self.message_id, peer = %self.peer, "sent separate ACK");
        }
        *state = AckState::AckedSeparate;
        drop(state);

        self.done.send_replace(true);
        true
    }

    /// Resolves once the request has been acknowledged either way.
    pub async fn acknowledged(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Pipeline stage arming an [`AckGate`] for every confirmable request.
#[derive(Debug, Clone)]
pub struct AutoAckHandler {
    grace: Duration,
}

impl Default for AutoAckHandler {
    fn default() -> Self {
        Self::new(AUTO_ACK_GRACE)
    }
}

impl AutoAckHandler {
    /// Create a handler with the given grace period.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Grace period.
    pub fn grace(&self) -> Duration {
        self.grace
    }
}

#[async_trait]
impl Handler for AutoAckHandler {
    fn name(&self) -> &'static str {
        "auto-ack"
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::AutoAck]
    }

    async fn invoke(&self, ctx: Arc<RequestContext>) -> Result<Flow> {
        let request = ctx.request();
        let Some(message_id) = request.message_id.filter(|_| request.confirmable) else {
            return Ok(Flow::Continue);
        };

        let gate = Arc::new(AckGate::new(
            Arc::clone(ctx.endpoint()),
            ctx.peer(),
            message_id,
        ));
        if ctx.response().install_gate(Arc::clone(&gate)) {
            let grace = self.grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                gate.elapse();
            });
        }
        Ok(Flow::Continue)
    }
}
