//! Response stream of one inbound request.
//!
//! The first write is either piggybacked on the ACK or sent as a separate
//! confirmable response, depending on the request's [`AckGate`]. Every
//! later write (observe notifications) is a separate confirmable response
//! with a fresh message id.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::autoack::AckGate;
use crate::core::{GatewayError, Result};
use crate::reliable::ExchangeHandle;
use crate::transport::{Code, Endpoint, Message};

struct StreamState {
    template: Message,
    writes: u32,
    ended: bool,
}

/// Writable response for one request.
pub struct ResponseStream {
    endpoint: Arc<Endpoint>,
    peer: SocketAddr,
    request_message_id: Option<u16>,
    request_confirmable: bool,
    state: Mutex<StreamState>,
    gate: OnceLock<Arc<AckGate>>,
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResponseStream")
            .field("peer", &self.peer)
            .field("writes", &state.writes)
            .field("ended", &state.ended)
            .finish()
    }
}

impl ResponseStream {
    /// Create the response stream for `request` received from `peer`.
    pub fn new(endpoint: Arc<Endpoint>, request: &Message, peer: SocketAddr) -> Self {
        let template = Message::response(Code::CONTENT).with_token(request.token.clone());
        Self {
            endpoint,
            peer,
            request_message_id: request.message_id,
            request_confirmable: request.confirmable,
            state: Mutex::new(StreamState {
                template,
                writes: 0,
                ended: false,
            }),
            gate: OnceLock::new(),
        }
    }

    /// Install the acknowledgement gate. Returns `false` if one is already set.
    pub fn install_gate(&self, gate: Arc<AckGate>) -> bool {
        self.gate.set(gate).is_ok()
    }

    /// The acknowledgement gate, if auto-ack is active for this request.
    pub fn gate(&self) -> Option<&Arc<AckGate>> {
        self.gate.get()
    }

    /// Remote peer.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Set the response code for subsequent writes.
    pub fn set_code(&self, code: Code) {
        self.state.lock().template.code = Some(code);
    }

    /// Response code of subsequent writes.
    pub fn code(&self) -> Option<Code> {
        self.state.lock().template.code
    }

    /// Set a header on subsequent writes.
    pub fn set_header(&self, name: &str, value: impl Into<String>) {
        self.state.lock().template.set_header(name, value);
    }

    /// Header value of the template.
    pub fn header(&self, name: &str) -> Option<String> {
        self.state.lock().template.header(name).map(str::to_string)
    }

    /// Number of writes so far.
    pub fn writes(&self) -> u32 {
        self.state.lock().writes
    }

    /// Check whether anything has been written.
    pub fn is_written(&self) -> bool {
        self.writes() > 0
    }

    /// Check whether the stream was ended.
    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    /// Write one response carrying `body`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Validation`] after [`end`](Self::end), or the
    /// transport error of the send.
    pub fn write(&self, body: impl Into<Vec<u8>>) -> Result<Option<ExchangeHandle>> {
        self.write_message(None, body.into())
    }

    /// Write one response carrying `body` with header `name` set to `value`.
    ///
    /// The header is stamped on this write only, in the same step as the
    /// send, so concurrent writers cannot swap each other's values.
    pub fn write_with_header(
        &self,
        name: &str,
        value: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Result<Option<ExchangeHandle>> {
        self.write_message(Some((name, value.into())), body.into())
    }

    /// Sends while holding the stream state, so writes leave in the order
    /// they were built.
    fn write_message(&self, header: Option<(&str, String)>, body: Vec<u8>) -> Result<Option<ExchangeHandle>> {
        let mut state = self.state.lock();
        if state.ended {
            return Err(GatewayError::Validation("response stream already ended".into()));
        }

        let mut message = state.template.clone();
        message.body = body;
        if let Some((name, value)) = header {
            message.set_header(name, value);
        }

        if state.writes == 0 {
            match self.gate.get() {
                Some(gate) if gate.claim_piggyback() => self.piggyback(&mut message),
                Some(_) => separate(&mut message),
                None if self.request_confirmable => self.piggyback(&mut message),
                None => {
                    message.confirmable = false;
                    message.ack = false;
                    message.message_id = None;
                }
            }
        } else {
            separate(&mut message);
        }

        state.writes += 1;
        self.endpoint.send(message, self.peer)
    }

    /// Write `body` and end the stream.
    pub fn write_final(&self, body: impl Into<Vec<u8>>) -> Result<Option<ExchangeHandle>> {
        let handle = self.write(body)?;
        self.end();
        Ok(handle)
    }

    /// End the stream. Later writes fail.
    pub fn end(&self) {
        self.state.lock().ended = true;
    }

    fn piggyback(&self, message: &mut Message) {
        message.ack = true;
        message.confirmable = false;
        message.message_id = self.request_message_id;
    }
}

fn separate(message: &mut Message) {
    message.ack = false;
    message.confirmable = true;
    message.message_id = None;
}
