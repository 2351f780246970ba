//! Retransmission engine.
//!
//! The engine owns the exchange table. Every exchange gets a driver task that
//! sleeps on two timers (the next retry and the absolute exchange lifetime)
//! and on the exchange's state channel, so an acknowledgement or a cancel
//! that lands first always wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::exchange::{Exchange, ExchangeState};
use crate::core::{GatewayError, Result, TransportError};
use crate::transport::TimingParams;

type ResendFn = Arc<dyn Fn() -> std::result::Result<(), TransportError> + Send + Sync>;

/// Shared state of one exchange: the bookkeeping plus a state broadcast.
struct ExchangeCell {
    exchange: Mutex<Exchange>,
    state: watch::Sender<ExchangeState>,
}

impl ExchangeCell {
    /// The single entry point for terminal transitions.
    fn finish(&self, terminal: ExchangeState) -> bool {
        let changed = self.exchange.lock().finish(terminal);
        if changed {
            self.state.send_replace(terminal);
        }
        changed
    }

    fn publish(&self) {
        let state = self.exchange.lock().state();
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn state(&self) -> ExchangeState {
        *self.state.borrow()
    }
}

struct Inner {
    timing: TimingParams,
    exchanges: Mutex<HashMap<u16, Arc<ExchangeCell>>>,
    next_seq: AtomicU64,
}

impl Inner {
    fn remove(&self, message_id: u16, cell: &Arc<ExchangeCell>) {
        let mut exchanges = self.exchanges.lock();
        if exchanges
            .get(&message_id)
            .is_some_and(|current| Arc::ptr_eq(current, cell))
        {
            exchanges.remove(&message_id);
        }
    }
}

/// Drives retransmission of confirmable messages.
///
/// Cloning is cheap; clones share the exchange table.
#[derive(Clone)]
pub struct ConfirmableSender {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConfirmableSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmableSender")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl ConfirmableSender {
    /// Create an engine using `timing`.
    pub fn new(timing: TimingParams) -> Self {
        Self {
            inner: Arc::new(Inner {
                timing,
                exchanges: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Timing parameters in use.
    pub fn timing(&self) -> &TimingParams {
        &self.inner.timing
    }

    /// Start retransmitting a message that has just been sent once.
    ///
    /// `resend` re-emits the original message. A previous exchange for the
    /// same message id is cancelled. Must be called inside a tokio runtime.
    pub fn start<F>(&self, message_id: u16, resend: F) -> ExchangeHandle
    where
        F: Fn() -> std::result::Result<(), TransportError> + Send + Sync + 'static,
    {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let exchange = Exchange::new(
            message_id,
            seq,
            self.inner.timing.initial_backoff(),
            self.inner.timing.max_retransmit(),
        );
        let (state, _) = watch::channel(exchange.state());
        let cell = Arc::new(ExchangeCell {
            exchange: Mutex::new(exchange),
            state,
        });

        let replaced = self
            .inner
            .exchanges
            .lock()
            .insert(message_id, Arc::clone(&cell));
        if let Some(previous) = replaced {
            previous.finish(ExchangeState::Cancelled);
        }

        tokio::spawn(drive(
            Arc::clone(&self.inner),
            Arc::clone(&cell),
            Arc::new(resend),
        ));

        ExchangeHandle {
            message_id,
            lifetime: self.inner.timing.exchange_lifetime(),
            cell,
        }
    }

    /// Mark the exchange for `message_id` acknowledged.
    ///
    /// Returns `false` if nothing was in flight under that id.
    pub fn acknowledge(&self, message_id: u16) -> bool {
        self.finish(message_id, ExchangeState::Acked)
    }

    /// Cancel the exchange for `message_id`. Idempotent.
    pub fn cancel(&self, message_id: u16) -> bool {
        self.finish(message_id, ExchangeState::Cancelled)
    }

    /// State of the exchange for `message_id`, while it is in the table.
    pub fn state(&self, message_id: u16) -> Option<ExchangeState> {
        self.inner
            .exchanges
            .lock()
            .get(&message_id)
            .map(|cell| cell.state())
    }

    /// Number of exchanges still in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.exchanges.lock().len()
    }

    fn finish(&self, message_id: u16, terminal: ExchangeState) -> bool {
        let cell = self.inner.exchanges.lock().remove(&message_id);
        match cell {
            Some(cell) => cell.finish(terminal),
            None => false,
        }
    }
}

async fn drive(inner: Arc<Inner>, cell: Arc<ExchangeCell>, resend: ResendFn) {
    let lifetime = tokio::time::sleep(inner.timing.exchange_lifetime());
    tokio::pin!(lifetime);
    let mut state_rx = cell.state.subscribe();

    let (message_id, seq) = {
        let exchange = cell.exchange.lock();
        (exchange.message_id(), exchange.seq())
    };

    loop {
        let next = cell.exchange.lock().next_timer();
        cell.publish();
        state_rx.borrow_and_update();
        if cell.state().is_terminal() {
            break;
        }

        let retry = async {
            match next {
                Some(interval) => tokio::time::sleep(interval).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() || cell.state().is_terminal() {
                    break;
                }
            }
            _ = &mut lifetime => {
                if cell.finish(ExchangeState::GivenUp) {
                    tracing::warn!(
                        message_id,
                        seq,
                        lifetime = ?inner.timing.exchange_lifetime(),
                        "confirmable message never acknowledged, giving up"
                    );
                }
                break;
            }
            _ = retry => {
                let fire = {
                    let mut exchange = cell.exchange.lock();
                    let due = exchange.on_retry_timer();
                    let attempt = exchange.attempts();
                    due.then_some(attempt)
                };
                if let Some(attempt) = fire {
                    match resend() {
                        Ok(()) => tracing::debug!(message_id, seq, attempt, "resent confirmable message"),
                        Err(e) => tracing::warn!(message_id, seq, attempt, error = %e, "resend failed"),
                    }
                }
            }
        }
    }

    inner.remove(message_id, &cell);
}

/// Caller's view of an exchange.
pub struct ExchangeHandle {
    message_id: u16,
    lifetime: Duration,
    cell: Arc<ExchangeCell>,
}

impl std::fmt::Debug for ExchangeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeHandle")
            .field("message_id", &self.message_id)
            .field("state", &self.state())
            .finish()
    }
}

impl ExchangeHandle {
    /// Message id of the exchange.
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    /// Current state.
    pub fn state(&self) -> ExchangeState {
        self.cell.state()
    }

    /// Resends performed so far.
    pub fn attempts(&self) -> u32 {
        self.cell.exchange.lock().attempts()
    }

    /// Cancel this exchange. Idempotent.
    pub fn cancel(&self) -> bool {
        self.cell.finish(ExchangeState::Cancelled)
    }

    /// Wait for the exchange to finish.
    ///
    /// # Errors
    ///
    /// [`GatewayError::DeliveryTimeout`] if the lifetime elapsed without an
    /// acknowledgement, [`GatewayError::Cancelled`] if it was cancelled.
    pub async fn outcome(&self) -> Result<()> {
        let mut rx = self.cell.state.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => return Err(GatewayError::Cancelled),
        };
        match state {
            ExchangeState::Acked => Ok(()),
            ExchangeState::GivenUp => Err(GatewayError::DeliveryTimeout {
                lifetime: self.lifetime,
            }),
            _ => Err(GatewayError::Cancelled),
        }
    }
}
