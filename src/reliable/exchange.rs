//! Per-exchange retransmission state.
//!
//! An [`Exchange`] is the bookkeeping for one in-flight confirmable message.
//! It holds no timers itself; the [`ConfirmableSender`](super::ConfirmableSender)
//! drives it and asks it what to do whenever a timer fires.

use std::time::Duration;

/// Lifecycle of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Between a timer firing and the next retry timer being armed.
    Scheduling,
    /// A retry timer (or only the lifetime timer) is armed.
    AwaitingAck,
    /// An acknowledgement or response arrived.
    Acked,
    /// The exchange lifetime elapsed without acknowledgement.
    GivenUp,
    /// Cancelled locally.
    Cancelled,
}

impl ExchangeState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeState::Acked | ExchangeState::GivenUp | ExchangeState::Cancelled
        )
    }
}

/// Retransmission bookkeeping for one confirmable message.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Message id being retransmitted.
    message_id: u16,
    /// Engine-wide sequence number, for logs.
    seq: u64,
    /// Resends performed so far.
    attempts: u32,
    /// Interval until the next resend.
    backoff: Duration,
    /// Resend budget.
    max_retransmit: u32,
    /// Current state.
    state: ExchangeState,
}

impl Exchange {
    /// Create an exchange right after its first transmission.
    pub fn new(message_id: u16, seq: u64, initial_backoff: Duration, max_retransmit: u32) -> Self {
        Self {
            message_id,
            seq,
            attempts: 0,
            backoff: initial_backoff,
            max_retransmit,
            state: ExchangeState::Scheduling,
        }
    }

    /// Message id.
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    /// Engine sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Resends performed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Interval the next retry timer will use.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Current state.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Arm the next retry timer.
    ///
    /// Returns the interval to wait, or `None` when the exchange is finished
    /// or its resend budget is spent (only the lifetime timer remains).
    pub fn next_timer(&mut self) -> Option<Duration> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = ExchangeState::AwaitingAck;
        (self.attempts < self.max_retransmit).then_some(self.backoff)
    }

    /// The retry timer fired. Returns `true` if the message must be resent.
    ///
    /// Doubles the interval for the following attempt.
    pub fn on_retry_timer(&mut self) -> bool {
        if self.state != ExchangeState::AwaitingAck || self.attempts >= self.max_retransmit {
            return false;
        }
        self.attempts += 1;
        self.backoff = self.backoff.saturating_mul(2);
        self.state = ExchangeState::Scheduling;
        true
    }

    /// Move to a terminal state. Returns `false` if already terminal.
    pub fn finish(&mut self, terminal: ExchangeState) -> bool {
        debug_assert!(terminal.is_terminal());
        if self.state.is_terminal() {
            return false;
        }
        self.state = terminal;
        true
    }
}
