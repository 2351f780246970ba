//! Confirmable message delivery.
//!
//! [`ConfirmableSender`] retransmits a confirmable message with exponential
//! backoff until it is acknowledged, its exchange lifetime elapses, or it is
//! cancelled. Each in-flight message id owns one [`Exchange`].

mod exchange;
mod sender;

pub use exchange::{Exchange, ExchangeState};
pub use sender::{ConfirmableSender, ExchangeHandle};
