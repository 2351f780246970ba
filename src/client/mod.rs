//! Thingwire - Client Side
//!
//! Observe subscriptions that survive reconnects.

mod subscriber;

pub use subscriber::{ClientSession, SessionStore, SubscriberClient, TopicCallback};
