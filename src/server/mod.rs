//! Thingwire - Server Side
//!
//! The request [`Pipeline`] and the stages that ship with the crate:
//! [`AutoAckHandler`] (piggybacked or separate ACKs) and the observe
//! [`Publisher`] with its [`ObserveHandler`].

mod autoack;
mod pipeline;
mod publisher;
mod response;

pub use autoack::{AckGate, AckState, AutoAckHandler};
pub use pipeline::{Capability, Flow, Handler, Pipeline, PipelineBuilder, RequestContext};
pub use publisher::{ObserveHandler, Publisher};
pub use response::ResponseStream;
