//! Core types shared by every layer: constants, errors, cancellation and
//! the transport capability traits.

pub mod cancel;
pub mod constants;
pub mod error;
pub mod traits;

pub use cancel::{CancelSource, CancelToken};
pub use error::*;
pub use traits::{DatagramTransport, MessageTransport};
