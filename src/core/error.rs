//! Error types for the Thingwire protocol layer.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while translating between the device model and wire objects.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WireError {
    /// A wire document was not a JSON object where one was required.
    #[error("expected a wire object for {0}")]
    NotAnObject(&'static str),

    /// A known wire key carried a value of the wrong shape.
    #[error("wire key `{key}` has an unexpected value: {reason}")]
    InvalidValue {
        /// Wire key that failed to decode.
        key: &'static str,
        /// Decoder message.
        reason: String,
    },
}

/// Errors in the datagram/message transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,

    /// The transport refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// I/O error from the socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while parsing an SSDP datagram.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SsdpParseError {
    /// Datagram was not valid UTF-8.
    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    /// Missing or malformed start line.
    #[error("malformed start line: {0}")]
    StartLine(String),

    /// Header line without a colon separator.
    #[error("malformed header line: {0}")]
    HeaderLine(String),
}

/// Top-level Thingwire errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing pipeline capability or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller supplied an invalid argument (e.g. a device without id).
    #[error("validation error: {0}")]
    Validation(String),

    /// A confirmable exchange ran out its lifetime without acknowledgement.
    #[error("no reply within exchange lifetime of {lifetime:?}")]
    DeliveryTimeout {
        /// The exchange lifetime that elapsed.
        lifetime: Duration,
    },

    /// The operation was cancelled locally before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Wire codec error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// SSDP parse error.
    #[error("ssdp parse error: {0}")]
    Ssdp(#[from] SsdpParseError),

    /// JSON body error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed URL.
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    /// TOML configuration error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;
