//! Typed CoAP-style messages.
//!
//! The protocol layer works on [`Message`] values; turning them into bytes
//! is the job of the host's [`MessageTransport`](crate::core::MessageTransport).
//! Options are carried as named headers (`Observe`, ...).

use std::collections::BTreeMap;
use std::fmt;

use url::form_urlencoded;

use crate::core::constants::HEADER_OBSERVE;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Retrieve a representation (0.01).
    Get,
    /// Process a representation (0.02).
    Post,
    /// Replace a representation (0.03).
    Put,
    /// Remove a resource (0.04).
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Response code in `class.detail` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code {
    class: u8,
    detail: u8,
}

impl Code {
    /// 2.01 Created.
    pub const CREATED: Code = Code::new(2, 1);
    /// 2.04 Changed.
    pub const CHANGED: Code = Code::new(2, 4);
    /// 2.05 Content.
    pub const CONTENT: Code = Code::new(2, 5);
    /// 4.00 Bad Request.
    pub const BAD_REQUEST: Code = Code::new(4, 0);
    /// 4.04 Not Found.
    pub const NOT_FOUND: Code = Code::new(4, 4);
    /// 5.00 Internal Server Error.
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);

    /// Create a code from its class and detail.
    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    /// Code class (2 = success, 4 = client error, 5 = server error).
    pub fn class(&self) -> u8 {
        self.class
    }

    /// Code detail.
    pub fn detail(&self) -> u8 {
        self.detail
    }

    /// Check for a 2.xx code.
    pub fn is_success(&self) -> bool {
        self.class == 2
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

/// A request, response or empty message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Message id; `None` until the endpoint assigns one.
    pub message_id: Option<u16>,
    /// Request/response correlation token.
    pub token: Vec<u8>,
    /// Requires acknowledgement (CON).
    pub confirmable: bool,
    /// Is an acknowledgement (ACK).
    pub ack: bool,
    /// Request method; `None` for responses and empty messages.
    pub method: Option<Method>,
    /// Response code; `None` for requests and empty messages.
    pub code: Option<Code>,
    /// Request path, without the query.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// Options carried as named headers.
    pub headers: BTreeMap<String, String>,
    /// Payload.
    pub body: Vec<u8>,
}

impl Message {
    /// Create a request. A `?query` suffix on `target` is split off.
    pub fn request(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method: Some(method),
            path,
            query,
            ..Self::default()
        }
    }

    /// Create a response with the given code.
    pub fn response(code: Code) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    /// Create an empty acknowledgement for `message_id`.
    pub fn empty_ack(message_id: u16) -> Self {
        Self {
            message_id: Some(message_id),
            ack: true,
            ..Self::default()
        }
    }

    /// Set the confirmable flag.
    pub fn with_confirmable(mut self, confirmable: bool) -> Self {
        self.confirmable = confirmable;
        self
    }

    /// Set a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    /// Set the payload.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the token.
    pub fn with_token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.token = token.into();
        self
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Set a header value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_string(), value.into());
    }

    /// Check whether this is a request.
    pub fn is_request(&self) -> bool {
        self.method.is_some()
    }

    /// Check whether this is a response (carries a code).
    pub fn is_response(&self) -> bool {
        self.code.is_some()
    }

    /// Check whether this is an empty acknowledgement.
    pub fn is_empty_ack(&self) -> bool {
        self.ack && self.method.is_none() && self.code.is_none()
    }

    /// Parsed `Observe` option, if present and numeric.
    pub fn observe(&self) -> Option<u32> {
        self.header(HEADER_OBSERVE)?.trim().parse().ok()
    }

    /// Look up a `name=value` pair in the query string, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        form_urlencoded::parse(self.query.as_deref()?.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Path and query joined back together.
    pub fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}
