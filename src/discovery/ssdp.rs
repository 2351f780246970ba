//! SSDP message codec.
//!
//! SSDP messages are HTTP over UDP: a request or status line, `NAME: value`
//! headers and a blank line. Header lookup ignores case; header names keep
//! the case they were written with.

use std::fmt;

use crate::core::SsdpParseError;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Kind of SSDP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpKind {
    /// `NOTIFY * HTTP/1.1`
    Notify,
    /// `M-SEARCH * HTTP/1.1`
    MSearch,
    /// `HTTP/1.1 <status> <reason>`
    Response {
        /// Status code.
        status: u16,
        /// Reason phrase.
        reason: String,
    },
}

/// One SSDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpMessage {
    kind: SsdpKind,
    headers: Vec<(String, String)>,
}

impl SsdpMessage {
    /// Empty message of `kind`.
    pub fn new(kind: SsdpKind) -> Self {
        Self {
            kind,
            headers: Vec::new(),
        }
    }

    /// `NOTIFY` announcement.
    pub fn notify() -> Self {
        Self::new(SsdpKind::Notify)
    }

    /// `M-SEARCH` request.
    pub fn search() -> Self {
        Self::new(SsdpKind::MSearch)
    }

    /// `200 OK` search response.
    pub fn ok() -> Self {
        Self::new(SsdpKind::Response {
            status: 200,
            reason: "OK".to_string(),
        })
    }

    /// Message kind.
    pub fn kind(&self) -> &SsdpKind {
        &self.kind
    }

    /// Headers in order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Set a header, replacing any with the same name.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header, replacing any with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    /// Header value, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Encode as datagram bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse a datagram.
    pub fn parse(datagram: &[u8]) -> Result<Self, SsdpParseError> {
        let text = std::str::from_utf8(datagram).map_err(|_| SsdpParseError::NotUtf8)?;
        let mut lines = text.lines();

        let start = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| SsdpParseError::StartLine(String::new()))?;
        let kind = parse_start_line(start)?;

        let mut headers = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| SsdpParseError::HeaderLine(line.to_string()))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self { kind, headers })
    }
}

fn parse_start_line(line: &str) -> Result<SsdpKind, SsdpParseError> {
    let mut parts = line.splitn(3, ' ');
    let first = parts.next().unwrap_or_default();
    let second = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    if first.starts_with("HTTP/") {
        let status = second
            .parse()
            .map_err(|_| SsdpParseError::StartLine(line.to_string()))?;
        return Ok(SsdpKind::Response {
            status,
            reason: rest.to_string(),
        });
    }

    if second != "*" || !rest.starts_with("HTTP/") {
        return Err(SsdpParseError::StartLine(line.to_string()));
    }
    match first {
        "NOTIFY" => Ok(SsdpKind::Notify),
        "M-SEARCH" => Ok(SsdpKind::MSearch),
        _ => Err(SsdpParseError::StartLine(line.to_string())),
    }
}

impl fmt::Display for SsdpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SsdpKind::Notify => write!(f, "NOTIFY * {HTTP_VERSION}\r\n")?,
            SsdpKind::MSearch => write!(f, "M-SEARCH * {HTTP_VERSION}\r\n")?,
            SsdpKind::Response { status, reason } => {
                write!(f, "{HTTP_VERSION} {status} {reason}\r\n")?
            }
        }
        for (name, value) in &self.headers {
            write!(f, "{name}: {value}\r\n")?;
        }
        f.write_str("\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_notify() {
        let msg = SsdpMessage::notify()
            .with_header("HOST", "239.255.255.250:1900")
            .with_header("NTS", "ssdp:alive");
        assert_eq!(
            msg.to_string(),
            "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nNTS: ssdp:alive\r\n\r\n"
        );
    }

    #[test]
    fn test_parse_response_case_insensitive() {
        let raw = b"HTTP/1.1 200 OK\r\nUsn: D1\r\nLocation: http://x/device.xml\r\nEXT:\r\n\r\n";
        let msg = SsdpMessage::parse(raw).unwrap();

        assert_eq!(
            msg.kind(),
            &SsdpKind::Response {
                status: 200,
                reason: "OK".into()
            }
        );
        assert_eq!(msg.header("USN"), Some("D1"));
        assert_eq!(msg.header("location"), Some("http://x/device.xml"));
        assert_eq!(msg.header("ext"), Some(""));
        assert_eq!(msg.headers()[0].0, "Usn");
    }

    #[test]
    fn test_parse_search_with_bare_newlines() {
        let raw = b"M-SEARCH * HTTP/1.1\nMAN: \"ssdp:discover\"\nST: ssdp:all\n\n";
        let msg = SsdpMessage::parse(raw).unwrap();
        assert_eq!(msg.kind(), &SsdpKind::MSearch);
        assert_eq!(msg.header("MAN"), Some("\"ssdp:discover\""));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(SsdpMessage::parse(&[0xff, 0xfe]), Err(SsdpParseError::NotUtf8));
        assert!(matches!(
            SsdpMessage::parse(b"GET / HTTP/1.1\r\n\r\n"),
            Err(SsdpParseError::StartLine(_))
        ));
        assert!(matches!(
            SsdpMessage::parse(b"NOTIFY * HTTP/1.1\r\nbroken\r\n\r\n"),
            Err(SsdpParseError::HeaderLine(_))
        ));
        assert!(matches!(SsdpMessage::parse(b""), Err(SsdpParseError::StartLine(_))));
    }

    #[test]
    fn test_set_header_replaces() {
        let mut msg = SsdpMessage::search().with_header("ST", "a");
        msg.set_header("st", "b");
        assert_eq!(msg.headers().len(), 1);
        assert_eq!(msg.header("ST"), Some("b"));
    }
}
