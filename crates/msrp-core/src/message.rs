//! MSRP message views (RFC 4975).
//!
//! Framing and header encoding belong to the connection. The core only
//! needs the fields below, so requests and responses are plain values.

use std::fmt;

use bytes::Bytes;
use sigstack_transaction_core::TransactionId;

use crate::error::{MsrpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsrpMethod {
    Send,
    Report,
}

impl MsrpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MsrpMethod::Send => "SEND",
            MsrpMethod::Report => "REPORT",
        }
    }
}

impl fmt::Display for MsrpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Continuation flag closing the end-line of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Continuation {
    /// `$`: last chunk of the message.
    Complete,
    /// `+`: more chunks follow.
    More,
    /// `#`: the sender gave up on the message.
    Aborted,
}

impl Continuation {
    pub fn flag(&self) -> char {
        match self {
            Continuation::Complete => '$',
            Continuation::More => '+',
            Continuation::Aborted => '#',
        }
    }

    pub fn from_flag(flag: char) -> Option<Self> {
        match flag {
            '$' => Some(Continuation::Complete),
            '+' => Some(Continuation::More),
            '#' => Some(Continuation::Aborted),
            _ => None,
        }
    }
}

/// `Byte-Range: start-end/total` with 1-based inclusive positions.
///
/// `end` and `total` are `None` when sent as `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
    pub total: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>, total: Option<u64>) -> Self {
        Self { start, end, total }
    }

    /// Zero-based offset of the first byte.
    pub fn offset(&self) -> u64 {
        self.start.saturating_sub(1)
    }

    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || MsrpError::InvalidByteRange {
            value: value.to_string(),
        };
        let (range, total) = value.trim().split_once('/').ok_or_else(invalid)?;
        let (start, end) = range.split_once('-').ok_or_else(invalid)?;
        let start: u64 = start.trim().parse().map_err(|_| invalid())?;
        if start == 0 {
            return Err(invalid());
        }
        let end = match end.trim() {
            "*" => None,
            e => Some(e.parse::<u64>().map_err(|_| invalid())?),
        };
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse::<u64>().map_err(|_| invalid())?),
        };
        Ok(Self { start, end, total })
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.start)?;
        match self.end {
            Some(end) => write!(f, "{}", end)?,
            None => f.write_str("*")?,
        }
        match self.total {
            Some(total) => write!(f, "/{}", total),
            None => f.write_str("/*"),
        }
    }
}

/// Identifies one participant of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An MSRP request, sent or received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsrpRequest {
    pub transaction_id: TransactionId,
    pub method: MsrpMethod,
    pub message_id: Option<String>,
    pub byte_range: Option<ByteRange>,
    pub continuation: Continuation,
    pub content_type: Option<String>,
    /// Every other header, in wire order.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MsrpRequest {
    fn bare(method: MsrpMethod) -> Self {
        Self {
            transaction_id: TransactionId::generate(),
            method,
            message_id: None,
            byte_range: None,
            continuation: Continuation::Complete,
            content_type: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// A body-less SEND used to open the session.
    pub fn handshake() -> Self {
        Self::bare(MsrpMethod::Send)
    }

    /// One SEND chunk.
    pub fn send(
        message_id: impl Into<String>,
        content_type: impl Into<String>,
        byte_range: ByteRange,
        continuation: Continuation,
        body: Bytes,
    ) -> Self {
        Self {
            message_id: Some(message_id.into()),
            byte_range: Some(byte_range),
            continuation,
            content_type: Some(content_type.into()),
            body,
            ..Self::bare(MsrpMethod::Send)
        }
    }

    /// A REPORT for `message_id` carrying `Status: 000 <status>`.
    pub fn report(message_id: impl Into<String>, byte_range: ByteRange, status: u16) -> Self {
        Self {
            message_id: Some(message_id.into()),
            byte_range: Some(byte_range),
            headers: vec![("Status".to_string(), format!("000 {}", status))],
            ..Self::bare(MsrpMethod::Report)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// A SEND without content, as used for the connection handshake.
    pub fn is_handshake(&self) -> bool {
        self.method == MsrpMethod::Send && self.body.is_empty() && self.content_type.is_none()
    }

    /// Whether a response with `status` should be sent back, following
    /// the request's `Failure-Report` header.
    pub fn wants_response(&self, status: u16) -> bool {
        match self.header("Failure-Report").map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("no") => false,
            Some(v) if v.eq_ignore_ascii_case("partial") => !(200..300).contains(&status),
            _ => self.method == MsrpMethod::Send,
        }
    }

    /// Status code of a REPORT.
    pub fn report_status(&self) -> Option<u16> {
        let value = self.header("Status")?;
        value.split_whitespace().nth(1)?.parse().ok()
    }
}

/// A transaction response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsrpResponse {
    pub transaction_id: TransactionId,
    pub status: u16,
    pub comment: Option<String>,
}

impl MsrpResponse {
    pub fn new(transaction_id: TransactionId, status: u16) -> Self {
        Self {
            transaction_id,
            status,
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_forms() {
        let r = ByteRange::parse("1-25/100").unwrap();
        assert_eq!(r, ByteRange::new(1, Some(25), Some(100)));
        assert_eq!(r.offset(), 0);
        assert_eq!(r.to_string(), "1-25/100");

        let open = ByteRange::parse("26-*/*").unwrap();
        assert_eq!(open, ByteRange::new(26, None, None));
        assert_eq!(open.to_string(), "26-*/*");

        assert!(ByteRange::parse("0-5/5").is_err());
        assert!(ByteRange::parse("1-5").is_err());
        assert!(ByteRange::parse("a-5/5").is_err());
    }

    #[test]
    fn test_handshake_detection() {
        assert!(MsrpRequest::handshake().is_handshake());
        let chunk = MsrpRequest::send("m1", "text/plain", ByteRange::new(1, Some(2), Some(2)), Continuation::Complete, Bytes::from_static(b"hi"));
        assert!(!chunk.is_handshake());
    }

    #[test]
    fn test_failure_report_controls_responses() {
        let chunk = MsrpRequest::send("m1", "text/plain", ByteRange::new(1, Some(1), Some(1)), Continuation::Complete, Bytes::from_static(b"x"));
        assert!(chunk.wants_response(200));
        let partial = chunk.clone().with_header("Failure-Report", "partial");
        assert!(!partial.wants_response(200));
        assert!(partial.wants_response(413));
        let none = chunk.with_header("Failure-Report", "no");
        assert!(!none.wants_response(500));

        let report = MsrpRequest::report("m1", ByteRange::new(1, Some(1), Some(1)), 200);
        assert!(!report.wants_response(200));
        assert_eq!(report.report_status(), Some(200));
    }
}
