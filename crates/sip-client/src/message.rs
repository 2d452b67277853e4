//! SIP message value types exchanged with the transport.
//!
//! Wire encoding and header grammar live in the transport; the controllers
//! only see the handful of fields they act on.

use std::fmt;

use bytes::Bytes;
use sigstack_transaction_core::TransactionId;

use crate::error::SipClientResult;

/// Request methods the client controllers send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Register,
    Publish,
    Subscribe,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Register => "REGISTER",
            Method::Publish => "PUBLISH",
            Method::Subscribe => "SUBSCRIBE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final response to one of our requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipResponse {
    pub status: u16,
    pub reason: String,
    headers: Vec<(String, String)>,
}

impl SipResponse {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header. Repeated names keep every value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Expires` in seconds.
    pub fn expires(&self) -> Option<u32> {
        self.header("Expires").and_then(|v| v.trim().parse().ok())
    }

    /// `Min-Expires` in seconds, sent with 423.
    pub fn min_expires(&self) -> Option<u32> {
        self.header("Min-Expires").and_then(|v| v.trim().parse().ok())
    }

    /// `SIP-ETag`, sent with 2xx to PUBLISH.
    pub fn sip_etag(&self) -> Option<&str> {
        self.header("SIP-ETag").map(str::trim).filter(|v| !v.is_empty())
    }

    /// `WWW-Authenticate`, sent with 401.
    pub fn www_authenticate(&self) -> Option<&str> {
        self.header("WWW-Authenticate")
    }
}

/// Request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub method: Method,
    pub transaction_id: TransactionId,
    pub request_uri: String,
    pub from: String,
    pub expires: Option<u32>,
    pub if_match: Option<String>,
    pub event: Option<String>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<Bytes>,
}

impl OutgoingRequest {
    pub fn new(method: Method, request_uri: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            method,
            transaction_id: TransactionId::generate(),
            request_uri: request_uri.into(),
            from: from.into(),
            expires: None,
            if_match: None,
            event: None,
            authorization: None,
            content_type: None,
            body: None,
        }
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_if_match(mut self, etag: Option<String>) -> Self {
        self.if_match = etag;
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_authorization(mut self, authorization: Option<String>) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: Bytes) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body);
        self
    }
}

/// Transport that puts requests on the wire.
///
/// `send_request` must not block; responses come back through
/// [`TransactionLayer::on_response`](sigstack_transaction_core::TransactionLayer::on_response)
/// keyed by [`OutgoingRequest::transaction_id`].
pub trait RequestSender: Send + Sync {
    fn send_request(&self, request: OutgoingRequest) -> SipClientResult<()>;
}

/// Value of a `Subscription-State` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Active { expires: Option<u32> },
    Pending { expires: Option<u32> },
    Terminated { reason: Option<String> },
}

impl SubscriptionState {
    /// Parse `substate *(";" param)`.
    ///
    /// Unknown substates are treated as `pending`, as RFC 6665 requires.
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split(';').map(str::trim);
        let substate = parts.next().unwrap_or_default().to_ascii_lowercase();
        let mut expires = None;
        let mut reason = None;
        for param in parts {
            let (name, val) = match param.split_once('=') {
                Some((n, v)) => (n.trim(), v.trim()),
                None => (param, ""),
            };
            if name.eq_ignore_ascii_case("expires") {
                expires = val.parse().ok();
            } else if name.eq_ignore_ascii_case("reason") && !val.is_empty() {
                reason = Some(val.to_ascii_lowercase());
            }
        }
        match substate.as_str() {
            "active" => SubscriptionState::Active { expires },
            "terminated" => SubscriptionState::Terminated { reason },
            _ => SubscriptionState::Pending { expires },
        }
    }
}

/// Incoming NOTIFY for a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyRequest {
    pub subscription_state: SubscriptionState,
    pub content_type: Option<String>,
    pub body: Option<Bytes>,
}

impl NotifyRequest {
    pub fn new(subscription_state: SubscriptionState) -> Self {
        Self {
            subscription_state,
            content_type: None,
            body: None,
        }
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body.into());
        self
    }
}
