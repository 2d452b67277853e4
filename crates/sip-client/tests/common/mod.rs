#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use sigstack_fsm_core::DefaultResourceProvider;
use sigstack_sip_client::{
    ClientContext, OutgoingRequest, PublicationListener, RegistrationFailure, RegistrationListener,
    RequestSender, SipClientError, SipClientResult, SipResponse, SubscriptionListener, TerminatedReason,
};
use sigstack_transaction_core::TransactionLayer;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(5);

/// Route the controllers' logs to the test output. `RUST_LOG` picks the
/// level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Transport that hands every request to the test.
pub struct RecordingTransport {
    tx: mpsc::UnboundedSender<OutgoingRequest>,
    refuse: Mutex<bool>,
}

impl RecordingTransport {
    pub fn refuse(&self, refuse: bool) {
        *self.refuse.lock() = refuse;
    }
}

impl RequestSender for RecordingTransport {
    fn send_request(&self, request: OutgoingRequest) -> SipClientResult<()> {
        if *self.refuse.lock() {
            return Err(SipClientError::transport("link down"));
        }
        let _ = self.tx.send(request);
        Ok(())
    }
}

pub struct Harness {
    pub ctx: ClientContext,
    pub transport: Arc<RecordingTransport>,
    pub requests: mpsc::UnboundedReceiver<OutgoingRequest>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let (tx, requests) = mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport {
            tx,
            refuse: Mutex::new(false),
        });
        let ctx = ClientContext::new(
            transport.clone(),
            TransactionLayer::with_defaults("sip-test"),
            Arc::new(DefaultResourceProvider::new("sip:alice@example.com")),
        );
        Self {
            ctx,
            transport,
            requests,
        }
    }

    pub async fn next_request(&mut self) -> OutgoingRequest {
        self.next_request_within(WAIT).await
    }

    pub async fn next_request_within(&mut self, wait: Duration) -> OutgoingRequest {
        tokio::time::timeout(wait, self.requests.recv())
            .await
            .expect("no request sent")
            .expect("transport closed")
    }

    pub fn no_request(&mut self) -> bool {
        self.requests.try_recv().is_err()
    }

    pub fn respond(&self, request: &OutgoingRequest, response: SipResponse) {
        assert!(
            self.ctx.transactions.on_response(&request.transaction_id, response),
            "transaction {} was not pending",
            request.transaction_id
        );
    }
}

pub fn ok(expires: u32) -> SipResponse {
    SipResponse::new(200, "OK").with_header("Expires", expires.to_string())
}

/// Listener recording every callback as a short string.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl RegistrationListener for Recorder {
    fn registered(&self, expires: u32) {
        self.push(format!("registered:{}", expires));
    }

    fn unregistered(&self) {
        self.push("unregistered".to_string());
    }

    fn failed(&self, reason: RegistrationFailure) {
        self.push(format!("failed:{}", reason));
    }
}

impl PublicationListener for Recorder {
    fn published(&self, etag: Option<&str>, expires: u32) {
        self.push(format!("published:{}:{}", etag.unwrap_or("-"), expires));
    }

    fn terminated(&self, status: Option<u16>) {
        match status {
            Some(status) => self.push(format!("unpublished:{}", status)),
            None => self.push("unpublished".to_string()),
        }
    }
}

impl SubscriptionListener for Recorder {
    fn notify_received(&self, body: &Bytes, content_type: Option<&str>) {
        self.push(format!(
            "notify:{}:{}",
            content_type.unwrap_or("-"),
            String::from_utf8_lossy(body)
        ));
    }

    fn active(&self, expires: u32) {
        self.push(format!("active:{}", expires));
    }

    fn pending(&self) {
        self.push("pending".to_string());
    }

    fn terminated(&self, reason: TerminatedReason) {
        self.push(format!("terminated:{}", reason));
    }
}
