#![allow(dead_code)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sigstack_fsm_core::DefaultResourceProvider;
use sigstack_msrp_core::{
    MemoryContentStore, MsrpConfig, MsrpConnection, MsrpError, MsrpMethod, MsrpRequest, MsrpResponse, MsrpSession,
    MsrpSessionListener, Participant, ParticipantId, ParticipantState, ReceivedMessageMetaData, Result,
    SendingListener,
};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(10);

/// Route the crate's logs to the test output. `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Listener that logs every callback as a short string.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    metas: Mutex<Vec<ReceivedMessageMetaData>>,
    reject_with: Mutex<Option<u16>>,
    notify: Notify,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer every content-bearing SEND with `status`.
    pub fn reject_with(&self, status: u16) {
        *self.reject_with.lock() = Some(status);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn metas(&self) -> Vec<ReceivedMessageMetaData> {
        self.metas.lock().clone()
    }

    pub async fn wait_for(&self, event: &str) {
        let found = tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.notify.notified();
                if self.events.lock().iter().any(|e| e == event) {
                    return;
                }
                notified.await;
            }
        })
        .await;
        assert!(found.is_ok(), "timed out waiting for {:?}, saw {:?}", event, self.events());
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }
}

impl MsrpSessionListener for Recorder {
    type Store = MemoryContentStore;

    fn new_message_collector(&self, meta: &ReceivedMessageMetaData) -> MemoryContentStore {
        self.metas.lock().push(meta.clone());
        MemoryContentStore::new()
    }

    fn message_received(&self, message_id: &str, _meta: ReceivedMessageMetaData, store: MemoryContentStore) {
        let body = String::from_utf8_lossy(store.as_bytes()).into_owned();
        self.push(format!("received:{}:{}", message_id, body));
    }

    fn message_aborted(&self, message_id: &str, _meta: ReceivedMessageMetaData, store: MemoryContentStore) {
        self.push(format!("aborted:{}:{}", message_id, store.as_bytes().len()));
    }

    fn connected(&self) {
        self.push("connected".to_string());
    }

    fn terminated(&self) {
        self.push("terminated".to_string());
    }

    fn request_received(&self, _participant: &ParticipantId, request: &MsrpRequest) -> u16 {
        if request.method == MsrpMethod::Report {
            self.push(format!("report:{}", request.report_status().unwrap_or_default()));
            return 200;
        }
        self.reject_with.lock().unwrap_or(200)
    }

    fn response_received(&self, msg_state_id: &str, _participant: &ParticipantId, status: u16) {
        self.push(format!("response:{}:{}", msg_state_id, status));
    }

    fn participant_activated(&self, participant: &ParticipantId) {
        self.push(format!("activated:{}", participant));
    }

    fn participant_terminated(&self, participant: &ParticipantId) {
        self.push(format!("closed:{}", participant));
    }
}

impl SendingListener for Recorder {
    fn abort_sending_msg(&self, msg_state_id: &str) {
        self.push(format!("abort-sending:{}", msg_state_id));
    }

    fn ready_for_more(&self, msg_state_id: &str) {
        self.push(format!("ready:{}", msg_state_id));
    }
}

/// Connection that records everything and optionally hands it to a peer
/// participant.
#[derive(Default)]
pub struct Wire {
    pub requests: Mutex<Vec<MsrpRequest>>,
    pub responses: Mutex<Vec<MsrpResponse>>,
    pub reports: Mutex<Vec<MsrpRequest>>,
    pub closed: Mutex<bool>,
    refuse: Mutex<bool>,
    peer: Mutex<Option<Arc<Participant<Recorder>>>>,
}

impl fmt::Debug for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wire").field("requests", &self.requests.lock().len()).finish()
    }
}

impl Wire {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(&self, peer: Arc<Participant<Recorder>>) {
        *self.peer.lock() = Some(peer);
    }

    pub fn refuse(&self, refuse: bool) {
        *self.refuse.lock() = refuse;
    }

    pub fn sent_requests(&self) -> Vec<MsrpRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<MsrpRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn sent_responses(&self) -> Vec<MsrpResponse> {
        self.responses.lock().clone()
    }

    fn peer(&self) -> Option<Arc<Participant<Recorder>>> {
        self.peer.lock().clone()
    }
}

impl MsrpConnection for Wire {
    fn send_request(&self, request: &MsrpRequest) -> Result<()> {
        if *self.refuse.lock() {
            return Err(MsrpError::connection("socket closed"));
        }
        self.requests.lock().push(request.clone());
        if let Some(peer) = self.peer() {
            let _ = peer.request_received(request.clone());
        }
        Ok(())
    }

    fn send_response(&self, response: &MsrpResponse) -> Result<()> {
        self.responses.lock().push(response.clone());
        if let Some(peer) = self.peer() {
            peer.response_received(response.clone());
        }
        Ok(())
    }

    fn send_report(&self, report: &MsrpRequest) -> Result<()> {
        self.reports.lock().push(report.clone());
        if let Some(peer) = self.peer() {
            let _ = peer.request_received(report.clone());
        }
        Ok(())
    }

    fn close(&self) {
        *self.closed.lock() = true;
    }
}

pub fn config() -> MsrpConfig {
    MsrpConfig {
        max_chunk_size: 2048,
        transaction_timeout_ms: 2_000,
        receive_timeout_ms: 3_000,
        max_message_size: 64 * 1024,
    }
}

pub fn session(config: MsrpConfig, listener: &Arc<Recorder>, uri: &str) -> MsrpSession<Recorder> {
    init_tracing();
    MsrpSession::new(config, Arc::new(DefaultResourceProvider::new(uri)), Arc::clone(listener)).unwrap()
}

/// One endpoint of a loopback pair.
pub struct Endpoint {
    pub session: MsrpSession<Recorder>,
    pub participant: Arc<Participant<Recorder>>,
    pub listener: Arc<Recorder>,
    pub wire: Arc<Wire>,
}

/// Two participants wired to each other and brought to `Ready`, `alice`
/// performing the handshake.
pub async fn loopback(config: MsrpConfig) -> (Endpoint, Endpoint) {
    let alice = endpoint(config.clone(), "alice");
    let bob = endpoint(config, "bob");
    alice.wire.connect(Arc::clone(&bob.participant));
    bob.wire.connect(Arc::clone(&alice.participant));

    alice.participant.bind(alice.wire.clone()).unwrap();
    bob.participant.bind(bob.wire.clone()).unwrap();
    bob.participant.complete_handshake().unwrap();
    alice.participant.perform_handshake().unwrap();

    alice.participant.wait_for_state(ParticipantState::Ready, WAIT).await.unwrap();
    bob.participant.wait_for_state(ParticipantState::Ready, WAIT).await.unwrap();
    (alice, bob)
}

/// An endpoint whose wire goes nowhere, brought to `Ready` by feeding it
/// the peer's handshake.
pub async fn passive(config: MsrpConfig) -> Endpoint {
    let ep = endpoint(config, "bob");
    ep.participant.bind(ep.wire.clone()).unwrap();
    ep.participant.complete_handshake().unwrap();
    ep.participant.request_received(MsrpRequest::handshake()).unwrap();
    ep.participant.wait_for_state(ParticipantState::Ready, WAIT).await.unwrap();
    ep
}

/// An endpoint whose wire goes nowhere, brought to `Ready` by answering
/// its own handshake.
pub async fn active(config: MsrpConfig) -> Endpoint {
    let ep = endpoint(config, "alice");
    ep.participant.bind(ep.wire.clone()).unwrap();
    ep.participant.perform_handshake().unwrap();
    let handshake = wait_for_request(&ep.wire, 1).await;
    assert!(handshake.is_handshake());
    assert!(ep
        .participant
        .response_received(MsrpResponse::new(handshake.transaction_id, 200)));
    ep.participant.wait_for_state(ParticipantState::Ready, WAIT).await.unwrap();
    ep
}

/// Wait until `wire` has sent `n` requests and return the last one.
pub async fn wait_for_request(wire: &Wire, n: usize) -> MsrpRequest {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            {
                let requests = wire.requests.lock();
                if requests.len() >= n {
                    return requests[n - 1].clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    found.expect("request not sent")
}

fn endpoint(config: MsrpConfig, name: &str) -> Endpoint {
    let listener = Recorder::new();
    let session = session(config, &listener, &format!("msrp://{}.example.com:2855/s;tcp", name));
    let participant = Arc::new(session.add_participant(ParticipantId::new(name), listener.clone()));
    Endpoint {
        session,
        participant,
        listener,
        wire: Wire::new(),
    }
}
