//! # MSRP participant state machine
//!
//! One machine per participant connection:
//!
//! ```text
//!   Unbound --bind--> Bound --performHandshake--> Handshaking --2xx--> Ready
//!                       |    --completeHandshake-->     |                |  ^
//!                       |                               | peer's empty   |  | response
//!                       +---------- peer's empty SEND --+----- SEND -----+  |
//!                                                                  sendRequest
//!                                                                       |  |
//!                                                                       v  |
//!                                                                     Sending
//! ```
//!
//! `close` leads to `Closed` from every state.
//!
//! Only one outbound chunk is in flight at a time. `Sending` is blocking
//! and has no `sendRequest` transition, so further chunks wait in the
//! deferred queue until `Ready` is re-entered. Inbound requests, reports
//! and responses are handled in both `Ready` and `Sending` through
//! self-transitions.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use sigstack_fsm_core::{
    spawn_machine, Condition, FsmError, Machine, MachineHandle, ResourceProvider, Signal, SignalSender, StateTable,
    StateTableBuilder, TimerHandle,
};
use sigstack_transaction_core::{
    OutcomeSignal, SignalUser, TransactionConfig, TransactionHandle, TransactionId, TransactionLayer,
    TransactionOutcome,
};
use tracing::{debug, error, info, warn};

use crate::config::MsrpConfig;
use crate::error::{MsrpError, Result};
use crate::listener::{MsrpConnection, MsrpSessionListener, SendingListener};
use crate::message::{Continuation, MsrpMethod, MsrpRequest, MsrpResponse, ParticipantId};
use crate::metadata::ReceivedMessageMetaData;
use crate::reassembly::{ChunkOffset, Reassembler};
use crate::sender::MsrpSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantState {
    Unbound,
    Bound,
    Handshaking,
    Ready,
    Sending,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantKind {
    Bind,
    PerformHandshake,
    CompleteHandshake,
    SendRequest,
    SendReport,
    SendResponse,
    ResponseReceived,
    RequestReceived,
    BytesSent,
    ReceiveTimeout,
    Close,
}

#[derive(Debug, Clone)]
pub enum ParticipantSignal {
    Bind(Arc<dyn MsrpConnection>),
    /// Active side: send the opening empty SEND.
    PerformHandshake,
    /// Passive side: wait for the peer's empty SEND.
    CompleteHandshake,
    SendRequest {
        request: MsrpRequest,
        msg_state_id: String,
    },
    SendReport(MsrpRequest),
    SendResponse(MsrpResponse),
    ResponseReceived(MsrpResponse),
    RequestReceived(MsrpRequest),
    BytesSent(u64),
    /// No chunk of this inbound message arrived in time. Carries the
    /// arming number of the timer; an outdated one is ignored.
    ReceiveTimeout(String, u64),
    Close,
}

impl ParticipantSignal {
    pub fn send_request(request: MsrpRequest, msg_state_id: impl Into<String>) -> Self {
        ParticipantSignal::SendRequest {
            request,
            msg_state_id: msg_state_id.into(),
        }
    }
}

impl Signal for ParticipantSignal {
    type Kind = ParticipantKind;

    fn kind(&self) -> ParticipantKind {
        match self {
            ParticipantSignal::Bind(_) => ParticipantKind::Bind,
            ParticipantSignal::PerformHandshake => ParticipantKind::PerformHandshake,
            ParticipantSignal::CompleteHandshake => ParticipantKind::CompleteHandshake,
            ParticipantSignal::SendRequest { .. } => ParticipantKind::SendRequest,
            ParticipantSignal::SendReport(_) => ParticipantKind::SendReport,
            ParticipantSignal::SendResponse(_) => ParticipantKind::SendResponse,
            ParticipantSignal::ResponseReceived(_) => ParticipantKind::ResponseReceived,
            ParticipantSignal::RequestReceived(_) => ParticipantKind::RequestReceived,
            ParticipantSignal::BytesSent(_) => ParticipantKind::BytesSent,
            ParticipantSignal::ReceiveTimeout(..) => ParticipantKind::ReceiveTimeout,
            ParticipantSignal::Close => ParticipantKind::Close,
        }
    }
}

impl OutcomeSignal<MsrpResponse> for ParticipantSignal {
    fn from_outcome(id: &TransactionId, outcome: TransactionOutcome<MsrpResponse>) -> Self {
        match outcome {
            TransactionOutcome::Response(r) => ParticipantSignal::ResponseReceived(r),
            TransactionOutcome::TimedOut => {
                ParticipantSignal::ResponseReceived(MsrpResponse::new(id.clone(), 408).with_comment("Request Timeout"))
            }
        }
    }
}

struct InFlight {
    msg_state_id: String,
    continuation: Continuation,
    transaction: TransactionHandle<MsrpResponse>,
}

struct Inbound<S> {
    reassembler: Reassembler<S>,
    last_seen: bool,
    timer_seq: u64,
    _timer: Option<TimerHandle>,
}

enum ChunkResult {
    Partial,
    Complete,
    Aborted,
}

/// Context of one participant machine.
pub struct ParticipantMachine<L: MsrpSessionListener> {
    id: String,
    participant: ParticipantId,
    config: MsrpConfig,
    transactions: TransactionLayer<MsrpResponse>,
    resources: Arc<dyn ResourceProvider>,
    sender: SignalSender<ParticipantSignal>,
    listener: Arc<L>,
    sending: Arc<dyn SendingListener>,
    connection: Option<Arc<dyn MsrpConnection>>,
    activated: bool,
    handshake: Option<TransactionHandle<MsrpResponse>>,
    in_flight: Option<InFlight>,
    aborted: HashSet<String>,
    inbound: IndexMap<String, Inbound<L::Store>>,
    timer_seq: u64,
}

impl<L: MsrpSessionListener> ParticipantMachine<L> {
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// Inbound messages still being received.
    pub fn inbound_count(&self) -> usize {
        self.inbound.len()
    }

    fn transmit(
        &mut self,
        state: ParticipantState,
        request: &MsrpRequest,
    ) -> sigstack_fsm_core::Result<TransactionHandle<MsrpResponse>> {
        let Some(connection) = self.connection.clone() else {
            return Err(FsmError::hook(state, "no connection bound"));
        };
        let handle = self
            .transactions
            .start_transaction(
                request.transaction_id.clone(),
                Some(self.config.transaction_timeout()),
                SignalUser::new(self.sender.clone()),
            )
            .map_err(|e| FsmError::hook(state, e.to_string()))?;
        if let Err(e) = connection.send_request(request) {
            error!(participant = %self.participant, transaction = %handle.id(), error = %e, "connection refused request");
            handle.cancel();
            return Err(FsmError::hook(state, e.to_string()));
        }
        Ok(handle)
    }

    fn respond(&self, request: &MsrpRequest, status: u16) {
        if !request.wants_response(status) {
            return;
        }
        let Some(connection) = &self.connection else {
            return;
        };
        let response = MsrpResponse::new(request.transaction_id.clone(), status);
        if let Err(e) = connection.send_response(&response) {
            warn!(participant = %self.participant, status, error = %e, "could not send response");
        }
    }

    fn handle_request(&mut self, request: &MsrpRequest) {
        if request.method == MsrpMethod::Report {
            debug!(participant = %self.participant, message_id = ?request.message_id, status = ?request.report_status(), "REPORT received");
            let _ = self.listener.request_received(&self.participant, request);
            return;
        }
        if request.is_handshake() {
            self.respond(request, 200);
            return;
        }

        let status = self.listener.request_received(&self.participant, request);
        if !(200..300).contains(&status) {
            debug!(participant = %self.participant, message_id = ?request.message_id, status, "request rejected");
            self.respond(request, status);
            if let Some(message_id) = &request.message_id {
                self.finish_inbound(message_id, true);
            }
            return;
        }
        let Some(message_id) = request.message_id.clone() else {
            self.respond(request, 400);
            return;
        };

        match self.store_chunk(&message_id, request) {
            Ok(result) => {
                self.respond(request, 200);
                match result {
                    ChunkResult::Partial => {}
                    ChunkResult::Complete => self.finish_inbound(&message_id, false),
                    ChunkResult::Aborted => self.finish_inbound(&message_id, true),
                }
            }
            Err(e) => {
                warn!(participant = %self.participant, %message_id, error = %e, "could not store chunk");
                let status = match e {
                    MsrpError::Cpim { .. } | MsrpError::InvalidByteRange { .. } => 400,
                    MsrpError::TooLarge { .. } => 413,
                    _ => 500,
                };
                self.respond(request, status);
                self.finish_inbound(&message_id, true);
            }
        }
    }

    fn store_chunk(&mut self, message_id: &str, request: &MsrpRequest) -> Result<ChunkResult> {
        if !self.inbound.contains_key(message_id) {
            let meta = ReceivedMessageMetaData::from_request(request)?;
            debug!(participant = %self.participant, %message_id, content_type = %meta.content_type, expected = ?meta.expected_size, "new inbound message");
            let store = self.listener.new_message_collector(&meta);
            self.inbound.insert(
                message_id.to_string(),
                Inbound {
                    reassembler: Reassembler::new(meta, store).with_max_size(self.config.max_message_size),
                    last_seen: false,
                    timer_seq: 0,
                    _timer: None,
                },
            );
        }
        self.timer_seq += 1;
        let seq = self.timer_seq;
        let timer = self.resources.timers().schedule(
            self.config.receive_timeout(),
            &self.sender,
            ParticipantSignal::ReceiveTimeout(message_id.to_string(), seq),
        );
        let Some(inbound) = self.inbound.get_mut(message_id) else {
            return Err(MsrpError::MissingMessageId);
        };

        let offset = request
            .byte_range
            .map_or(ChunkOffset::Append, |r| ChunkOffset::At(r.offset()));
        inbound.reassembler.store(offset, &request.body)?;
        self.listener.more_bytes_received(
            message_id,
            inbound.reassembler.bytes_received_so_far(),
            inbound.reassembler.expected_size(),
            inbound.reassembler.content(),
        );

        match request.continuation {
            Continuation::Aborted => return Ok(ChunkResult::Aborted),
            Continuation::Complete => inbound.last_seen = true,
            Continuation::More => {}
        }
        let done = inbound.last_seen
            && (inbound.reassembler.expected_size().is_none() || inbound.reassembler.is_complete());
        if done {
            Ok(ChunkResult::Complete)
        } else {
            inbound.timer_seq = seq;
            inbound._timer = Some(timer);
            Ok(ChunkResult::Partial)
        }
    }

    fn finish_inbound(&mut self, message_id: &str, aborted: bool) {
        let Some(inbound) = self.inbound.shift_remove(message_id) else {
            return;
        };
        let finished = inbound.reassembler.receiving_finished(aborted);
        let Some(meta) = finished.meta else {
            return;
        };
        if finished.aborted {
            info!(participant = %self.participant, %message_id, bytes = finished.bytes_received, "inbound message aborted");
            self.listener.message_aborted(message_id, meta, finished.store);
        } else {
            info!(participant = %self.participant, %message_id, bytes = finished.bytes_received, "inbound message received");
            self.listener.message_received(message_id, meta, finished.store);
        }
    }

    fn handle_side_signal(&mut self, signal: &ParticipantSignal) {
        match signal {
            ParticipantSignal::RequestReceived(request) => self.handle_request(request),
            ParticipantSignal::SendReport(report) => {
                if let Some(connection) = &self.connection {
                    if let Err(e) = connection.send_report(report) {
                        warn!(participant = %self.participant, error = %e, "could not send REPORT");
                    }
                }
            }
            ParticipantSignal::SendResponse(response) => {
                if let Some(connection) = &self.connection {
                    if let Err(e) = connection.send_response(response) {
                        warn!(participant = %self.participant, error = %e, "could not send response");
                    }
                }
            }
            ParticipantSignal::ReceiveTimeout(message_id, seq) => {
                let current = self.inbound.get(message_id).is_some_and(|i| i.timer_seq == *seq);
                if !current {
                    debug!(participant = %self.participant, %message_id, seq, "stale receive timeout");
                    return;
                }
                warn!(participant = %self.participant, %message_id, "inbound message timed out");
                self.finish_inbound(message_id, true);
            }
            ParticipantSignal::BytesSent(count) => {
                if let Some(in_flight) = &self.in_flight {
                    debug!(participant = %self.participant, msg = %in_flight.msg_state_id, count, "chunk written");
                    self.sending.ready_for_more(&in_flight.msg_state_id);
                }
            }
            _ => {}
        }
    }

    fn complete_send(&mut self, response: &MsrpResponse) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        if response.is_success() {
            debug!(participant = %self.participant, msg = %in_flight.msg_state_id, status = response.status, "chunk accepted");
            if in_flight.continuation != Continuation::More {
                self.listener
                    .response_received(&in_flight.msg_state_id, &self.participant, response.status);
            }
        } else {
            warn!(participant = %self.participant, msg = %in_flight.msg_state_id, status = response.status, "chunk rejected");
            self.listener
                .response_received(&in_flight.msg_state_id, &self.participant, response.status);
            self.abort_message(&in_flight.msg_state_id, in_flight.continuation);
        }
    }

    /// Give up on an outbound message. Its later chunks are dropped until
    /// the final one goes by.
    fn abort_message(&mut self, msg_state_id: &str, continuation: Continuation) {
        if self.aborted.insert(msg_state_id.to_string()) {
            warn!(participant = %self.participant, msg = %msg_state_id, "aborting outbound message");
            self.sending.abort_sending_msg(msg_state_id);
        }
        if continuation != Continuation::More {
            self.aborted.remove(msg_state_id);
        }
    }

    fn close_all(&mut self) {
        if let Some(handshake) = self.handshake.take() {
            handshake.cancel();
        }
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.transaction.cancel();
            self.abort_message(&in_flight.msg_state_id, Continuation::More);
        }
        let pending: Vec<String> = self.inbound.keys().cloned().collect();
        for message_id in pending {
            self.finish_inbound(&message_id, true);
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        info!(participant = %self.participant, "participant closed");
        self.listener.participant_terminated(&self.participant);
        self.listener.terminated();
    }
}

impl<L: MsrpSessionListener> Machine for ParticipantMachine<L> {
    type Signal = ParticipantSignal;
    type State = ParticipantState;

    fn id(&self) -> &str {
        &self.id
    }

    fn on_enter(
        &mut self,
        state: ParticipantState,
        signal: &ParticipantSignal,
        _re_entering: bool,
    ) -> sigstack_fsm_core::Result<()> {
        match state {
            ParticipantState::Unbound => {}
            ParticipantState::Bound => {
                if let ParticipantSignal::Bind(connection) = signal {
                    debug!(participant = %self.participant, ?connection, "bound");
                    self.connection = Some(Arc::clone(connection));
                }
            }
            ParticipantState::Handshaking => {
                if matches!(signal, ParticipantSignal::PerformHandshake) {
                    let request = MsrpRequest::handshake();
                    debug!(participant = %self.participant, transaction = %request.transaction_id, "sending handshake");
                    self.handshake = Some(self.transmit(state, &request)?);
                }
            }
            ParticipantState::Ready => {
                match signal {
                    ParticipantSignal::ResponseReceived(response) => self.complete_send(response),
                    other => self.handle_side_signal(other),
                }
                if !self.activated {
                    self.activated = true;
                    info!(participant = %self.participant, "participant ready");
                    self.listener.connected();
                    self.listener.participant_activated(&self.participant);
                }
            }
            ParticipantState::Sending => match signal {
                ParticipantSignal::SendRequest { request, msg_state_id } => {
                    let transaction = self.transmit(state, request)?;
                    debug!(participant = %self.participant, msg = %msg_state_id, range = ?request.byte_range, "chunk sent");
                    self.in_flight = Some(InFlight {
                        msg_state_id: msg_state_id.clone(),
                        continuation: request.continuation,
                        transaction,
                    });
                }
                other => self.handle_side_signal(other),
            },
            ParticipantState::Closed => self.close_all(),
        }
        Ok(())
    }

    fn on_exit(&mut self, state: ParticipantState, _signal: &ParticipantSignal, _re_entering_next: bool) {
        if state == ParticipantState::Handshaking {
            if let Some(handshake) = self.handshake.take() {
                handshake.cancel();
            }
        }
    }

    fn on_discard(&mut self, state: ParticipantState, signal: ParticipantSignal) {
        match signal {
            ParticipantSignal::SendRequest { request, msg_state_id } => {
                debug!(participant = %self.participant, ?state, msg = %msg_state_id, "dropping outbound chunk");
                self.abort_message(&msg_state_id, request.continuation);
            }
            other => debug!(participant = %self.participant, ?state, signal = ?other.kind(), "signal dropped"),
        }
    }
}

fn on<L: MsrpSessionListener>(kind: ParticipantKind) -> Condition<ParticipantMachine<L>> {
    Condition::on_kind(kind)
}

fn live_message<L: MsrpSessionListener>() -> Condition<ParticipantMachine<L>> {
    Condition::new("LIVE_MESSAGE", |s: &ParticipantSignal, m: &ParticipantMachine<L>| match s {
        ParticipantSignal::SendRequest { msg_state_id, .. } => !m.aborted.contains(msg_state_id),
        _ => false,
    })
}

fn handshake_request<L: MsrpSessionListener>() -> Condition<ParticipantMachine<L>> {
    Condition::new("HANDSHAKE_REQUEST", |s: &ParticipantSignal, _: &ParticipantMachine<L>| {
        matches!(s, ParticipantSignal::RequestReceived(r) if r.is_handshake())
    })
}

fn response_ok<L: MsrpSessionListener>() -> Condition<ParticipantMachine<L>> {
    Condition::new("RESPONSE_OK", |s: &ParticipantSignal, _: &ParticipantMachine<L>| {
        matches!(s, ParticipantSignal::ResponseReceived(r) if r.is_success())
    })
}

/// Traffic handled without leaving `Ready` or `Sending`.
fn side_traffic<L: MsrpSessionListener>() -> Condition<ParticipantMachine<L>> {
    Condition::on_any_kind(&[
        ParticipantKind::SendReport,
        ParticipantKind::SendResponse,
        ParticipantKind::RequestReceived,
        ParticipantKind::ReceiveTimeout,
    ])
}

fn build_table<L: MsrpSessionListener>() -> sigstack_fsm_core::Result<StateTable<ParticipantMachine<L>>> {
    use ParticipantKind as K;
    use ParticipantState as S;

    StateTableBuilder::new("msrp-participant")
        .blocking_state(S::Unbound)
        .blocking_state(S::Bound)
        .blocking_state(S::Handshaking)
        .state(S::Ready)
        .blocking_state(S::Sending)
        .terminal_state(S::Closed)
        .add_transition(S::Unbound, on(K::Bind), S::Bound)
        .add_transition(S::Unbound, on(K::Close), S::Closed)
        .add_transition_with_error(S::Bound, on(K::PerformHandshake), S::Handshaking, S::Closed)
        .add_transition(S::Bound, on(K::CompleteHandshake), S::Handshaking)
        .add_transition(S::Bound, handshake_request(), S::Ready)
        .add_transition(S::Bound, on(K::Close), S::Closed)
        .add_transition(S::Handshaking, response_ok(), S::Ready)
        .add_transition(S::Handshaking, on(K::ResponseReceived), S::Closed)
        .add_transition(S::Handshaking, handshake_request(), S::Ready)
        .add_transition(S::Handshaking, on(K::Close), S::Closed)
        .add_transition(S::Ready, live_message(), S::Sending)
        .add_transition(S::Ready, side_traffic(), S::Ready)
        .add_transition(S::Ready, on(K::Close), S::Closed)
        .add_transition(S::Sending, on(K::ResponseReceived), S::Ready)
        .add_transition(S::Sending, side_traffic().or(on(K::BytesSent)), S::Sending)
        .add_transition(S::Sending, on(K::Close), S::Closed)
        .build()
}

/// Shared state of one MSRP session: listener, transactions and the
/// participant state table.
pub struct MsrpSession<L: MsrpSessionListener> {
    config: MsrpConfig,
    transactions: TransactionLayer<MsrpResponse>,
    resources: Arc<dyn ResourceProvider>,
    listener: Arc<L>,
    table: Arc<StateTable<ParticipantMachine<L>>>,
}

impl<L: MsrpSessionListener> MsrpSession<L> {
    pub fn new(config: MsrpConfig, resources: Arc<dyn ResourceProvider>, listener: Arc<L>) -> Result<Self> {
        let tx_config = TransactionConfig {
            default_timeout_ms: config.transaction_timeout_ms,
        };
        let transactions = TransactionLayer::new("msrp", &tx_config, resources.timers().clone());
        let table = Arc::new(build_table::<L>()?);
        Ok(Self {
            config,
            transactions,
            resources,
            listener,
            table,
        })
    }

    /// Spawn the machine for one participant, starting `Unbound`.
    pub fn add_participant(&self, participant: ParticipantId, sending: Arc<dyn SendingListener>) -> Participant<L> {
        let id = format!("msrp-{}", participant);
        let machine_participant = participant.clone();
        let config = self.config.clone();
        let transactions = self.transactions.clone();
        let resources = Arc::clone(&self.resources);
        let listener = Arc::clone(&self.listener);
        let handle = spawn_machine(Arc::clone(&self.table), ParticipantState::Unbound, move |sender| {
            ParticipantMachine {
                id,
                participant: machine_participant,
                config,
                transactions,
                resources,
                sender,
                listener,
                sending,
                connection: None,
                activated: false,
                handshake: None,
                in_flight: None,
                aborted: HashSet::new(),
                inbound: IndexMap::new(),
                timer_seq: 0,
            }
        });
        Participant {
            id: participant,
            handle,
            transactions: self.transactions.clone(),
            max_chunk_size: self.config.max_chunk_size,
        }
    }

    pub fn transactions(&self) -> &TransactionLayer<MsrpResponse> {
        &self.transactions
    }

    pub fn config(&self) -> &MsrpConfig {
        &self.config
    }

    /// A fresh `Message-ID`.
    pub fn new_message_id(&self) -> String {
        self.resources.generate_id()
    }
}

/// Handle to a running participant machine.
pub struct Participant<L: MsrpSessionListener> {
    id: ParticipantId,
    handle: MachineHandle<ParticipantMachine<L>>,
    transactions: TransactionLayer<MsrpResponse>,
    max_chunk_size: usize,
}

impl<L: MsrpSessionListener> Participant<L> {
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn bind(&self, connection: Arc<dyn MsrpConnection>) -> Result<()> {
        self.post(ParticipantSignal::Bind(connection))
    }

    pub fn perform_handshake(&self) -> Result<()> {
        self.post(ParticipantSignal::PerformHandshake)
    }

    pub fn complete_handshake(&self) -> Result<()> {
        self.post(ParticipantSignal::CompleteHandshake)
    }

    pub fn send_request(&self, request: MsrpRequest, msg_state_id: impl Into<String>) -> Result<()> {
        self.post(ParticipantSignal::send_request(request, msg_state_id))
    }

    pub fn send_report(&self, report: MsrpRequest) -> Result<()> {
        self.post(ParticipantSignal::SendReport(report))
    }

    pub fn send_response(&self, response: MsrpResponse) -> Result<()> {
        self.post(ParticipantSignal::SendResponse(response))
    }

    /// Chunking sender posting into this participant.
    pub fn sender(&self) -> MsrpSender {
        MsrpSender::new(self.id.clone(), self.handle.sender(), self.max_chunk_size)
    }

    /// Transport callback: a request arrived from the peer.
    pub fn request_received(&self, request: MsrpRequest) -> Result<()> {
        self.post(ParticipantSignal::RequestReceived(request))
    }

    /// Transport callback: a response arrived. Returns false when no
    /// transaction was waiting for it.
    pub fn response_received(&self, response: MsrpResponse) -> bool {
        let id = response.transaction_id.clone();
        self.transactions.on_response(&id, response)
    }

    /// Transport callback: `count` bytes of the current chunk were written.
    pub fn bytes_sent(&self, count: u64) -> Result<()> {
        self.post(ParticipantSignal::BytesSent(count))
    }

    pub fn close(&self) -> Result<()> {
        self.post(ParticipantSignal::Close)
    }

    pub fn state(&self) -> ParticipantState {
        self.handle.state()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_terminated()
    }

    pub async fn wait_for_state(&self, target: ParticipantState, timeout: Duration) -> Result<ParticipantState> {
        Ok(self.handle.wait_for_state(|s| *s == target, timeout).await?)
    }

    pub fn handle(&self) -> &MachineHandle<ParticipantMachine<L>> {
        &self.handle
    }

    fn post(&self, signal: ParticipantSignal) -> Result<()> {
        if self.handle.send(signal) {
            Ok(())
        } else {
            Err(MsrpError::Closed {
                id: self.id.to_string(),
            })
        }
    }
}
