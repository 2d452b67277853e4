//! # PUBLISH controller
//!
//! Publishes event state (RFC 3903) and keeps it alive with conditional
//! refreshes.
//!
//! Two signals share the `SendPublish` kind: new content from the
//! application, and the refresh posted by the refresh timer. The two are
//! told apart by the `SEND_PUBLISH` and `SEND_REFRESH` conditions, so a
//! state can accept one and not the other. A refresh only matches while
//! the timer that posted it is still the armed one.
//!
//! Responses: 2xx keeps the ETag from `SIP-ETag`, 423 re-sends with the
//! server's `Min-Expires`, 412 drops the ETag and re-publishes the stored
//! content unconditionally, and anything else ends the publication.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use sigstack_fsm_core::{
    spawn_machine, Condition, FsmError, Machine, MachineHandle, Signal, SignalSender, StateTable,
    StateTableBuilder, TimerHandle,
};
use sigstack_transaction_core::{OutcomeSignal, TransactionHandle, TransactionId, TransactionOutcome};
use tracing::{debug, info, warn};

use crate::config::PublishConfig;
use crate::context::ClientContext;
use crate::error::{SipClientError, SipClientResult};
use crate::message::{Method, OutgoingRequest, SipResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishState {
    Init,
    SendPublish,
    Published,
    SendRemove,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishKind {
    SendPublish,
    Ok,
    IntervalTooBrief,
    CondReqFailed,
    ErrorOrTimeout,
    Unpublish,
    Terminate,
}

/// Event state document to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishContent {
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishSignal {
    /// New content for the publication.
    SendPublish(PublishContent),
    /// Refresh timer fired. Carries the timer's arming number.
    Refresh(u64),
    Ok(SipResponse),
    IntervalTooBrief(SipResponse),
    CondReqFailed(SipResponse),
    /// `None` when the transaction timed out.
    ErrorOrTimeout(Option<SipResponse>),
    Unpublish,
    Terminate,
}

impl PublishSignal {
    pub fn publish(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        PublishSignal::SendPublish(PublishContent {
            content_type: content_type.into(),
            body: body.into(),
        })
    }

    pub fn refresh(seq: u64) -> Self {
        PublishSignal::Refresh(seq)
    }

    /// Classify a final response to PUBLISH.
    pub fn response(response: SipResponse) -> Self {
        match response.status {
            200..=299 => PublishSignal::Ok(response),
            423 => PublishSignal::IntervalTooBrief(response),
            412 => PublishSignal::CondReqFailed(response),
            _ => PublishSignal::ErrorOrTimeout(Some(response)),
        }
    }

    pub fn timeout() -> Self {
        PublishSignal::ErrorOrTimeout(None)
    }

    fn has_content(&self) -> bool {
        matches!(self, PublishSignal::SendPublish(_))
    }

    fn status(&self) -> Option<u16> {
        match self {
            PublishSignal::Ok(r)
            | PublishSignal::IntervalTooBrief(r)
            | PublishSignal::CondReqFailed(r)
            | PublishSignal::ErrorOrTimeout(Some(r)) => Some(r.status),
            _ => None,
        }
    }
}

impl Signal for PublishSignal {
    type Kind = PublishKind;

    fn kind(&self) -> PublishKind {
        match self {
            PublishSignal::SendPublish(_) | PublishSignal::Refresh(_) => PublishKind::SendPublish,
            PublishSignal::Ok(_) => PublishKind::Ok,
            PublishSignal::IntervalTooBrief(_) => PublishKind::IntervalTooBrief,
            PublishSignal::CondReqFailed(_) => PublishKind::CondReqFailed,
            PublishSignal::ErrorOrTimeout(_) => PublishKind::ErrorOrTimeout,
            PublishSignal::Unpublish => PublishKind::Unpublish,
            PublishSignal::Terminate => PublishKind::Terminate,
        }
    }
}

impl OutcomeSignal<SipResponse> for PublishSignal {
    fn from_outcome(_id: &TransactionId, outcome: TransactionOutcome<SipResponse>) -> Self {
        match outcome {
            TransactionOutcome::Response(r) => PublishSignal::response(r),
            TransactionOutcome::TimedOut => PublishSignal::timeout(),
        }
    }
}

/// Application callbacks for one publication.
pub trait PublicationListener: Send + Sync {
    /// The server accepted the state under `etag` for `expires` seconds.
    fn published(&self, etag: Option<&str>, expires: u32) {
        let _ = (etag, expires);
    }

    /// The publication ended. `status` is the last final response, if any.
    fn terminated(&self, status: Option<u16>) {
        let _ = status;
    }
}

/// Context of one PUBLISH state machine.
pub struct PublishMachine {
    id: String,
    config: PublishConfig,
    ctx: ClientContext,
    sender: SignalSender<PublishSignal>,
    listener: Arc<dyn PublicationListener>,
    content: Option<PublishContent>,
    etag: Option<String>,
    expires: u32,
    retries: u32,
    last_with_body: bool,
    last_error: Option<String>,
    transaction: Option<TransactionHandle<SipResponse>>,
    refresh_timer: Option<TimerHandle>,
    refresh_seq: Option<u64>,
    timer_seq: u64,
}

impl PublishMachine {
    pub fn new(
        id: impl Into<String>,
        config: PublishConfig,
        ctx: ClientContext,
        sender: SignalSender<PublishSignal>,
        listener: Arc<dyn PublicationListener>,
    ) -> Self {
        let expires = config.expires_secs;
        Self {
            id: id.into(),
            config,
            ctx,
            sender,
            listener,
            content: None,
            etag: None,
            expires,
            retries: 0,
            last_with_body: true,
            last_error: None,
            transaction: None,
            refresh_timer: None,
            refresh_seq: None,
            timer_seq: 0,
        }
    }

    /// Entity tag of the current publication.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Expiry requested in the next PUBLISH.
    pub fn requested_expires(&self) -> u32 {
        self.expires
    }

    fn retries_left(&self) -> bool {
        self.retries < self.config.max_retries
    }

    fn send_publish(&mut self, state: PublishState, with_body: bool) -> sigstack_fsm_core::Result<()> {
        // Without an entity tag there is nothing to refresh conditionally.
        let with_body = with_body || self.etag.is_none();
        let mut request = OutgoingRequest::new(Method::Publish, &self.config.target_uri, self.ctx.local_uri())
            .with_event(&self.config.event)
            .with_expires(self.expires)
            .with_if_match(self.etag.clone());
        if with_body {
            let Some(content) = &self.content else {
                return Err(FsmError::hook(state, "no content to publish"));
            };
            request = request.with_body(&content.content_type, content.body.clone());
        }
        self.last_with_body = with_body;
        debug!(machine = %self.id, transaction = %request.transaction_id, with_body, etag = ?self.etag, expires = self.expires, "sending PUBLISH");
        self.dispatch(state, request)
    }

    fn send_remove(&mut self, state: PublishState) -> sigstack_fsm_core::Result<()> {
        let request = OutgoingRequest::new(Method::Publish, &self.config.target_uri, self.ctx.local_uri())
            .with_event(&self.config.event)
            .with_expires(0)
            .with_if_match(self.etag.clone());
        debug!(machine = %self.id, transaction = %request.transaction_id, etag = ?self.etag, "removing publication");
        self.dispatch(state, request)
    }

    fn dispatch(&mut self, state: PublishState, request: OutgoingRequest) -> sigstack_fsm_core::Result<()> {
        match self.ctx.send(request, self.config.request_timeout(), &self.sender) {
            Ok(handle) => {
                self.transaction = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(FsmError::hook(state, e.to_string()))
            }
        }
    }

    fn on_published(&mut self, signal: &PublishSignal) {
        let PublishSignal::Ok(response) = signal else {
            return;
        };
        match response.sip_etag() {
            Some(etag) => self.etag = Some(etag.to_string()),
            None => warn!(machine = %self.id, "2xx to PUBLISH without SIP-ETag, keeping previous tag"),
        }
        let granted = response.expires().unwrap_or(self.expires);
        self.retries = 0;
        info!(machine = %self.id, etag = ?self.etag, expires = granted, "published");
        self.listener.published(self.etag.as_deref(), granted);
        if granted > 0 {
            let delay = self.config.refresh_after(granted);
            self.timer_seq += 1;
            self.refresh_seq = Some(self.timer_seq);
            self.refresh_timer = Some(self.ctx.timers().schedule(
                delay,
                &self.sender,
                PublishSignal::refresh(self.timer_seq),
            ));
        }
    }

    fn disarm_refresh(&mut self) {
        self.refresh_timer = None;
        self.refresh_seq = None;
    }
}

impl Machine for PublishMachine {
    type Signal = PublishSignal;
    type State = PublishState;

    fn id(&self) -> &str {
        &self.id
    }

    fn on_enter(
        &mut self,
        state: PublishState,
        signal: &PublishSignal,
        _re_entering: bool,
    ) -> sigstack_fsm_core::Result<()> {
        match state {
            PublishState::Init => Ok(()),
            PublishState::SendPublish => match signal {
                PublishSignal::SendPublish(content) => {
                    self.content = Some(content.clone());
                    self.send_publish(state, true)
                }
                PublishSignal::Refresh(_) => self.send_publish(state, false),
                PublishSignal::IntervalTooBrief(response) => {
                    self.retries += 1;
                    if let Some(min) = response.min_expires() {
                        self.expires = self.expires.max(min);
                    }
                    let with_body = self.last_with_body;
                    self.send_publish(state, with_body)
                }
                PublishSignal::CondReqFailed(_) => {
                    self.retries += 1;
                    self.etag = None;
                    self.send_publish(state, true)
                }
                _ => {
                    let with_body = self.last_with_body;
                    self.send_publish(state, with_body)
                }
            },
            PublishState::Published => {
                self.on_published(signal);
                Ok(())
            }
            PublishState::SendRemove => self.send_remove(state),
            PublishState::Terminated => {
                if let Some(transaction) = self.transaction.take() {
                    transaction.cancel();
                }
                self.disarm_refresh();
                let status = match self.last_error.take() {
                    Some(error) => {
                        warn!(machine = %self.id, %error, "publication failed");
                        None
                    }
                    None => signal.status(),
                };
                info!(machine = %self.id, ?status, "publication terminated");
                self.listener.terminated(status);
                Ok(())
            }
        }
    }

    fn on_exit(&mut self, state: PublishState, _signal: &PublishSignal, _re_entering_next: bool) {
        match state {
            PublishState::SendPublish | PublishState::SendRemove => {
                if let Some(transaction) = self.transaction.take() {
                    transaction.cancel();
                }
            }
            PublishState::Published => self.disarm_refresh(),
            PublishState::Init | PublishState::Terminated => {}
        }
    }
}

fn on(kind: PublishKind) -> Condition<PublishMachine> {
    Condition::on_kind(kind)
}

fn has_content() -> Condition<PublishMachine> {
    Condition::new("HAS_CONTENT", |s: &PublishSignal, _: &PublishMachine| s.has_content())
}

/// `sendPublish` carrying new content.
pub fn send_publish() -> Condition<PublishMachine> {
    on(PublishKind::SendPublish).and(has_content()).named("SEND_PUBLISH")
}

/// `sendPublish` without content: a refresh from the armed timer.
pub fn send_refresh() -> Condition<PublishMachine> {
    on(PublishKind::SendPublish)
        .and(has_content().negate())
        .and(Condition::new("REFRESH_DUE", |s: &PublishSignal, m: &PublishMachine| {
            matches!(s, PublishSignal::Refresh(seq) if m.refresh_seq == Some(*seq))
        }))
        .named("SEND_REFRESH")
}

fn retry_interval() -> Condition<PublishMachine> {
    Condition::new("RETRY_423", |s: &PublishSignal, m: &PublishMachine| match s {
        PublishSignal::IntervalTooBrief(r) => r.min_expires().is_some() && m.retries_left(),
        _ => false,
    })
}

fn retry_conditional() -> Condition<PublishMachine> {
    Condition::new("RETRY_412", |s: &PublishSignal, m: &PublishMachine| {
        s.kind() == PublishKind::CondReqFailed && m.content.is_some() && m.retries_left()
    })
}

fn build_table() -> sigstack_fsm_core::Result<StateTable<PublishMachine>> {
    use PublishKind as K;
    use PublishState as S;

    StateTableBuilder::new("publish")
        .state(S::Init)
        .blocking_state(S::SendPublish)
        .state(S::Published)
        .blocking_state(S::SendRemove)
        .terminal_state(S::Terminated)
        .add_transition_with_error(S::Init, send_publish(), S::SendPublish, S::Terminated)
        .add_transition(S::Init, Condition::on_any_kind(&[K::Unpublish, K::Terminate]), S::Terminated)
        .add_transition(S::SendPublish, on(K::Ok), S::Published)
        .add_transition_with_error(S::SendPublish, retry_interval(), S::SendPublish, S::Terminated)
        .add_transition_with_error(S::SendPublish, retry_conditional(), S::SendPublish, S::Terminated)
        .add_transition(
            S::SendPublish,
            Condition::on_any_kind(&[K::IntervalTooBrief, K::CondReqFailed, K::ErrorOrTimeout, K::Terminate]),
            S::Terminated,
        )
        .add_transition_with_error(S::Published, send_publish(), S::SendPublish, S::Terminated)
        .add_transition_with_error(S::Published, send_refresh(), S::SendPublish, S::Terminated)
        .add_transition_with_error(S::Published, on(K::Unpublish), S::SendRemove, S::Terminated)
        .add_transition(S::Published, on(K::Terminate), S::Terminated)
        .add_transition(
            S::SendRemove,
            Condition::on_any_kind(&[
                K::Ok,
                K::IntervalTooBrief,
                K::CondReqFailed,
                K::ErrorOrTimeout,
                K::Terminate,
            ]),
            S::Terminated,
        )
        .build()
}

static PUBLISH_TABLE: OnceLock<sigstack_fsm_core::Result<Arc<StateTable<PublishMachine>>>> = OnceLock::new();

/// The shared PUBLISH state table.
pub fn publish_table() -> SipClientResult<Arc<StateTable<PublishMachine>>> {
    PUBLISH_TABLE
        .get_or_init(|| build_table().map(Arc::new))
        .clone()
        .map_err(SipClientError::from)
}

/// A running PUBLISH controller.
pub struct PublishController {
    handle: MachineHandle<PublishMachine>,
}

impl PublishController {
    pub fn start(
        config: PublishConfig,
        ctx: ClientContext,
        listener: Arc<dyn PublicationListener>,
    ) -> SipClientResult<Self> {
        if config.target_uri.is_empty() {
            return Err(SipClientError::config("target_uri must be set"));
        }
        let table = publish_table()?;
        let id = format!("publish-{}", ctx.resources.generate_id());
        let handle = spawn_machine(table, PublishState::Init, move |sender| {
            PublishMachine::new(id, config, ctx, sender, listener)
        });
        Ok(Self { handle })
    }

    /// Publish new state, replacing the current document.
    pub fn publish(&self, content_type: impl Into<String>, body: impl Into<Bytes>) -> SipClientResult<()> {
        self.post(PublishSignal::publish(content_type, body))
    }

    /// Remove the publication from the server.
    pub fn unpublish(&self) -> SipClientResult<()> {
        self.post(PublishSignal::Unpublish)
    }

    pub fn terminate(&self) -> SipClientResult<()> {
        self.post(PublishSignal::Terminate)
    }

    pub fn state(&self) -> PublishState {
        self.handle.state()
    }

    pub async fn wait_for_state(&self, target: PublishState, timeout: Duration) -> SipClientResult<PublishState> {
        Ok(self.handle.wait_for_state(|s| *s == target, timeout).await?)
    }

    pub fn handle(&self) -> &MachineHandle<PublishMachine> {
        &self.handle
    }

    fn post(&self, signal: PublishSignal) -> SipClientResult<()> {
        if self.handle.send(signal) {
            Ok(())
        } else {
            Err(SipClientError::Terminated {
                id: self.handle.id().to_string(),
            })
        }
    }
}
