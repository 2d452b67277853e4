//! # SUBSCRIBE/NOTIFY controller
//!
//! One subscription dialog (RFC 6665) from the subscriber side.
//!
//! Two independent timeout tracks guard the subscription:
//!
//! - the SUBSCRIBE transaction itself, reported by the transaction layer
//!   as `SubscribeTimeout`;
//! - the expected NOTIFY, armed after every 2xx and for the lifetime of an
//!   active or pending subscription, reported as `NotifyTimeout`.
//!
//! Either one firing ends the subscription with [`TerminatedReason::Timeout`].
//! Timer signals carry the number of the arming that produced them, and
//! only the currently armed NOTIFY wait or refresh timer is acted on.
//!
//! `Subscribing`, `Fetching`, `Refreshing` and `Unsubscribing` are blocking:
//! a `terminate` issued while a SUBSCRIBE is in flight is held back until
//! the subscription settles, then turns into an unsubscribe.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use sigstack_fsm_core::{
    spawn_machine, Condition, FsmError, Machine, MachineHandle, Signal, SignalSender, StateTable,
    StateTableBuilder, TimerHandle,
};
use sigstack_transaction_core::{OutcomeSignal, TransactionHandle, TransactionId, TransactionOutcome};
use tracing::{debug, info, warn};

use crate::config::SubscribeConfig;
use crate::context::ClientContext;
use crate::error::{SipClientError, SipClientResult};
use crate::message::{Method, NotifyRequest, OutgoingRequest, SipResponse, SubscriptionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscribeState {
    Init,
    Subscribing,
    Pending,
    Active,
    Refreshing,
    Fetching,
    Unsubscribing,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscribeKind {
    Subscribe,
    Refresh,
    Fetch,
    Terminate,
    Notify,
    Response,
    SubscribeTimeout,
    NotifyTimeout,
    Kill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeSignal {
    Subscribe,
    /// `None` from the application, `Some(n)` from refresh timer arming `n`.
    Refresh(Option<u64>),
    /// One-shot state query (SUBSCRIBE with `Expires: 0`).
    Fetch,
    /// Unsubscribe.
    Terminate,
    Notify(NotifyRequest),
    Response(SipResponse),
    SubscribeTimeout,
    /// NOTIFY wait expired. Carries the timer's arming number.
    NotifyTimeout(u64),
    /// Drop the subscription locally without sending anything.
    Kill,
}

impl SubscribeSignal {
    fn notify_state(&self) -> Option<&SubscriptionState> {
        match self {
            SubscribeSignal::Notify(n) => Some(&n.subscription_state),
            _ => None,
        }
    }
}

impl Signal for SubscribeSignal {
    type Kind = SubscribeKind;

    fn kind(&self) -> SubscribeKind {
        match self {
            SubscribeSignal::Subscribe => SubscribeKind::Subscribe,
            SubscribeSignal::Refresh(_) => SubscribeKind::Refresh,
            SubscribeSignal::Fetch => SubscribeKind::Fetch,
            SubscribeSignal::Terminate => SubscribeKind::Terminate,
            SubscribeSignal::Notify(_) => SubscribeKind::Notify,
            SubscribeSignal::Response(_) => SubscribeKind::Response,
            SubscribeSignal::SubscribeTimeout => SubscribeKind::SubscribeTimeout,
            SubscribeSignal::NotifyTimeout(_) => SubscribeKind::NotifyTimeout,
            SubscribeSignal::Kill => SubscribeKind::Kill,
        }
    }
}

impl OutcomeSignal<SipResponse> for SubscribeSignal {
    fn from_outcome(_id: &TransactionId, outcome: TransactionOutcome<SipResponse>) -> Self {
        match outcome {
            TransactionOutcome::Response(r) => SubscribeSignal::Response(r),
            TransactionOutcome::TimedOut => SubscribeSignal::SubscribeTimeout,
        }
    }
}

/// Why a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminatedReason {
    Error,
    Timeout,
    NoResource,
    Deactivated,
    Probation,
    Rejected,
    Giveup,
    BadFilter,
}

impl TerminatedReason {
    /// Map a `Subscription-State` reason token. Unknown or missing tokens
    /// map to `Timeout`.
    pub fn from_token(token: Option<&str>) -> Self {
        let Some(token) = token else {
            return TerminatedReason::Timeout;
        };
        match token.trim().to_ascii_lowercase().as_str() {
            "error" => TerminatedReason::Error,
            "timeout" => TerminatedReason::Timeout,
            "noresource" => TerminatedReason::NoResource,
            "deactivated" => TerminatedReason::Deactivated,
            "probation" => TerminatedReason::Probation,
            "rejected" => TerminatedReason::Rejected,
            "giveup" => TerminatedReason::Giveup,
            "badfilter" => TerminatedReason::BadFilter,
            _ => TerminatedReason::Timeout,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminatedReason::Error => "error",
            TerminatedReason::Timeout => "timeout",
            TerminatedReason::NoResource => "noresource",
            TerminatedReason::Deactivated => "deactivated",
            TerminatedReason::Probation => "probation",
            TerminatedReason::Rejected => "rejected",
            TerminatedReason::Giveup => "giveup",
            TerminatedReason::BadFilter => "badfilter",
        }
    }
}

impl fmt::Display for TerminatedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application callbacks for one subscription.
pub trait SubscriptionListener: Send + Sync {
    /// A NOTIFY carried a body.
    fn notify_received(&self, body: &Bytes, content_type: Option<&str>) {
        let _ = (body, content_type);
    }

    /// The subscription became active for `expires` seconds.
    fn active(&self, expires: u32) {
        let _ = expires;
    }

    /// The notifier has not authorised the subscription yet.
    fn pending(&self) {}

    fn terminated(&self, reason: TerminatedReason) {
        let _ = reason;
    }
}

/// Context of one SUBSCRIBE state machine.
pub struct SubscribeMachine {
    id: String,
    config: SubscribeConfig,
    ctx: ClientContext,
    sender: SignalSender<SubscribeSignal>,
    listener: Arc<dyn SubscriptionListener>,
    expires: u32,
    granted: u32,
    retries: u32,
    activated: bool,
    last_error: Option<String>,
    transaction: Option<TransactionHandle<SipResponse>>,
    notify_timer: Option<TimerHandle>,
    refresh_timer: Option<TimerHandle>,
    notify_seq: Option<u64>,
    refresh_seq: Option<u64>,
    timer_seq: u64,
}

impl SubscribeMachine {
    pub fn new(
        id: impl Into<String>,
        config: SubscribeConfig,
        ctx: ClientContext,
        sender: SignalSender<SubscribeSignal>,
        listener: Arc<dyn SubscriptionListener>,
    ) -> Self {
        let expires = config.expires_secs;
        Self {
            id: id.into(),
            config,
            ctx,
            sender,
            listener,
            expires,
            granted: expires,
            retries: 0,
            activated: false,
            last_error: None,
            transaction: None,
            notify_timer: None,
            refresh_timer: None,
            notify_seq: None,
            refresh_seq: None,
            timer_seq: 0,
        }
    }

    /// Lifetime granted by the notifier.
    pub fn granted_expires(&self) -> u32 {
        self.granted
    }

    /// Whether the subscription has been active at least once.
    pub fn was_activated(&self) -> bool {
        self.activated
    }

    fn retries_left(&self) -> bool {
        self.retries < self.config.max_retries
    }

    fn send_subscribe(&mut self, state: SubscribeState, expires: u32) -> sigstack_fsm_core::Result<()> {
        let request = OutgoingRequest::new(Method::Subscribe, &self.config.target_uri, self.ctx.local_uri())
            .with_event(&self.config.event)
            .with_expires(expires);
        debug!(machine = %self.id, transaction = %request.transaction_id, expires, "sending SUBSCRIBE");
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

    /// Apply a 423 and send again with the longer interval.
    fn resend_longer(&mut self, state: SubscribeState, response: &SipResponse) -> sigstack_fsm_core::Result<()> {
        self.retries += 1;
        if let Some(min) = response.min_expires() {
            self.expires = self.expires.max(min);
        }
        debug!(machine = %self.id, expires = self.expires, "interval too brief, retrying");
        self.send_subscribe(state, self.expires)
    }

    fn next_timer_seq(&mut self) -> u64 {
        self.timer_seq += 1;
        self.timer_seq
    }

    fn arm_notify_wait(&mut self, wait: Duration) {
        let seq = self.next_timer_seq();
        self.notify_seq = Some(seq);
        self.notify_timer = Some(
            self.ctx
                .timers()
                .schedule(wait, &self.sender, SubscribeSignal::NotifyTimeout(seq)),
        );
    }

    fn disarm_notify_wait(&mut self) {
        self.notify_timer = None;
        self.notify_seq = None;
    }

    fn disarm_refresh(&mut self) {
        self.refresh_timer = None;
        self.refresh_seq = None;
    }

    fn deliver_body(&self, notify: &NotifyRequest) {
        if let Some(body) = &notify.body {
            self.listener.notify_received(body, notify.content_type.as_deref());
        }
    }

    /// Shared entry logic for `Active` and `Pending`.
    fn settle(&mut self, signal: &SubscribeSignal) {
        match signal {
            SubscribeSignal::Notify(notify) => {
                self.deliver_body(notify);
                if let SubscriptionState::Active { expires: Some(e) } | SubscriptionState::Pending { expires: Some(e) } =
                    notify.subscription_state
                {
                    self.granted = e;
                }
            }
            SubscribeSignal::Response(response) => {
                if let Some(e) = response.expires() {
                    self.granted = e;
                }
            }
            _ => {}
        }
        self.retries = 0;
        let refresh = self.config.refresh_after(self.granted);
        let seq = self.next_timer_seq();
        self.refresh_seq = Some(seq);
        self.refresh_timer = Some(
            self.ctx
                .timers()
                .schedule(refresh, &self.sender, SubscribeSignal::Refresh(Some(seq))),
        );
        self.arm_notify_wait(self.config.expiry_deadline(self.granted));
    }

    fn finish(&mut self, signal: &SubscribeSignal) {
        if let Some(transaction) = self.transaction.take() {
            transaction.cancel();
        }
        self.disarm_notify_wait();
        self.disarm_refresh();

        if let SubscribeSignal::Notify(notify) = signal {
            self.deliver_body(notify);
        }
        let reason = if let Some(error) = self.last_error.take() {
            warn!(machine = %self.id, %error, "subscription failed");
            TerminatedReason::Error
        } else {
            match signal {
                SubscribeSignal::Notify(notify) => match &notify.subscription_state {
                    SubscriptionState::Terminated { reason } => TerminatedReason::from_token(reason.as_deref()),
                    _ => TerminatedReason::from_token(None),
                },
                SubscribeSignal::Response(response) => {
                    warn!(machine = %self.id, status = response.status, "SUBSCRIBE rejected");
                    TerminatedReason::Error
                }
                _ => TerminatedReason::Timeout,
            }
        };
        info!(machine = %self.id, %reason, "subscription terminated");
        self.listener.terminated(reason);
    }
}

impl Machine for SubscribeMachine {
    type Signal = SubscribeSignal;
    type State = SubscribeState;

    fn id(&self) -> &str {
        &self.id
    }

    fn on_enter(
        &mut self,
        state: SubscribeState,
        signal: &SubscribeSignal,
        re_entering: bool,
    ) -> sigstack_fsm_core::Result<()> {
        match state {
            SubscribeState::Init => Ok(()),
            SubscribeState::Subscribing => match signal {
                SubscribeSignal::Response(r) if r.is_success() => {
                    if let Some(e) = r.expires() {
                        self.granted = e;
                    }
                    self.arm_notify_wait(self.config.notify_wait());
                    Ok(())
                }
                SubscribeSignal::Response(r) => self.resend_longer(state, r),
                _ => self.send_subscribe(state, self.expires),
            },
            SubscribeState::Fetching => match signal {
                SubscribeSignal::Response(_) => {
                    self.arm_notify_wait(self.config.notify_wait());
                    Ok(())
                }
                _ => self.send_subscribe(state, 0),
            },
            SubscribeState::Pending => {
                self.settle(signal);
                if !re_entering {
                    info!(machine = %self.id, "subscription pending");
                    self.listener.pending();
                }
                Ok(())
            }
            SubscribeState::Active => {
                self.settle(signal);
                self.activated = true;
                if !re_entering {
                    info!(machine = %self.id, expires = self.granted, "subscription active");
                    self.listener.active(self.granted);
                }
                Ok(())
            }
            SubscribeState::Refreshing => match signal {
                SubscribeSignal::Response(r) => self.resend_longer(state, r),
                _ => self.send_subscribe(state, self.expires),
            },
            SubscribeState::Unsubscribing => match signal {
                SubscribeSignal::Response(_) => {
                    self.arm_notify_wait(self.config.notify_wait());
                    Ok(())
                }
                SubscribeSignal::Notify(notify) => {
                    self.deliver_body(notify);
                    Ok(())
                }
                _ => self.send_subscribe(state, 0),
            },
            SubscribeState::Terminated => {
                self.finish(signal);
                Ok(())
            }
        }
    }

    fn on_exit(&mut self, state: SubscribeState, _signal: &SubscribeSignal, re_entering_next: bool) {
        match state {
            SubscribeState::Active | SubscribeState::Pending => {
                self.disarm_refresh();
                self.disarm_notify_wait();
            }
            _ if !re_entering_next => {
                if let Some(transaction) = self.transaction.take() {
                    transaction.cancel();
                }
                self.disarm_notify_wait();
            }
            _ => {}
        }
    }
}

fn on(kind: SubscribeKind) -> Condition<SubscribeMachine> {
    Condition::on_kind(kind)
}

fn response_ok() -> Condition<SubscribeMachine> {
    Condition::new("RESPONSE_OK", |s: &SubscribeSignal, _: &SubscribeMachine| {
        matches!(s, SubscribeSignal::Response(r) if r.is_success())
    })
}

fn response_423() -> Condition<SubscribeMachine> {
    Condition::new("RESPONSE_423", |s: &SubscribeSignal, m: &SubscribeMachine| {
        matches!(s, SubscribeSignal::Response(r) if r.status == 423 && r.min_expires().is_some()) && m.retries_left()
    })
}

fn response_failed() -> Condition<SubscribeMachine> {
    Condition::new("RESPONSE_FAILED", |s: &SubscribeSignal, _: &SubscribeMachine| {
        matches!(s, SubscribeSignal::Response(r) if !r.is_success())
    })
}

fn notify_active() -> Condition<SubscribeMachine> {
    Condition::new("NOTIFY_ACTIVE", |s: &SubscribeSignal, _: &SubscribeMachine| {
        matches!(s.notify_state(), Some(SubscriptionState::Active { .. }))
    })
}

fn notify_pending() -> Condition<SubscribeMachine> {
    Condition::new("NOTIFY_PENDING", |s: &SubscribeSignal, _: &SubscribeMachine| {
        matches!(s.notify_state(), Some(SubscriptionState::Pending { .. }))
    })
}

fn notify_terminated() -> Condition<SubscribeMachine> {
    Condition::new("NOTIFY_TERMINATED", |s: &SubscribeSignal, _: &SubscribeMachine| {
        matches!(s.notify_state(), Some(SubscriptionState::Terminated { .. }))
    })
}

/// NOTIFY wait expiry from the armed timer.
fn notify_wait_expired() -> Condition<SubscribeMachine> {
    Condition::new("NOTIFY_WAIT_EXPIRED", |s: &SubscribeSignal, m: &SubscribeMachine| {
        matches!(s, SubscribeSignal::NotifyTimeout(seq) if m.notify_seq == Some(*seq))
    })
}

/// An application refresh, or one from the armed refresh timer.
fn refresh_due() -> Condition<SubscribeMachine> {
    Condition::new("REFRESH_DUE", |s: &SubscribeSignal, m: &SubscribeMachine| match s {
        SubscribeSignal::Refresh(None) => true,
        SubscribeSignal::Refresh(Some(seq)) => m.refresh_seq == Some(*seq),
        _ => false,
    })
}

fn activated() -> Condition<SubscribeMachine> {
    Condition::new("ACTIVATED", |_: &SubscribeSignal, m: &SubscribeMachine| m.activated)
}

fn build_table() -> sigstack_fsm_core::Result<StateTable<SubscribeMachine>> {
    use SubscribeKind as K;
    use SubscribeState as S;

    let mut b = StateTableBuilder::new("subscribe")
        .state(S::Init)
        .blocking_state(S::Subscribing)
        .state(S::Pending)
        .state(S::Active)
        .blocking_state(S::Refreshing)
        .blocking_state(S::Fetching)
        .blocking_state(S::Unsubscribing)
        .terminal_state(S::Terminated)
        .add_transition_with_error(S::Init, on(K::Subscribe), S::Subscribing, S::Terminated)
        .add_transition_with_error(S::Init, on(K::Fetch), S::Fetching, S::Terminated)
        .add_transition(S::Init, Condition::on_any_kind(&[K::Terminate, K::Kill]), S::Terminated)
        .add_transition_with_error(S::Subscribing, response_ok(), S::Subscribing, S::Terminated)
        .add_transition_with_error(S::Subscribing, response_423(), S::Subscribing, S::Terminated)
        .add_transition(S::Subscribing, response_failed(), S::Terminated)
        .add_transition(S::Subscribing, notify_active(), S::Active)
        .add_transition(S::Subscribing, notify_pending(), S::Pending)
        .add_transition(S::Subscribing, notify_terminated(), S::Terminated)
        .add_transition(
            S::Subscribing,
            Condition::on_any_kind(&[K::SubscribeTimeout, K::Kill]).or(notify_wait_expired()),
            S::Terminated,
        )
        .add_transition(S::Fetching, response_ok(), S::Fetching)
        .add_transition(S::Fetching, response_failed(), S::Terminated)
        .add_transition(S::Fetching, on(K::Notify), S::Terminated)
        .add_transition(
            S::Fetching,
            Condition::on_any_kind(&[K::SubscribeTimeout, K::Kill]).or(notify_wait_expired()),
            S::Terminated,
        );

    for settled in [S::Pending, S::Active] {
        b = b
            .add_transition(settled, notify_active(), S::Active)
            .add_transition(settled, notify_pending(), S::Pending)
            .add_transition(settled, notify_terminated(), S::Terminated)
            .add_transition_with_error(settled, refresh_due(), S::Refreshing, S::Terminated)
            .add_transition_with_error(settled, on(K::Terminate), S::Unsubscribing, S::Terminated)
            .add_transition(settled, on(K::Kill).or(notify_wait_expired()), S::Terminated);
    }

    b.add_transition(S::Refreshing, response_ok().and(activated()), S::Active)
        .add_transition(S::Refreshing, response_ok(), S::Pending)
        .add_transition_with_error(S::Refreshing, response_423(), S::Refreshing, S::Terminated)
        .add_transition(S::Refreshing, response_failed(), S::Terminated)
        .add_transition(S::Refreshing, notify_terminated(), S::Terminated)
        .add_transition(
            S::Refreshing,
            Condition::on_any_kind(&[K::SubscribeTimeout, K::Kill]),
            S::Terminated,
        )
        .add_transition(S::Unsubscribing, response_ok(), S::Unsubscribing)
        .add_transition(S::Unsubscribing, notify_terminated(), S::Terminated)
        .add_transition(S::Unsubscribing, on(K::Notify), S::Unsubscribing)
        .add_transition(S::Unsubscribing, response_failed(), S::Terminated)
        .add_transition(
            S::Unsubscribing,
            Condition::on_any_kind(&[K::SubscribeTimeout, K::Kill]).or(notify_wait_expired()),
            S::Terminated,
        )
        .build()
}

static SUBSCRIBE_TABLE: OnceLock<sigstack_fsm_core::Result<Arc<StateTable<SubscribeMachine>>>> = OnceLock::new();

/// The shared SUBSCRIBE state table.
pub fn subscribe_table() -> SipClientResult<Arc<StateTable<SubscribeMachine>>> {
    SUBSCRIBE_TABLE
        .get_or_init(|| build_table().map(Arc::new))
        .clone()
        .map_err(SipClientError::from)
}

/// A running SUBSCRIBE controller.
pub struct SubscribeController {
    handle: MachineHandle<SubscribeMachine>,
}

impl SubscribeController {
    pub fn start(
        config: SubscribeConfig,
        ctx: ClientContext,
        listener: Arc<dyn SubscriptionListener>,
    ) -> SipClientResult<Self> {
        if config.target_uri.is_empty() {
            return Err(SipClientError::config("target_uri must be set"));
        }
        let table = subscribe_table()?;
        let id = format!("subscribe-{}", ctx.resources.generate_id());
        let handle = spawn_machine(table, SubscribeState::Init, move |sender| {
            SubscribeMachine::new(id, config, ctx, sender, listener)
        });
        Ok(Self { handle })
    }

    pub fn subscribe(&self) -> SipClientResult<()> {
        self.post(SubscribeSignal::Subscribe)
    }

    /// Query the current state once without keeping a subscription.
    pub fn fetch(&self) -> SipClientResult<()> {
        self.post(SubscribeSignal::Fetch)
    }

    pub fn refresh(&self) -> SipClientResult<()> {
        self.post(SubscribeSignal::Refresh(None))
    }

    pub fn unsubscribe(&self) -> SipClientResult<()> {
        self.post(SubscribeSignal::Terminate)
    }

    pub fn kill(&self) -> SipClientResult<()> {
        self.post(SubscribeSignal::Kill)
    }

    /// Hand an incoming NOTIFY for this dialog to the controller.
    pub fn notify_received(&self, notify: NotifyRequest) -> SipClientResult<()> {
        self.post(SubscribeSignal::Notify(notify))
    }

    pub fn state(&self) -> SubscribeState {
        self.handle.state()
    }

    pub async fn wait_for_state(&self, target: SubscribeState, timeout: Duration) -> SipClientResult<SubscribeState> {
        Ok(self.handle.wait_for_state(|s| *s == target, timeout).await?)
    }

    pub fn handle(&self) -> &MachineHandle<SubscribeMachine> {
        &self.handle
    }

    fn post(&self, signal: SubscribeSignal) -> SipClientResult<()> {
        if self.handle.send(signal) {
            Ok(())
        } else {
            Err(SipClientError::Terminated {
                id: self.handle.id().to_string(),
            })
        }
    }
}
