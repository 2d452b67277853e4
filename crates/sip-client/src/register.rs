//! # REGISTER controller
//!
//! Keeps one registration binding alive at a registrar.
//!
//! ```text
//!            register             200/202
//!   Init ─────────────▶ SendRegister ───────▶ Ok ──refresh──▶ SendRegister
//!                        │   ▲    │             │
//!                   401  │   │412 │ error       │ unregister
//!                        ▼   │    ▼             ▼
//!              Unauthenticated  RetryWait   SendUnregister ──any──▶ Terminated
//! ```
//!
//! Response mapping: 200 and 202 mean success (202 is logged as unexpected),
//! 401 is answered with digest credentials up to `max_auth_attempts` times,
//! 412 re-sends immediately, and anything else (including no response at
//! all) goes through an exponential back-off in `RetryWait` until
//! `max_retries` is used up.
//!
//! `SendRegister`, `Unauthenticated` and `SendUnregister` are blocking: an
//! `unregister` issued while a REGISTER is in flight waits for its answer.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use sigstack_fsm_core::{
    spawn_machine, Condition, FsmError, Machine, MachineHandle, Signal, SignalSender, StateTable,
    StateTableBuilder, TimerHandle,
};
use sigstack_transaction_core::{OutcomeSignal, TransactionHandle, TransactionId, TransactionOutcome};
use tracing::{debug, info, warn};

use crate::auth::DigestChallenge;
use crate::config::RegisterConfig;
use crate::context::ClientContext;
use crate::error::{SipClientError, SipClientResult};
use crate::message::{Method, OutgoingRequest, SipResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterState {
    Init,
    Unauthenticated,
    SendRegister,
    Ok,
    SendUnregister,
    RetryWait,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    Register,
    Ok,
    Unauth,
    CondReqFailed,
    ErrorOrTimeout,
    Refresh,
    Retry,
    Unregister,
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterSignal {
    Register,
    Ok(SipResponse),
    Unauth(SipResponse),
    CondReqFailed(SipResponse),
    /// `None` when the transaction timed out.
    ErrorOrTimeout(Option<SipResponse>),
    /// Refresh timer fired. Carries the timer's arming number.
    Refresh(u64),
    /// Back-off timer fired. Carries the timer's arming number.
    Retry(u64),
    Unregister,
    Terminate,
}

impl RegisterSignal {
    /// Classify a final response to REGISTER.
    pub fn response(response: SipResponse) -> Self {
        match response.status {
            200 | 202 => RegisterSignal::Ok(response),
            401 => RegisterSignal::Unauth(response),
            412 => RegisterSignal::CondReqFailed(response),
            _ => RegisterSignal::ErrorOrTimeout(Some(response)),
        }
    }

    pub fn timeout() -> Self {
        RegisterSignal::ErrorOrTimeout(None)
    }

    fn sip_response(&self) -> Option<&SipResponse> {
        match self {
            RegisterSignal::Ok(r) | RegisterSignal::Unauth(r) | RegisterSignal::CondReqFailed(r) => Some(r),
            RegisterSignal::ErrorOrTimeout(r) => r.as_ref(),
            _ => None,
        }
    }
}

impl Signal for RegisterSignal {
    type Kind = RegisterKind;

    fn kind(&self) -> RegisterKind {
        match self {
            RegisterSignal::Register => RegisterKind::Register,
            RegisterSignal::Ok(_) => RegisterKind::Ok,
            RegisterSignal::Unauth(_) => RegisterKind::Unauth,
            RegisterSignal::CondReqFailed(_) => RegisterKind::CondReqFailed,
            RegisterSignal::ErrorOrTimeout(_) => RegisterKind::ErrorOrTimeout,
            RegisterSignal::Refresh(_) => RegisterKind::Refresh,
            RegisterSignal::Retry(_) => RegisterKind::Retry,
            RegisterSignal::Unregister => RegisterKind::Unregister,
            RegisterSignal::Terminate => RegisterKind::Terminate,
        }
    }
}

impl OutcomeSignal<SipResponse> for RegisterSignal {
    fn from_outcome(_id: &TransactionId, outcome: TransactionOutcome<SipResponse>) -> Self {
        match outcome {
            TransactionOutcome::Response(r) => RegisterSignal::response(r),
            TransactionOutcome::TimedOut => RegisterSignal::timeout(),
        }
    }
}

/// Why a registration ended without an explicit unregister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationFailure {
    /// Final error response from the registrar.
    Rejected { status: u16 },
    /// No response within the transaction timeout.
    Timeout,
    /// Challenge could not be answered (no credentials, or rejected again).
    AuthenticationFailed,
    /// The transport refused the request.
    Transport(String),
    /// `terminate` was called.
    Aborted,
}

impl fmt::Display for RegistrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationFailure::Rejected { status } => write!(f, "rejected with {}", status),
            RegistrationFailure::Timeout => f.write_str("timed out"),
            RegistrationFailure::AuthenticationFailed => f.write_str("authentication failed"),
            RegistrationFailure::Transport(e) => write!(f, "transport error: {}", e),
            RegistrationFailure::Aborted => f.write_str("aborted"),
        }
    }
}

/// Application callbacks for one registration.
pub trait RegistrationListener: Send + Sync {
    /// The binding was accepted for `expires` seconds. Called again after
    /// every successful refresh.
    fn registered(&self, expires: u32) {
        let _ = expires;
    }

    fn unregistered(&self) {}

    fn failed(&self, reason: RegistrationFailure) {
        let _ = reason;
    }
}

/// Context of one REGISTER state machine.
pub struct RegisterMachine {
    id: String,
    config: RegisterConfig,
    ctx: ClientContext,
    sender: SignalSender<RegisterSignal>,
    listener: Arc<dyn RegistrationListener>,
    challenge: Option<DigestChallenge>,
    cnonce: String,
    nonce_count: u32,
    auth_attempts: u32,
    retries: u32,
    granted_expires: Option<u32>,
    unregistering: bool,
    last_error: Option<String>,
    transaction: Option<TransactionHandle<SipResponse>>,
    refresh_timer: Option<TimerHandle>,
    retry_timer: Option<TimerHandle>,
    refresh_seq: Option<u64>,
    retry_seq: Option<u64>,
    timer_seq: u64,
}

impl RegisterMachine {
    pub fn new(
        id: impl Into<String>,
        config: RegisterConfig,
        ctx: ClientContext,
        sender: SignalSender<RegisterSignal>,
        listener: Arc<dyn RegistrationListener>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            ctx,
            sender,
            listener,
            challenge: None,
            cnonce: String::new(),
            nonce_count: 0,
            auth_attempts: 0,
            retries: 0,
            granted_expires: None,
            unregistering: false,
            last_error: None,
            transaction: None,
            refresh_timer: None,
            retry_timer: None,
            refresh_seq: None,
            retry_seq: None,
            timer_seq: 0,
        }
    }

    /// Lifetime granted by the last successful REGISTER.
    pub fn granted_expires(&self) -> Option<u32> {
        self.granted_expires
    }

    fn can_answer(&self, signal: &RegisterSignal) -> bool {
        self.config.credentials.is_some()
            && self.auth_attempts < self.config.max_auth_attempts
            && signal
                .sip_response()
                .and_then(SipResponse::www_authenticate)
                .map_or(false, |h| DigestChallenge::parse(h).is_ok())
    }

    fn accept_challenge(&mut self, signal: &RegisterSignal) {
        let Some(header) = signal.sip_response().and_then(SipResponse::www_authenticate) else {
            return;
        };
        match DigestChallenge::parse(header) {
            Ok(challenge) => {
                debug!(machine = %self.id, realm = %challenge.realm, stale = challenge.stale, "answering challenge");
                self.challenge = Some(challenge);
                self.cnonce = self.ctx.resources.generate_id();
                self.nonce_count = 0;
                self.auth_attempts += 1;
            }
            Err(e) => warn!(machine = %self.id, error = %e, "unusable challenge"),
        }
    }

    fn send_register(&mut self, state: RegisterState, expires: u32) -> sigstack_fsm_core::Result<()> {
        let authorization = match (&self.challenge, &self.config.credentials) {
            (Some(challenge), Some(credentials)) => {
                self.nonce_count += 1;
                Some(credentials.authorize(
                    challenge,
                    Method::Register.as_str(),
                    &self.config.registrar_uri,
                    self.nonce_count,
                    &self.cnonce,
                ))
            }
            _ => None,
        };
        let request = OutgoingRequest::new(Method::Register, &self.config.registrar_uri, self.ctx.local_uri())
            .with_expires(expires)
            .with_authorization(authorization);
        debug!(machine = %self.id, transaction = %request.transaction_id, expires, "sending REGISTER");
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

    fn on_registered(&mut self, signal: &RegisterSignal) {
        let granted = match signal {
            RegisterSignal::Ok(response) => {
                if response.status == 202 {
                    warn!(machine = %self.id, "registrar answered REGISTER with 202, treating as success");
                }
                response.expires().unwrap_or(self.config.expires_secs)
            }
            _ => self.config.expires_secs,
        };
        self.auth_attempts = 0;
        self.retries = 0;
        self.granted_expires = Some(granted);
        info!(machine = %self.id, expires = granted, "registered");
        self.listener.registered(granted);

        if granted > 0 {
            let delay = self.config.refresh_after(granted);
            let seq = self.next_timer_seq();
            self.refresh_seq = Some(seq);
            self.refresh_timer = Some(
                self.ctx
                    .timers()
                    .schedule(delay, &self.sender, RegisterSignal::Refresh(seq)),
            );
        }
    }

    fn arm_retry(&mut self) {
        self.retries += 1;
        let delay = self.config.retry_delay(self.retries);
        debug!(machine = %self.id, attempt = self.retries, ?delay, "retrying REGISTER after back-off");
        let seq = self.next_timer_seq();
        self.retry_seq = Some(seq);
        self.retry_timer = Some(self.ctx.timers().schedule(delay, &self.sender, RegisterSignal::Retry(seq)));
    }

    fn next_timer_seq(&mut self) -> u64 {
        self.timer_seq += 1;
        self.timer_seq
    }

    fn disarm_refresh(&mut self) {
        self.refresh_timer = None;
        self.refresh_seq = None;
    }

    fn disarm_retry(&mut self) {
        self.retry_timer = None;
        self.retry_seq = None;
    }

    fn finish(&mut self, signal: &RegisterSignal) {
        if let Some(transaction) = self.transaction.take() {
            transaction.cancel();
        }
        self.disarm_refresh();
        self.disarm_retry();

        if let Some(error) = self.last_error.take() {
            warn!(machine = %self.id, %error, "registration failed");
            self.listener.failed(RegistrationFailure::Transport(error));
            return;
        }
        // Unregister straight from Init, or a 2xx to the un-REGISTER.
        let removed = match signal {
            RegisterSignal::Unregister => true,
            RegisterSignal::Ok(_) => self.unregistering,
            _ => false,
        };
        if removed {
            info!(machine = %self.id, "unregistered");
            self.listener.unregistered();
            return;
        }
        let reason = match signal {
            RegisterSignal::Unauth(_) => RegistrationFailure::AuthenticationFailed,
            RegisterSignal::CondReqFailed(r) | RegisterSignal::ErrorOrTimeout(Some(r)) => {
                RegistrationFailure::Rejected { status: r.status }
            }
            RegisterSignal::ErrorOrTimeout(None) => RegistrationFailure::Timeout,
            _ => RegistrationFailure::Aborted,
        };
        warn!(machine = %self.id, %reason, "registration failed");
        self.listener.failed(reason);
    }
}

impl Machine for RegisterMachine {
    type Signal = RegisterSignal;
    type State = RegisterState;

    fn id(&self) -> &str {
        &self.id
    }

    fn on_enter(
        &mut self,
        state: RegisterState,
        signal: &RegisterSignal,
        _re_entering: bool,
    ) -> sigstack_fsm_core::Result<()> {
        match state {
            RegisterState::Init => Ok(()),
            RegisterState::SendRegister => {
                if signal.kind() == RegisterKind::CondReqFailed {
                    self.retries += 1;
                }
                self.send_register(state, self.config.expires_secs)
            }
            RegisterState::Unauthenticated => {
                self.accept_challenge(signal);
                self.send_register(state, self.config.expires_secs)
            }
            RegisterState::Ok => {
                self.on_registered(signal);
                Ok(())
            }
            RegisterState::SendUnregister => {
                if signal.kind() == RegisterKind::Unauth {
                    self.accept_challenge(signal);
                }
                self.unregistering = true;
                self.send_register(state, 0)
            }
            RegisterState::RetryWait => {
                self.arm_retry();
                Ok(())
            }
            RegisterState::Terminated => {
                self.finish(signal);
                Ok(())
            }
        }
    }

    fn on_exit(&mut self, state: RegisterState, _signal: &RegisterSignal, _re_entering_next: bool) {
        match state {
            RegisterState::SendRegister | RegisterState::Unauthenticated | RegisterState::SendUnregister => {
                if let Some(transaction) = self.transaction.take() {
                    transaction.cancel();
                }
            }
            RegisterState::Ok => self.disarm_refresh(),
            RegisterState::RetryWait => self.disarm_retry(),
            RegisterState::Init | RegisterState::Terminated => {}
        }
    }
}

fn on(kind: RegisterKind) -> Condition<RegisterMachine> {
    Condition::on_kind(kind)
}

fn challenge_answerable() -> Condition<RegisterMachine> {
    on(RegisterKind::Unauth).and(Condition::new("CAN_AUTHENTICATE", |s: &RegisterSignal, m: &RegisterMachine| {
        m.can_answer(s)
    }))
}

/// A timer signal from the refresh timer currently armed. Older ones are
/// dropped.
fn refresh_due() -> Condition<RegisterMachine> {
    Condition::new("REFRESH_DUE", |s: &RegisterSignal, m: &RegisterMachine| {
        matches!(s, RegisterSignal::Refresh(seq) if m.refresh_seq == Some(*seq))
    })
}

fn retry_due() -> Condition<RegisterMachine> {
    Condition::new("RETRY_DUE", |s: &RegisterSignal, m: &RegisterMachine| {
        matches!(s, RegisterSignal::Retry(seq) if m.retry_seq == Some(*seq))
    })
}

fn retries_left() -> Condition<RegisterMachine> {
    Condition::new("RETRIES_LEFT", |_: &RegisterSignal, m: &RegisterMachine| {
        m.retries < m.config.max_retries
    })
}

fn build_table() -> sigstack_fsm_core::Result<StateTable<RegisterMachine>> {
    use RegisterKind as K;
    use RegisterState as S;

    let mut b = StateTableBuilder::new("register")
        .state(S::Init)
        .blocking_state(S::Unauthenticated)
        .blocking_state(S::SendRegister)
        .state(S::Ok)
        .blocking_state(S::SendUnregister)
        .state(S::RetryWait)
        .terminal_state(S::Terminated)
        .add_transition_with_error(S::Init, on(K::Register), S::SendRegister, S::Terminated)
        .add_transition(S::Init, Condition::on_any_kind(&[K::Unregister, K::Terminate]), S::Terminated);

    for waiting in [S::SendRegister, S::Unauthenticated] {
        b = b
            .add_transition(waiting, on(K::Ok), S::Ok)
            .add_transition_with_error(waiting, challenge_answerable(), S::Unauthenticated, S::Terminated)
            .add_transition(waiting, on(K::Unauth), S::Terminated)
            .add_transition_with_error(
                waiting,
                on(K::CondReqFailed).and(retries_left()),
                S::SendRegister,
                S::Terminated,
            )
            .add_transition(waiting, on(K::CondReqFailed), S::Terminated)
            .add_transition(waiting, on(K::ErrorOrTimeout).and(retries_left()), S::RetryWait)
            .add_transition(waiting, on(K::ErrorOrTimeout), S::Terminated)
            .add_transition(waiting, on(K::Terminate), S::Terminated);
    }

    b.add_transition_with_error(S::Ok, refresh_due(), S::SendRegister, S::Terminated)
        .add_transition_with_error(S::Ok, on(K::Register), S::SendRegister, S::Terminated)
        .add_transition_with_error(S::Ok, on(K::Unregister), S::SendUnregister, S::Terminated)
        .add_transition(S::Ok, on(K::Terminate), S::Terminated)
        .add_transition_with_error(S::SendUnregister, challenge_answerable(), S::SendUnregister, S::Terminated)
        .add_transition(
            S::SendUnregister,
            Condition::on_any_kind(&[K::Ok, K::Unauth, K::CondReqFailed, K::ErrorOrTimeout, K::Terminate]),
            S::Terminated,
        )
        .add_transition_with_error(S::RetryWait, retry_due(), S::SendRegister, S::Terminated)
        .add_transition_with_error(S::RetryWait, on(K::Unregister), S::SendUnregister, S::Terminated)
        .add_transition(S::RetryWait, on(K::Terminate), S::Terminated)
        .build()
}

static REGISTER_TABLE: OnceLock<sigstack_fsm_core::Result<Arc<StateTable<RegisterMachine>>>> = OnceLock::new();

/// The shared REGISTER state table.
pub fn register_table() -> SipClientResult<Arc<StateTable<RegisterMachine>>> {
    REGISTER_TABLE
        .get_or_init(|| build_table().map(Arc::new))
        .clone()
        .map_err(SipClientError::from)
}

/// A running REGISTER controller.
pub struct RegisterController {
    handle: MachineHandle<RegisterMachine>,
}

impl RegisterController {
    /// Spawn the controller on the current tokio runtime. Nothing is sent
    /// until [`register`](Self::register) is called.
    pub fn start(
        config: RegisterConfig,
        ctx: ClientContext,
        listener: Arc<dyn RegistrationListener>,
    ) -> SipClientResult<Self> {
        if config.registrar_uri.is_empty() {
            return Err(SipClientError::config("registrar_uri must be set"));
        }
        let table = register_table()?;
        let id = format!("register-{}", ctx.resources.generate_id());
        let handle = spawn_machine(table, RegisterState::Init, move |sender| {
            RegisterMachine::new(id, config, ctx, sender, listener)
        });
        Ok(Self { handle })
    }

    pub fn register(&self) -> SipClientResult<()> {
        self.post(RegisterSignal::Register)
    }

    pub fn unregister(&self) -> SipClientResult<()> {
        self.post(RegisterSignal::Unregister)
    }

    pub fn terminate(&self) -> SipClientResult<()> {
        self.post(RegisterSignal::Terminate)
    }

    pub fn state(&self) -> RegisterState {
        self.handle.state()
    }

    pub fn is_terminated(&self) -> bool {
        self.handle.is_terminated()
    }

    /// Wait until the controller reaches `target`.
    pub async fn wait_for_state(&self, target: RegisterState, timeout: Duration) -> SipClientResult<RegisterState> {
        Ok(self.handle.wait_for_state(|s| *s == target, timeout).await?)
    }

    pub fn handle(&self) -> &MachineHandle<RegisterMachine> {
        &self.handle
    }

    fn post(&self, signal: RegisterSignal) -> SipClientResult<()> {
        if self.handle.send(signal) {
            Ok(())
        } else {
            Err(SipClientError::Terminated {
                id: self.handle.id().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_mapping() {
        let kind = |status| RegisterSignal::response(SipResponse::new(status, "")).kind();
        assert_eq!(kind(200), RegisterKind::Ok);
        assert_eq!(kind(202), RegisterKind::Ok);
        assert_eq!(kind(401), RegisterKind::Unauth);
        assert_eq!(kind(412), RegisterKind::CondReqFailed);
        assert_eq!(kind(403), RegisterKind::ErrorOrTimeout);
        assert_eq!(kind(204), RegisterKind::ErrorOrTimeout);
        assert_eq!(RegisterSignal::timeout(), RegisterSignal::ErrorOrTimeout(None));
    }

    #[test]
    fn test_table_is_valid() {
        let table = register_table().unwrap();
        assert_eq!(table.state_count(), 7);
        assert!(table.is_blocking(RegisterState::SendRegister));
        assert!(table.is_blocking(RegisterState::Unauthenticated));
        assert!(table.is_blocking(RegisterState::SendUnregister));
        assert!(!table.is_blocking(RegisterState::Ok));
        assert!(table.is_terminal(RegisterState::Terminated));
    }
}
