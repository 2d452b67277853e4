//! Transaction identifiers, outcomes and the user trait.
//!
//! A transaction is one outbound request waiting for its answer. It ends
//! exactly once, either with the matching response or with a timeout, and
//! that single [`TransactionOutcome`] is handed to the [`TransactionUser`]
//! that started it.

pub mod layer;

use std::fmt;

use sigstack_fsm_core::{Signal, SignalSender};
use uuid::Uuid;

pub use layer::{TransactionHandle, TransactionLayer};

/// Opaque transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(String);

impl TransactionId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How a transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome<R> {
    /// The matching response arrived in time.
    Response(R),
    /// No response before the deadline.
    TimedOut,
}

impl<R> TransactionOutcome<R> {
    /// The response, if there was one.
    pub fn response(&self) -> Option<&R> {
        match self {
            TransactionOutcome::Response(r) => Some(r),
            TransactionOutcome::TimedOut => None,
        }
    }

    /// Whether the transaction timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransactionOutcome::TimedOut)
    }
}

/// Receiver of transaction outcomes.
///
/// Called from whichever thread resolved the transaction (the transport
/// delivering a response, or the timer task), so implementations should
/// hand the outcome off rather than do work inline.
pub trait TransactionUser<R>: Send + Sync {
    fn on_outcome(&self, id: &TransactionId, outcome: TransactionOutcome<R>);
}

impl<R, F> TransactionUser<R> for F
where
    F: Fn(&TransactionId, TransactionOutcome<R>) + Send + Sync,
{
    fn on_outcome(&self, id: &TransactionId, outcome: TransactionOutcome<R>) {
        self(id, outcome)
    }
}

/// Signals that can carry a transaction outcome into a machine mailbox.
pub trait OutcomeSignal<R>: Signal {
    fn from_outcome(id: &TransactionId, outcome: TransactionOutcome<R>) -> Self;
}

/// [`TransactionUser`] that posts outcomes into a machine mailbox.
#[derive(Debug)]
pub struct SignalUser<S>(SignalSender<S>);

impl<S> Clone for SignalUser<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<S: Signal> SignalUser<S> {
    pub fn new(sender: SignalSender<S>) -> Self {
        Self(sender)
    }
}

impl<S: Signal> From<SignalSender<S>> for SignalUser<S> {
    fn from(sender: SignalSender<S>) -> Self {
        Self(sender)
    }
}

impl<R, S> TransactionUser<R> for SignalUser<S>
where
    S: OutcomeSignal<R>,
{
    fn on_outcome(&self, id: &TransactionId, outcome: TransactionOutcome<R>) {
        self.0.send(S::from_outcome(id, outcome));
    }
}
