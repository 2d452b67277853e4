//! The pending-transaction table.
//!
//! Every outstanding transaction is one entry in a `DashMap` together with
//! its timeout timer. Whoever removes the entry first (the transport via
//! [`TransactionLayer::on_response`] or the timer task) owns the outcome,
//! so a transaction can never report both a response and a timeout.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sigstack_fsm_core::{TimerHandle, TimerService};
use tracing::{debug, trace, warn};

use crate::config::TransactionConfig;
use crate::error::{Error, Result};
use crate::transaction::{TransactionId, TransactionOutcome, TransactionUser};

struct Pending<R> {
    user: Box<dyn TransactionUser<R>>,
    timer: TimerHandle,
}

struct Inner<R> {
    name: String,
    pending: DashMap<TransactionId, Pending<R>>,
    timers: TimerService,
    default_timeout: Duration,
}

impl<R: Send + 'static> Inner<R> {
    fn expire(&self, id: &TransactionId) {
        let Some((id, pending)) = self.pending.remove(id) else {
            trace!(layer = %self.name, %id, "timer fired for a resolved transaction");
            return;
        };
        // The timer task is the caller; let it finish instead of aborting it.
        pending.timer.detach();
        debug!(layer = %self.name, %id, "transaction timed out");
        pending.user.on_outcome(&id, TransactionOutcome::TimedOut);
    }
}

/// Correlates outbound requests with their responses or timeouts.
///
/// Generic over the response type so SIP and MSRP share one implementation.
/// Cloning gives another handle onto the same table.
pub struct TransactionLayer<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for TransactionLayer<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> fmt::Debug for TransactionLayer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionLayer")
            .field("name", &self.inner.name)
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl<R: Send + 'static> TransactionLayer<R> {
    /// Create a layer using `timers` for transaction deadlines.
    pub fn new(name: impl Into<String>, config: &TransactionConfig, timers: TimerService) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                pending: DashMap::new(),
                timers,
                default_timeout: config.default_timeout(),
            }),
        }
    }

    /// Create a layer with default settings on the current runtime.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, &TransactionConfig::default(), TimerService::new())
    }

    /// Start tracking a transaction.
    ///
    /// `timeout` falls back to the configured default. The `user` is called
    /// exactly once, unless the transaction is cancelled first.
    pub fn start_transaction<U>(
        &self,
        id: TransactionId,
        timeout: Option<Duration>,
        user: U,
    ) -> Result<TransactionHandle<R>>
    where
        U: TransactionUser<R> + 'static,
    {
        let timeout = timeout.unwrap_or(self.inner.default_timeout);
        match self.inner.pending.entry(id.clone()) {
            Entry::Occupied(_) => {
                warn!(layer = %self.inner.name, %id, "duplicate transaction id");
                Err(Error::TransactionExists(id))
            }
            Entry::Vacant(slot) => {
                let weak = Arc::downgrade(&self.inner);
                let timer_id = id.clone();
                // The shard stays locked until the insert below, so even a
                // zero timeout cannot expire an entry that is not there yet.
                let timer = self.inner.timers.schedule_fn(timeout, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.expire(&timer_id);
                    }
                });
                slot.insert(Pending {
                    user: Box::new(user),
                    timer,
                });
                debug!(layer = %self.inner.name, %id, ?timeout, "transaction started");
                Ok(TransactionHandle {
                    id,
                    layer: Arc::downgrade(&self.inner),
                })
            }
        }
    }

    /// Deliver a response to the owner of `id`.
    ///
    /// Returns false when nothing is pending under that id (already timed
    /// out, cancelled, or never started).
    pub fn on_response(&self, id: &TransactionId, response: R) -> bool {
        match self.inner.pending.remove(id) {
            Some((id, pending)) => {
                drop(pending.timer);
                debug!(layer = %self.inner.name, %id, "transaction answered");
                pending.user.on_outcome(&id, TransactionOutcome::Response(response));
                true
            }
            None => {
                debug!(layer = %self.inner.name, %id, "stale response, no pending transaction");
                false
            }
        }
    }

    /// Abandon a transaction without notifying its owner.
    pub fn cancel(&self, id: &TransactionId) -> Result<()> {
        match self.inner.pending.remove(id) {
            Some(_) => {
                trace!(layer = %self.inner.name, %id, "transaction cancelled");
                Ok(())
            }
            None => Err(Error::TransactionNotFound(id.clone())),
        }
    }

    /// Whether `id` is still waiting for its outcome.
    pub fn is_pending(&self, id: &TransactionId) -> bool {
        self.inner.pending.contains_key(id)
    }

    /// Number of outstanding transactions.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Abandon every outstanding transaction. Returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<TransactionId> = self.inner.pending.iter().map(|e| e.key().clone()).collect();
        let dropped = ids
            .iter()
            .filter(|id| self.inner.pending.remove(*id).is_some())
            .count();
        if dropped > 0 {
            debug!(layer = %self.inner.name, dropped, "cancelled all transactions");
        }
        dropped
    }
}

/// Reference to one outstanding transaction.
///
/// Dropping the handle does not cancel the transaction; machines call
/// [`cancel`](Self::cancel) when they leave the state that started it.
#[must_use]
pub struct TransactionHandle<R> {
    id: TransactionId,
    layer: Weak<Inner<R>>,
}

impl<R: Send + 'static> TransactionHandle<R> {
    /// Transaction identifier.
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// Abandon the transaction silently. Returns true if it was still pending.
    pub fn cancel(&self) -> bool {
        match self.layer.upgrade() {
            Some(inner) => inner.pending.remove(&self.id).is_some(),
            None => false,
        }
    }

    /// Whether the transaction is still outstanding.
    pub fn is_pending(&self) -> bool {
        self.layer
            .upgrade()
            .map_or(false, |inner| inner.pending.contains_key(&self.id))
    }
}

impl<R> fmt::Debug for TransactionHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle").field("id", &self.id).finish()
    }
}
