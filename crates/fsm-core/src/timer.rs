//! Timer service
//!
//! Timers are plain tokio tasks that sleep and then either post a signal
//! into a machine mailbox or run a callback. Ownership goes through
//! [`TimerHandle`]: dropping the handle cancels the timer, so a machine
//! context that stores its handles in fields gets cancellation for free
//! when it replaces or clears them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::runner::SignalSender;
use crate::signal::Signal;

/// Shared timer facility bound to a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TimerService {
    handle: Option<Handle>,
}

impl TimerService {
    /// Bind to the runtime of the calling context, if there is one.
    ///
    /// Without a runtime the service binds lazily on the first `schedule`.
    pub fn new() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }

    /// Bind to an explicit runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Post `signal` to `target` after `delay`.
    ///
    /// If the machine has stopped by then the signal is dropped.
    pub fn schedule<S: Signal>(&self, delay: Duration, target: &SignalSender<S>, signal: S) -> TimerHandle {
        let target = target.clone();
        self.schedule_fn(delay, move || {
            if !target.send(signal) {
                trace!(machine = %target.name(), "timer fired into a stopped machine");
            }
        })
    }

    /// Run `f` after `delay`.
    pub fn schedule_fn<F>(&self, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let task = async move {
            tokio::time::sleep(delay).await;
            flag.store(true, Ordering::Release);
            f();
        };

        let handle = match self.handle.clone().or_else(|| Handle::try_current().ok()) {
            Some(handle) => handle,
            None => {
                warn!(?delay, "no tokio runtime available, timer not armed");
                return TimerHandle { task: None, fired };
            }
        };
        TimerHandle {
            task: Some(handle.spawn(task)),
            fired,
        }
    }
}

/// Owner of one armed timer. Dropping it cancels the timer.
#[derive(Debug)]
#[must_use = "dropping a TimerHandle cancels the timer"]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Cancel the timer. Has no effect if it already fired.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether the timer is armed and has not fired yet.
    pub fn is_active(&self) -> bool {
        match &self.task {
            Some(task) => !self.fired.load(Ordering::Acquire) && !task.is_finished(),
            None => false,
        }
    }

    /// Whether the timer has fired.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Let the timer run to completion without an owner.
    pub fn detach(mut self) {
        self.task.take();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
