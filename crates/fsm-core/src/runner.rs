//! Mailbox runner: one tokio task per machine.
//!
//! Every producer (application calls, transport callbacks, timers) posts
//! into an unbounded channel through a [`SignalSender`]; the runner task is
//! the only place the machine's [`Fsm`] is touched, so a machine never
//! processes two signals at once while different machines run in parallel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::{FsmError, Result};
use crate::fsm::Fsm;
use crate::machine::Machine;
use crate::signal::Signal;
use crate::table::StateTable;

/// Cloneable, synchronous handle for posting signals into a machine mailbox.
pub struct SignalSender<S> {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<S>,
}

impl<S: Signal> SignalSender<S> {
    /// Create a sender and the receiving end of its mailbox.
    ///
    /// [`spawn_machine`] uses this internally; tests use it to stand in for
    /// a machine and observe what a collaborator posts.
    pub fn channel(name: impl Into<Arc<str>>) -> (Self, mpsc::UnboundedReceiver<S>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }

    /// Post a signal. Returns false if the machine has stopped.
    pub fn send(&self, signal: S) -> bool {
        match self.tx.send(signal) {
            Ok(()) => true,
            Err(mpsc::error::SendError(signal)) => {
                trace!(machine = %self.name, ?signal, "mailbox closed, dropping signal");
                false
            }
        }
    }

    /// Name of the machine behind this mailbox.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the machine has stopped accepting signals.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<S> Clone for SignalSender<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
        }
    }
}

impl<S> fmt::Debug for SignalSender<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSender")
            .field("name", &self.name)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Handle to a machine running on its own task.
pub struct MachineHandle<M: Machine> {
    id: String,
    table: Arc<StateTable<M>>,
    sender: SignalSender<M::Signal>,
    state: watch::Receiver<M::State>,
    task: Mutex<Option<JoinHandle<M>>>,
}

/// Spawn a machine on the current tokio runtime.
///
/// `build` receives the machine's own [`SignalSender`] so the context can
/// hand it to timers and transactions that post back into the mailbox.
pub fn spawn_machine<M, F>(table: Arc<StateTable<M>>, initial: M::State, build: F) -> MachineHandle<M>
where
    M: Machine,
    F: FnOnce(SignalSender<M::Signal>) -> M,
{
    let (sender, mut rx) = SignalSender::channel(table.name().to_string());
    let context = build(sender.clone());
    let id = context.id().to_string();
    let (state_tx, state_rx) = watch::channel(initial);
    let mut fsm = Fsm::new(Arc::clone(&table), initial, context);

    let task_id = id.clone();
    let task = tokio::spawn(async move {
        debug!(machine = %task_id, state = ?initial, "machine runner started");
        while !fsm.is_terminated() {
            let Some(signal) = rx.recv().await else {
                break;
            };
            fsm.process(signal);
            state_tx.send_replace(fsm.state());
        }
        rx.close();
        let last = fsm.state();
        while let Ok(signal) = rx.try_recv() {
            fsm.context_mut().on_discard(last, signal);
        }
        info!(machine = %task_id, state = ?last, "machine runner stopped");
        fsm.into_context()
    });

    MachineHandle {
        id,
        table,
        sender,
        state: state_rx,
        task: Mutex::new(Some(task)),
    }
}

impl<M: Machine> MachineHandle<M> {
    /// Machine identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Post a signal from any thread. Returns false once the machine stopped.
    pub fn send(&self, signal: M::Signal) -> bool {
        self.sender.send(signal)
    }

    /// A sender for this machine's mailbox.
    pub fn sender(&self) -> SignalSender<M::Signal> {
        self.sender.clone()
    }

    /// Last state published by the runner.
    pub fn state(&self) -> M::State {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch(&self) -> watch::Receiver<M::State> {
        self.state.clone()
    }

    /// Whether the machine has reached a terminal state.
    pub fn is_terminated(&self) -> bool {
        self.table.is_terminal(self.state())
    }

    /// Wait until the state satisfies `pred`.
    pub async fn wait_for_state<P>(&self, mut pred: P, timeout: Duration) -> Result<M::State>
    where
        P: FnMut(&M::State) -> bool,
    {
        let mut rx = self.state.clone();
        let waited = tokio::time::timeout(timeout, rx.wait_for(&mut pred))
            .await
            .map(|r| r.map(|state| *state));
        match waited {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(_)) => {
                let last = *rx.borrow();
                if pred(&last) {
                    Ok(last)
                } else {
                    Err(FsmError::MachineStopped(self.id.clone()))
                }
            }
            Err(_) => Err(FsmError::Timeout(self.id.clone())),
        }
    }

    /// Wait for the runner to stop and take back the machine context.
    ///
    /// Only the first call gets the context; later calls fail with
    /// [`FsmError::MachineStopped`].
    pub async fn join(&self) -> Result<M> {
        let task = self.task.lock().take();
        match task {
            Some(task) => task.await.map_err(|e| FsmError::Runner(e.to_string())),
            None => Err(FsmError::MachineStopped(self.id.clone())),
        }
    }

    /// Stop the runner without going through a terminal state.
    pub fn abort(&self) {
        if let Some(task) = self.task.lock().as_ref() {
            task.abort();
        }
    }
}

impl<M: Machine> fmt::Debug for MachineHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
