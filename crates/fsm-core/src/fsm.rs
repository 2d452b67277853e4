//! The synchronous engine: one machine context, one current state, one
//! deferred queue.
//!
//! [`Fsm`] is single-owner. Concurrency is handled one level up by
//! [`spawn_machine`](crate::spawn_machine), which serialises every producer
//! through a mailbox so `process` is only ever called from one task.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::machine::Machine;
use crate::table::StateTable;

/// Outcome of delivering one signal.
#[derive(Debug)]
pub enum Delivery<St, Sg> {
    /// A transition fired.
    Transitioned { from: St, to: St },
    /// No transition matched in a blocking state; the signal is handed back
    /// so the caller can park it.
    Deferred(Sg),
    /// No transition matched in a non-blocking state and the signal was
    /// dropped.
    Discarded,
    /// The machine is terminated.
    Ignored,
}

/// A machine context bound to a state table.
pub struct Fsm<M: Machine> {
    table: Arc<StateTable<M>>,
    current: M::State,
    context: M,
    deferred: VecDeque<M::Signal>,
}

impl<M: Machine> Fsm<M> {
    /// Bind `context` to `table`, starting in `initial`.
    pub fn new(table: Arc<StateTable<M>>, initial: M::State, context: M) -> Self {
        Self {
            table,
            current: initial,
            context,
            deferred: VecDeque::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> M::State {
        self.current
    }

    /// The machine context.
    pub fn context(&self) -> &M {
        &self.context
    }

    /// Mutable access to the machine context.
    pub fn context_mut(&mut self) -> &mut M {
        &mut self.context
    }

    /// Consume the engine and return the context.
    pub fn into_context(self) -> M {
        self.context
    }

    /// Whether the current state is terminal.
    pub fn is_terminated(&self) -> bool {
        self.table.is_terminal(self.current)
    }

    /// Number of parked signals.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Shared table.
    pub fn table(&self) -> &Arc<StateTable<M>> {
        &self.table
    }

    /// Deliver one signal without touching the deferred queue.
    pub fn deliver(&mut self, signal: M::Signal) -> Delivery<M::State, M::Signal> {
        let from = self.current;
        if self.table.is_terminal(from) {
            trace!(machine = %self.context.id(), state = ?from, ?signal, "machine terminated, ignoring signal");
            return Delivery::Ignored;
        }

        let table = Arc::clone(&self.table);
        let Some(transition) = table.input(from, &signal, &self.context) else {
            return self.unmatched(signal);
        };
        let (to, error_to) = (transition.target(), transition.error_target());

        let re_entering = to == from;
        self.context.on_exit(from, &signal, re_entering);
        self.current = to;
        match self.context.on_enter(to, &signal, re_entering) {
            Ok(()) => {
                debug!(machine = %self.context.id(), ?from, ?to, ?signal, "transition");
                Delivery::Transitioned { from, to }
            }
            Err(e) => match error_to {
                Some(err_state) => {
                    warn!(machine = %self.context.id(), ?from, ?to, ?err_state, error = %e, "enter failed, moving to error state");
                    self.current = err_state;
                    if let Err(e) = self.context.on_enter(err_state, &signal, err_state == to) {
                        warn!(machine = %self.context.id(), state = ?err_state, error = %e, "entering error state failed");
                    }
                    Delivery::Transitioned { from, to: err_state }
                }
                None => {
                    warn!(machine = %self.context.id(), ?from, ?to, error = %e, "enter failed, staying in current state");
                    self.current = from;
                    if let Err(e) = self.context.on_enter(from, &signal, true) {
                        warn!(machine = %self.context.id(), state = ?from, error = %e, "re-entering state failed");
                    }
                    self.unmatched(signal)
                }
            },
        }
    }

    fn unmatched(&mut self, signal: M::Signal) -> Delivery<M::State, M::Signal> {
        if self.table.is_blocking(self.current) {
            trace!(machine = %self.context.id(), state = ?self.current, ?signal, "deferring signal");
            Delivery::Deferred(signal)
        } else {
            debug!(machine = %self.context.id(), state = ?self.current, ?signal, "no transition, discarding signal");
            self.context.on_discard(self.current, signal);
            Delivery::Discarded
        }
    }

    /// Deliver a signal, parking it if deferred and draining the deferred
    /// queue after every transition.
    ///
    /// Parked signals keep their arrival order: each drain pass walks the
    /// queue front to back and restarts from the front after every
    /// transition it causes.
    pub fn process(&mut self, signal: M::Signal) {
        match self.deliver(signal) {
            Delivery::Deferred(s) => self.deferred.push_back(s),
            Delivery::Transitioned { .. } => self.drain_deferred(),
            Delivery::Discarded | Delivery::Ignored => {}
        }
        if self.is_terminated() {
            self.discard_deferred();
        }
    }

    fn drain_deferred(&mut self) {
        let mut i = 0;
        while i < self.deferred.len() && !self.is_terminated() {
            let Some(signal) = self.deferred.remove(i) else {
                break;
            };
            match self.deliver(signal) {
                Delivery::Deferred(s) => {
                    self.deferred.insert(i, s);
                    i += 1;
                }
                Delivery::Transitioned { .. } => i = 0,
                Delivery::Discarded | Delivery::Ignored => {}
            }
        }
    }

    fn discard_deferred(&mut self) {
        let state = self.current;
        while let Some(signal) = self.deferred.pop_front() {
            debug!(machine = %self.context.id(), ?state, ?signal, "discarding parked signal at termination");
            self.context.on_discard(state, signal);
        }
    }
}
