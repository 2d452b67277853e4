use crate::error::Result;
use crate::signal::{Signal, StateId};

/// The mutable context of one state machine instance.
///
/// State nodes are shared and stateless; everything a protocol needs to
/// remember (timers, outstanding transactions, ETags, ...) lives in the type
/// implementing this trait. The engine calls the hooks on every state
/// change, self-transitions included.
pub trait Machine: Send + Sized + 'static {
    /// Signal sum type accepted by this machine.
    type Signal: Signal;
    /// State identifier enum.
    type State: StateId;

    /// Identifier used in log lines.
    fn id(&self) -> &str;

    /// Called after leaving the previous state.
    ///
    /// `re_entering` is true when the transition goes back to the same
    /// state, which lets an implementation refresh what it holds (reset a
    /// timer, resend a request) instead of building it from scratch.
    ///
    /// Returning an error aborts the move: the engine lands in the
    /// transition's error state if it has one, otherwise the signal counts
    /// as unmatched and the machine re-enters its current state.
    fn on_enter(
        &mut self,
        state: Self::State,
        signal: &Self::Signal,
        re_entering: bool,
    ) -> Result<()> {
        let _ = (state, signal, re_entering);
        Ok(())
    }

    /// Called before entering the next state. `re_entering_next` is true
    /// for self-transitions.
    fn on_exit(&mut self, state: Self::State, signal: &Self::Signal, re_entering_next: bool) {
        let _ = (state, signal, re_entering_next);
    }

    /// Called with every signal the engine drops: unmatched in a
    /// non-blocking state, or still parked when the machine terminates.
    fn on_discard(&mut self, state: Self::State, signal: Self::Signal) {
        let _ = (state, signal);
    }
}
