//! # State tables
//!
//! A [`StateTable`] is the immutable graph a family of machines runs on:
//! one [`StateNode`] per state, each holding an ordered list of
//! [`Transition`]s. Tables are built once through [`StateTableBuilder`],
//! validated, and shared behind an `Arc` by every machine of that protocol.
//!
//! ## Evaluation order
//!
//! Transitions are evaluated in the order they were added, and the first
//! satisfied condition wins. Ordering is part of the contract: when two
//! conditions can both hold for a signal, the earlier registration decides.
//!
//! ## Blocking states
//!
//! A state flagged `blocking` never drops a signal it has no transition
//! for; the engine parks it and offers it again after the next state
//! change. A non-blocking state drops unmatched signals.

use std::collections::HashMap;

use tracing::trace;

use crate::condition::Condition;
use crate::error::{FsmError, Result};
use crate::machine::Machine;

/// `(condition, target, error target)`.
pub struct Transition<M: Machine> {
    condition: Condition<M>,
    target: M::State,
    error_target: Option<M::State>,
}

impl<M: Machine> Transition<M> {
    /// The guarding condition.
    pub fn condition(&self) -> &Condition<M> {
        &self.condition
    }

    /// State entered when the condition holds.
    pub fn target(&self) -> M::State {
        self.target
    }

    /// State entered when entering `target` fails.
    pub fn error_target(&self) -> Option<M::State> {
        self.error_target
    }
}

impl<M: Machine> std::fmt::Debug for Transition<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("condition", &self.condition.name())
            .field("target", &self.target)
            .field("error_target", &self.error_target)
            .finish()
    }
}

/// Kind of state node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Unmatched signals are dropped.
    Normal,
    /// Unmatched signals are parked until a later state accepts them.
    Blocking,
    /// The machine stops here; every later signal is ignored.
    Terminal,
}

/// One state of a table with its outgoing transitions.
pub struct StateNode<M: Machine> {
    id: M::State,
    kind: StateKind,
    transitions: Vec<Transition<M>>,
}

impl<M: Machine> StateNode<M> {
    /// State identifier.
    pub fn id(&self) -> M::State {
        self.id
    }

    /// Whether unmatched signals are parked instead of dropped.
    pub fn is_blocking(&self) -> bool {
        self.kind == StateKind::Blocking
    }

    /// Whether this state ends the machine.
    pub fn is_terminal(&self) -> bool {
        self.kind == StateKind::Terminal
    }

    /// Outgoing transitions in evaluation order.
    pub fn transitions(&self) -> &[Transition<M>] {
        &self.transitions
    }

    /// First transition whose condition holds for `(signal, machine)`.
    pub fn input(&self, signal: &M::Signal, machine: &M) -> Option<&Transition<M>> {
        self.transitions
            .iter()
            .find(|t| t.condition.is_satisfied(signal, machine))
    }
}

/// Immutable state graph shared by all machines of one protocol.
pub struct StateTable<M: Machine> {
    name: String,
    states: HashMap<M::State, StateNode<M>>,
}

impl<M: Machine> StateTable<M> {
    /// Table name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a state node.
    pub fn node(&self, state: M::State) -> Option<&StateNode<M>> {
        self.states.get(&state)
    }

    /// First transition out of `state` that accepts `signal`.
    pub fn input(&self, state: M::State, signal: &M::Signal, machine: &M) -> Option<&Transition<M>> {
        let found = self.states.get(&state)?.input(signal, machine);
        trace!(table = %self.name, ?state, ?signal, matched = found.is_some(), "table input");
        found
    }

    /// Whether `state` parks unmatched signals.
    pub fn is_blocking(&self, state: M::State) -> bool {
        self.states.get(&state).map_or(false, |n| n.is_blocking())
    }

    /// Whether `state` ends the machine.
    pub fn is_terminal(&self, state: M::State) -> bool {
        self.states.get(&state).map_or(false, |n| n.is_terminal())
    }

    /// Number of declared states.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Total number of transitions.
    pub fn transition_count(&self) -> usize {
        self.states.values().map(|n| n.transitions.len()).sum()
    }

    /// Check structural consistency.
    ///
    /// Every transition target must be a declared state, and every
    /// non-terminal state needs at least one way out.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        for node in self.states.values() {
            for t in &node.transitions {
                for target in std::iter::once(t.target).chain(t.error_target) {
                    if !self.states.contains_key(&target) {
                        problems.push(format!(
                            "{:?} --{}--> undeclared state {:?}",
                            node.id,
                            t.condition.name(),
                            target
                        ));
                    }
                }
            }
            if !node.is_terminal() && node.transitions.is_empty() {
                problems.push(format!("non-terminal state {:?} has no exit transitions", node.id));
            }
            if node.is_terminal() && !node.transitions.is_empty() {
                problems.push(format!("terminal state {:?} has outgoing transitions", node.id));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            problems.sort();
            Err(FsmError::InvalidTable {
                table: self.name.clone(),
                problems,
            })
        }
    }
}

/// Builder for [`StateTable`].
///
/// ```rust
/// use sigstack_fsm_core::{Condition, Machine, Signal, StateTableBuilder};
///
/// #[derive(Debug)]
/// enum Ping { Ping }
/// impl Signal for Ping {
///     type Kind = ();
///     fn kind(&self) {}
/// }
///
/// struct Pinger;
/// impl Machine for Pinger {
///     type Signal = Ping;
///     type State = u8;
///     fn id(&self) -> &str { "pinger" }
/// }
///
/// let table = StateTableBuilder::<Pinger>::new("ping")
///     .state(0)
///     .terminal_state(1)
///     .add_transition(0, Condition::always(), 1)
///     .build()
///     .unwrap();
/// assert_eq!(table.transition_count(), 1);
/// ```
pub struct StateTableBuilder<M: Machine> {
    name: String,
    states: HashMap<M::State, StateNode<M>>,
    problems: Vec<String>,
}

impl<M: Machine> StateTableBuilder<M> {
    /// Start an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: HashMap::new(),
            problems: Vec::new(),
        }
    }

    fn declare(mut self, id: M::State, kind: StateKind) -> Self {
        if self.states.contains_key(&id) {
            self.problems.push(format!("state {:?} declared twice", id));
        } else {
            self.states.insert(
                id,
                StateNode {
                    id,
                    kind,
                    transitions: Vec::new(),
                },
            );
        }
        self
    }

    /// Declare a non-blocking state.
    pub fn state(self, id: M::State) -> Self {
        self.declare(id, StateKind::Normal)
    }

    /// Declare a blocking state.
    pub fn blocking_state(self, id: M::State) -> Self {
        self.declare(id, StateKind::Blocking)
    }

    /// Declare a terminal state.
    pub fn terminal_state(self, id: M::State) -> Self {
        self.declare(id, StateKind::Terminal)
    }

    /// Append a transition to `from`. Call order is evaluation order.
    pub fn add_transition(self, from: M::State, condition: Condition<M>, to: M::State) -> Self {
        self.push(from, condition, to, None)
    }

    /// Append a transition that falls back to `error_to` when entering `to` fails.
    pub fn add_transition_with_error(
        self,
        from: M::State,
        condition: Condition<M>,
        to: M::State,
        error_to: M::State,
    ) -> Self {
        self.push(from, condition, to, Some(error_to))
    }

    fn push(
        mut self,
        from: M::State,
        condition: Condition<M>,
        target: M::State,
        error_target: Option<M::State>,
    ) -> Self {
        match self.states.get_mut(&from) {
            Some(node) => node.transitions.push(Transition {
                condition,
                target,
                error_target,
            }),
            None => self.problems.push(format!(
                "transition {} added to undeclared state {:?}",
                condition.name(),
                from
            )),
        }
        self
    }

    /// Finish and validate the table.
    pub fn build(self) -> Result<StateTable<M>> {
        let table = StateTable {
            name: self.name,
            states: self.states,
        };
        let mut problems = self.problems;
        if let Err(FsmError::InvalidTable { problems: more, .. }) = table.validate() {
            problems.extend(more);
        }
        if problems.is_empty() {
            Ok(table)
        } else {
            Err(FsmError::InvalidTable {
                table: table.name,
                problems,
            })
        }
    }
}
