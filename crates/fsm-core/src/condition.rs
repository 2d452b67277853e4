//! Conditions: named, pure predicates over `(signal, machine)`.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::machine::Machine;
use crate::signal::Signal;

type Predicate<M> =
    dyn Fn(&<M as Machine>::Signal, &M) -> bool + Send + Sync + 'static;

/// A predicate deciding whether a transition applies to a signal.
///
/// Conditions must not have side effects: evaluating the same
/// `(signal, machine)` pair twice gives the same answer. They are cheap to
/// clone and are shared between every machine using the same table.
pub struct Condition<M: Machine> {
    name: Cow<'static, str>,
    predicate: Arc<Predicate<M>>,
}

impl<M: Machine> Condition<M> {
    /// Build a condition from a predicate.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, predicate: F) -> Self
    where
        F: Fn(&M::Signal, &M) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Matches every signal of the given kind.
    pub fn on_kind(kind: <M::Signal as Signal>::Kind) -> Self {
        Self::new(format!("{:?}", kind), move |signal: &M::Signal, _: &M| signal.kind() == kind)
    }

    /// Matches any of the given kinds.
    pub fn on_any_kind(kinds: &[<M::Signal as Signal>::Kind]) -> Self {
        let kinds = kinds.to_vec();
        let name = kinds
            .iter()
            .map(|k| format!("{:?}", k))
            .collect::<Vec<_>>()
            .join("|");
        Self::new(name, move |signal: &M::Signal, _: &M| kinds.contains(&signal.kind()))
    }

    /// Matches every signal.
    pub fn always() -> Self {
        Self::new("ALWAYS", |_: &M::Signal, _: &M| true)
    }

    /// Both conditions hold.
    pub fn and(self, other: Condition<M>) -> Self {
        let name = format!("{}&{}", self.name, other.name);
        let (a, b) = (self.predicate, other.predicate);
        Self::new(name, move |s: &M::Signal, m: &M| a(s, m) && b(s, m))
    }

    /// Either condition holds.
    pub fn or(self, other: Condition<M>) -> Self {
        let name = format!("{}|{}", self.name, other.name);
        let (a, b) = (self.predicate, other.predicate);
        Self::new(name, move |s: &M::Signal, m: &M| a(s, m) || b(s, m))
    }

    /// The condition does not hold.
    pub fn negate(self) -> Self {
        let name = format!("!{}", self.name);
        let a = self.predicate;
        Self::new(name, move |s: &M::Signal, m: &M| !a(s, m))
    }

    /// Rename, keeping the predicate.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Name used in logs and diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the predicate.
    pub fn is_satisfied(&self, signal: &M::Signal, machine: &M) -> bool {
        (self.predicate)(signal, machine)
    }
}

impl<M: Machine> Clone for Condition<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<M: Machine> fmt::Debug for Condition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.name).finish()
    }
}
