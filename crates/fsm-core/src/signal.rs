//! Signals and state identifiers.
//!
//! A signal is an immutable event delivered to a machine. Every protocol
//! defines one closed sum type of signals and exposes a `Copy` kind
//! enumerant for it, which is what most conditions key off.

use std::fmt;
use std::hash::Hash;

/// An immutable event value delivered to a [`Machine`](crate::Machine).
///
/// Implementors are closed enums built through named constructors; once a
/// signal exists it is only ever moved or borrowed immutably.
pub trait Signal: fmt::Debug + Send + 'static {
    /// Payload-free tag of the signal.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The tag of this signal.
    fn kind(&self) -> Self::Kind;
}

/// Identifier of a state node.
///
/// Protocols use a plain `Copy` enum; the blanket impl covers it.
pub trait StateId: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> StateId for T where T: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}
