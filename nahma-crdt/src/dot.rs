//! A `Dot` is a version marker for a single actor: one client's logical
//! clock value at the moment it produced an operation.

use std::cmp::Ordering;
use std::fmt;

/// One actor's clock value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Dot<A> {
    /// The actor identifier.
    pub actor: A,
    /// The actor's clock value at the time this dot was stamped.
    pub counter: u64,
}

impl<A> Dot<A> {
    /// Builds a dot from an actor and counter.
    pub fn new(actor: A, counter: u64) -> Self {
        Self { actor, counter }
    }
}

impl<A: Clone> Dot<A> {
    /// The successor of this dot: same actor, counter + 1.
    pub fn inc(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            counter: self.counter + 1,
        }
    }
}

impl<A: Ord> PartialOrd for Dot<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A: Ord> Ord for Dot<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.actor.cmp(&other.actor) {
            Ordering::Equal => self.counter.cmp(&other.counter),
            other => other,
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for Dot<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}.{}", self.actor, self.counter)
    }
}

impl<A> From<(A, u64)> for Dot<A> {
    fn from(dot: (A, u64)) -> Self {
        Self {
            actor: dot.0,
            counter: dot.1,
        }
    }
}
