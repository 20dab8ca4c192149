//! A multi-value register: concurrent writes are all retained until a
//! causally-later write supersedes them. Used as the cell type for the
//! `sheet` document (one register per `(row, col)`) and the field map of
//! each `kanban` record.

use crate::dot::Dot;
use nahma_model::PeerId;
use serde::{Deserialize, Serialize};

/// One assignment to a register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MvRegOp<V> {
    pub id: Dot<PeerId>,
    /// The dots this write causally supersedes: every entry present in the
    /// register at the moment the local write was issued.
    pub context: Vec<Dot<PeerId>>,
    pub value: V,
}

/// A register holding every concurrently-written value. `values()` exposes
/// all of them; callers that want last-write-wins-by-clock pick the entry
/// with the greatest dot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MvReg<V> {
    entries: Vec<(Dot<PeerId>, V)>,
}

impl<V: Clone> MvReg<V> {
    /// An empty register.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// True if no value has ever been assigned (or all assignments have
    /// since been superseded).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All currently-live values, in dot order.
    pub fn values(&self) -> Vec<&V> {
        self.entries.iter().map(|(_, v)| v).collect()
    }

    /// Builds the op to assign `value`, superseding every value currently
    /// held.
    pub fn assign_op(&self, id: Dot<PeerId>, value: V) -> MvRegOp<V> {
        MvRegOp {
            id,
            context: self.entries.iter().map(|(d, _)| *d).collect(),
            value,
        }
    }

    /// Applies an assignment. Idempotent: re-applying the same `id` changes
    /// nothing.
    pub fn apply(&mut self, op: MvRegOp<V>) {
        if self.entries.iter().any(|(d, _)| *d == op.id) {
            return;
        }
        self.entries.retain(|(d, _)| !op.context.contains(d));
        self.entries.push((op.id, op.value));
    }
}
