//! Per-document CRDT state: the three payload shapes (`text`, `sheet`,
//! `kanban`), the operation log, and the state vector.

use crate::clock::Clock;
use crate::dot::Dot;
use crate::error::CrdtError;
use crate::mvreg::{MvReg, MvRegOp};
use crate::rga::{Rga, RgaOp};
use crate::value::{RecordId, Value};
use nahma_model::{PeerId, TypeTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One field name on a kanban record (`"title"`, `"column"`, `"position"`,
/// or any application-chosen key — the core does not constrain the set).
pub type FieldKey = String;

/// One CRDT operation, tagged by which payload shape it targets. An
/// operation applied against the wrong shape's state is a malformed update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DocOp {
    Text(RgaOp<char>),
    SheetAssign {
        row: u32,
        col: u32,
        op: MvRegOp<Value>,
    },
    KanbanOrder(RgaOp<RecordId>),
    KanbanField {
        record: RecordId,
        field: FieldKey,
        op: MvRegOp<Value>,
    },
}

impl DocOp {
    fn type_tag(&self) -> TypeTag {
        match self {
            DocOp::Text(_) => TypeTag::Text,
            DocOp::SheetAssign { .. } => TypeTag::Sheet,
            DocOp::KanbanOrder(_) | DocOp::KanbanField { .. } => TypeTag::Kanban,
        }
    }
}

/// An operation together with the causal dot that stamped it. The stamp is
/// always a *fresh* dot minted by the issuing actor for this event — for an
/// `Insert` it doubles as the new element's id, but for a `Delete` or a
/// field assign that supersedes prior values, it tracks the issuing event
/// itself, independent of whatever older ids the op's payload references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampedOp {
    pub stamp: Dot<PeerId>,
    pub op: DocOp,
}

/// A binary update blob: one or more stamped operations, always applicable
/// idempotently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Update {
    pub ops: Vec<StampedOp>,
}

impl Update {
    /// True if this update carries no operations — the valid, common "no
    /// changes" diff.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Encodes the update to its binary wire form.
    pub fn encode(&self) -> Result<Vec<u8>, CrdtError> {
        bincode::serialize(self).map_err(|e| CrdtError::MalformedUpdate(e.to_string()))
    }

    /// Decodes a binary update blob, failing with `MalformedUpdate` if the
    /// bytes do not parse.
    pub fn decode(bytes: &[u8]) -> Result<Self, CrdtError> {
        bincode::deserialize(bytes).map_err(|e| CrdtError::MalformedUpdate(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Payload {
    Text(Rga<char>),
    Sheet(BTreeMap<(u32, u32), MvReg<Value>>),
    Kanban {
        order: Rga<RecordId>,
        records: BTreeMap<RecordId, BTreeMap<FieldKey, MvReg<Value>>>,
    },
}

impl Payload {
    fn new(type_tag: TypeTag) -> Self {
        match type_tag {
            TypeTag::Text => Payload::Text(Rga::new()),
            TypeTag::Sheet => Payload::Sheet(BTreeMap::new()),
            TypeTag::Kanban => Payload::Kanban {
                order: Rga::new(),
                records: BTreeMap::new(),
            },
        }
    }

    fn type_tag(&self) -> TypeTag {
        match self {
            Payload::Text(_) => TypeTag::Text,
            Payload::Sheet(_) => TypeTag::Sheet,
            Payload::Kanban { .. } => TypeTag::Kanban,
        }
    }

    fn apply(&mut self, op: &DocOp) -> Result<(), CrdtError> {
        match (self, op) {
            (Payload::Text(rga), DocOp::Text(op)) => {
                rga.apply(op.clone());
                Ok(())
            }
            (Payload::Sheet(cells), DocOp::SheetAssign { row, col, op }) => {
                cells
                    .entry((*row, *col))
                    .or_insert_with(MvReg::new)
                    .apply(op.clone());
                Ok(())
            }
            (Payload::Kanban { order, .. }, DocOp::KanbanOrder(op)) => {
                order.apply(op.clone());
                Ok(())
            }
            (Payload::Kanban { records, .. }, DocOp::KanbanField { record, field, op }) => {
                records
                    .entry(*record)
                    .or_insert_with(BTreeMap::new)
                    .entry(field.clone())
                    .or_insert_with(MvReg::new)
                    .apply(op.clone());
                Ok(())
            }
            (payload, op) => Err(CrdtError::TypeMismatch {
                document: payload.type_tag(),
                operation: op.type_tag(),
            }),
        }
    }
}

/// A handle to mutate a document's payload during a single `apply_local`
/// transaction. Every method mints a fresh dot for the issuing actor and
/// applies the resulting op immediately, so the caller can read back its
/// own writes within the same closure.
pub struct Transaction<'a> {
    actor: PeerId,
    next_counter: u64,
    payload: &'a mut Payload,
    ops: Vec<StampedOp>,
}

impl<'a> Transaction<'a> {
    fn stamp(&mut self) -> Dot<PeerId> {
        let dot = Dot::new(self.actor, self.next_counter);
        self.next_counter += 1;
        dot
    }

    fn record(&mut self, stamp: Dot<PeerId>, op: DocOp) -> Result<(), CrdtError> {
        self.payload.apply(&op)?;
        self.ops.push(StampedOp { stamp, op });
        Ok(())
    }

    /// Inserts `value` at visible text index `index`.
    pub fn insert_char(&mut self, index: usize, value: char) -> Result<(), CrdtError> {
        let stamp = self.stamp();
        let Payload::Text(rga) = &*self.payload else {
            return Err(CrdtError::TypeMismatch {
                document: self.payload.type_tag(),
                operation: TypeTag::Text,
            });
        };
        let op = rga.insert_op(index, stamp, value);
        self.record(stamp, DocOp::Text(op))
    }

    /// Inserts a whole string at visible text index `index`.
    pub fn insert_str(&mut self, mut index: usize, text: &str) -> Result<(), CrdtError> {
        for ch in text.chars() {
            self.insert_char(index, ch)?;
            index += 1;
        }
        Ok(())
    }

    /// Deletes the visible text element at `index`, if any.
    pub fn delete_char(&mut self, index: usize) -> Result<(), CrdtError> {
        let Payload::Text(rga) = &*self.payload else {
            return Err(CrdtError::TypeMismatch {
                document: self.payload.type_tag(),
                operation: TypeTag::Text,
            });
        };
        let Some(op) = rga.delete_op(index) else {
            return Ok(());
        };
        let stamp = self.stamp();
        self.record(stamp, DocOp::Text(op))
    }

    /// Assigns `value` to sheet cell `(row, col)`.
    pub fn assign_cell(&mut self, row: u32, col: u32, value: Value) -> Result<(), CrdtError> {
        let stamp = self.stamp();
        let Payload::Sheet(cells) = &*self.payload else {
            return Err(CrdtError::TypeMismatch {
                document: self.payload.type_tag(),
                operation: TypeTag::Sheet,
            });
        };
        let op = match cells.get(&(row, col)) {
            Some(reg) => reg.assign_op(stamp, value),
            None => MvReg::new().assign_op(stamp, value),
        };
        self.record(stamp, DocOp::SheetAssign { row, col, op })
    }

    /// Inserts a new kanban record at board position `index`.
    pub fn insert_record(&mut self, index: usize) -> Result<RecordId, CrdtError> {
        let stamp = self.stamp();
        let Payload::Kanban { order, .. } = &*self.payload else {
            return Err(CrdtError::TypeMismatch {
                document: self.payload.type_tag(),
                operation: TypeTag::Kanban,
            });
        };
        let record = RecordId::generate();
        let op = order.insert_op(index, stamp, record);
        self.record(stamp, DocOp::KanbanOrder(op))?;
        Ok(record)
    }

    /// Removes a kanban record from the board ordering (the record's field
    /// history is left in place as a tombstoned-order entry, matching the
    /// engine's append-only log discipline).
    pub fn delete_record(&mut self, index: usize) -> Result<(), CrdtError> {
        let Payload::Kanban { order, .. } = &*self.payload else {
            return Err(CrdtError::TypeMismatch {
                document: self.payload.type_tag(),
                operation: TypeTag::Kanban,
            });
        };
        let Some(op) = order.delete_op(index) else {
            return Ok(());
        };
        let stamp = self.stamp();
        self.record(stamp, DocOp::KanbanOrder(op))
    }

    /// Sets a field on a kanban record.
    pub fn set_field(
        &mut self,
        record: RecordId,
        field: impl Into<String>,
        value: Value,
    ) -> Result<(), CrdtError> {
        let stamp = self.stamp();
        let Payload::Kanban { records, .. } = &*self.payload else {
            return Err(CrdtError::TypeMismatch {
                document: self.payload.type_tag(),
                operation: TypeTag::Kanban,
            });
        };
        let field = field.into();
        let op = match records.get(&record).and_then(|fields| fields.get(&field)) {
            Some(reg) => reg.assign_op(stamp, value),
            None => MvReg::new().assign_op(stamp, value),
        };
        self.record(
            stamp,
            DocOp::KanbanField {
                record,
                field,
                op,
            },
        )
    }
}

/// A read view over a document's current materialized state.
pub enum View<'a> {
    Text(String),
    Sheet(&'a BTreeMap<(u32, u32), MvReg<Value>>),
    Kanban {
        order: Vec<RecordId>,
        records: &'a BTreeMap<RecordId, BTreeMap<FieldKey, MvReg<Value>>>,
    },
}

/// Per-document replication state: CRDT payload, append-only op log, and
/// state vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationState {
    payload: Payload,
    clock: Clock<PeerId>,
    log: Vec<StampedOp>,
}

impl ReplicationState {
    /// A fresh, empty document of the given shape.
    pub fn new(type_tag: TypeTag) -> Self {
        Self {
            payload: Payload::new(type_tag),
            clock: Clock::new(),
            log: Vec::new(),
        }
    }

    /// The document's CRDT shape.
    pub fn type_tag(&self) -> TypeTag {
        self.payload.type_tag()
    }

    /// Every stamp this state has ever applied, in log order — used by
    /// persistence to rebuild a snapshot and by the supervisor to list
    /// known authors.
    pub fn log(&self) -> &[StampedOp] {
        &self.log
    }

    /// The set of client ids that have contributed to this document.
    pub fn clients(&self) -> std::collections::BTreeSet<PeerId> {
        self.clock.iter().map(|d| d.actor).collect()
    }

    /// Runs `mutate` as a single atomic local transaction, applies the
    /// resulting ops, and returns the update representing the net delta.
    pub fn apply_local(
        &mut self,
        actor: PeerId,
        mutate: impl FnOnce(&mut Transaction) -> Result<(), CrdtError>,
    ) -> Result<Update, CrdtError> {
        let mut txn = Transaction {
            actor,
            next_counter: self.clock.get(&actor),
            payload: &mut self.payload,
            ops: Vec::new(),
        };
        mutate(&mut txn)?;
        let ops = txn.ops;
        for stamped in &ops {
            self.clock.apply(stamped.stamp);
        }
        self.log.extend(ops.iter().cloned());
        Ok(Update { ops })
    }

    /// Applies a remote update. Idempotent per-op: a stamp whose counter is
    /// not newer than what this state has already recorded for that actor
    /// is skipped.
    pub fn apply_remote(&mut self, update: &Update) -> Result<(), CrdtError> {
        for stamped in &update.ops {
            if stamped.stamp.counter <= self.clock.get(&stamped.stamp.actor) {
                continue;
            }
            self.payload.apply(&stamped.op)?;
            self.clock.apply(stamped.stamp);
            self.log.push(stamped.clone());
        }
        Ok(())
    }

    /// The current state vector, encoded.
    /// Empty documents encode to fewer than 8 bytes.
    pub fn state_vector(&self) -> Vec<u8> {
        bincode::serialize(&self.clock).expect("clock encodes infallibly")
    }

    /// Decodes a remote peer's state vector.
    pub fn decode_state_vector(bytes: &[u8]) -> Result<Clock<PeerId>, CrdtError> {
        bincode::deserialize(bytes).map_err(|e| CrdtError::MalformedUpdate(e.to_string()))
    }

    /// Every operation newer than `remote`'s state vector. Identical state vectors produce an empty update.
    pub fn diff_since(&self, remote: &Clock<PeerId>) -> Update {
        let ops = self
            .log
            .iter()
            .filter(|e| e.stamp.counter > remote.get(&e.stamp.actor))
            .cloned()
            .collect();
        Update { ops }
    }

    /// A read view over the current materialized state.
    pub fn view(&self) -> View<'_> {
        match &self.payload {
            Payload::Text(rga) => View::Text(rga.values().into_iter().collect()),
            Payload::Sheet(cells) => View::Sheet(cells),
            Payload::Kanban { order, records } => View::Kanban {
                order: order.values(),
                records,
            },
        }
    }

    /// Rebuilds state from a previously-encoded snapshot (whole
    /// `ReplicationState`, produced by `snapshot_bytes`).
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, CrdtError> {
        bincode::deserialize(bytes).map_err(|e| CrdtError::CorruptLog(e.to_string()))
    }

    /// Encodes the whole state as a snapshot blob.
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("state encodes infallibly")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::new([n; 32])
    }

    #[test]
    fn two_replicas_converge_on_concurrent_text_inserts() {
        // Scenario 1: A inserts "Hello " at 0, B inserts
        // "World" at 5, concurrently; both converge to the same string.
        let a = peer(1);
        let b = peer(2);
        let mut sa = ReplicationState::new(TypeTag::Text);
        let mut sb = ReplicationState::new(TypeTag::Text);

        let update_a = sa
            .apply_local(a, |t| t.insert_str(0, "Hello "))
            .unwrap();
        let update_b = sb.apply_local(b, |t| t.insert_str(0, "World")).unwrap();

        sa.apply_remote(&update_b).unwrap();
        sb.apply_remote(&update_a).unwrap();

        let View::Text(text_a) = sa.view() else {
            panic!("expected text view")
        };
        let View::Text(text_b) = sb.view() else {
            panic!("expected text view")
        };
        assert_eq!(text_a, text_b);
        assert_eq!(text_a.len(), "Hello World".len());
    }

    #[test]
    fn applying_an_update_twice_is_a_no_op() {
        let a = peer(1);
        let mut state = ReplicationState::new(TypeTag::Text);
        let update = state.apply_local(a, |t| t.insert_str(0, "hi")).unwrap();
        let before = state.snapshot_bytes();
        state.apply_remote(&update).unwrap();
        assert_eq!(state.snapshot_bytes(), before);
    }

    #[test]
    fn empty_document_state_vector_is_small() {
        let state = ReplicationState::new(TypeTag::Text);
        assert!(state.state_vector().len() < 8);
    }

    #[test]
    fn diff_from_identical_state_vectors_is_empty() {
        let a = peer(1);
        let mut state = ReplicationState::new(TypeTag::Text);
        state.apply_local(a, |t| t.insert_str(0, "hi")).unwrap();
        let sv = ReplicationState::decode_state_vector(&state.state_vector()).unwrap();
        assert!(state.diff_since(&sv).is_empty());
    }

    #[test]
    fn applying_empty_diff_is_a_no_op() {
        let a = peer(1);
        let mut state = ReplicationState::new(TypeTag::Text);
        state.apply_local(a, |t| t.insert_str(0, "hi")).unwrap();
        let before = state.snapshot_bytes();
        state.apply_remote(&Update::default()).unwrap();
        assert_eq!(state.snapshot_bytes(), before);
    }

    #[test]
    fn malformed_update_is_rejected_without_corrupting_state() {
        let mut state = ReplicationState::new(TypeTag::Sheet);
        let err = state
            .apply_remote(&Update {
                ops: vec![StampedOp {
                    stamp: Dot::new(peer(1), 1),
                    op: DocOp::Text(RgaOp::Delete {
                        id: Dot::new(peer(1), 0),
                    }),
                }],
            })
            .unwrap_err();
        assert!(matches!(err, CrdtError::TypeMismatch { .. }));
    }

    #[test]
    fn sheet_cell_assignment_applies() {
        let a = peer(1);
        let mut state = ReplicationState::new(TypeTag::Sheet);
        state
            .apply_local(a, |t| t.assign_cell(0, 0, Value::Number(42.0)))
            .unwrap();
        let View::Sheet(cells) = state.view() else {
            panic!("expected sheet view")
        };
        assert_eq!(cells.get(&(0, 0)).unwrap().values(), vec![&Value::Number(42.0)]);
    }

    #[test]
    fn kanban_record_insert_and_field_set() {
        let a = peer(1);
        let mut state = ReplicationState::new(TypeTag::Kanban);
        let record = state
            .apply_local(a, |t| {
                let r = t.insert_record(0)?;
                t.set_field(r, "title", Value::Text("write tests".into()))?;
                Ok(())
            })
            .map(|_| ());
        assert!(record.is_ok());
        let View::Kanban { order, records } = state.view() else {
            panic!("expected kanban view")
        };
        assert_eq!(order.len(), 1);
        let fields = records.get(&order[0]).unwrap();
        assert_eq!(
            fields.get("title").unwrap().values(),
            vec![&Value::Text("write tests".into())]
        );
    }
}
