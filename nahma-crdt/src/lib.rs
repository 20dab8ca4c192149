//! Nahma's CRDT replication engine.
//!
//! A document's content lives behind exactly one of three shapes — a
//! replicated sequence (`text`), a map of multi-value registers (`sheet`),
//! or an ordered sequence of record field-maps (`kanban`) — all built on a
//! shared dot/clock causality substrate. [`engine::Engine`] is the surface
//! the supervisor and mesh driver actually call: it owns every open
//! document's state and mediates persistence.

pub mod clock;
pub mod doc;
pub mod dot;
pub mod engine;
pub mod error;
pub mod mvreg;
pub mod rga;
pub mod value;

pub use clock::Clock;
pub use doc::{DocOp, FieldKey, ReplicationState, StampedOp, Transaction, Update, View};
pub use dot::Dot;
pub use engine::{Engine, NullBackend, PersistenceBackend};
pub use error::CrdtError;
pub use mvreg::{MvReg, MvRegOp};
pub use rga::{Rga, RgaOp};
pub use value::{RecordId, Value};
