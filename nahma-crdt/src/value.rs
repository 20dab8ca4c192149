//! The scalar value type stored in `sheet` cells and `kanban` record
//! fields.

use serde::{Deserialize, Serialize};

/// A primitive cell/field value. Deliberately small: the core does not
/// interpret document content, this is just enough shape to
/// make the `sheet`/`kanban` CRDTs concrete and testable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

/// A 16-byte record identifier used by the `kanban` document type (a card
/// or, with `column` as a field, a column header's card).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub [u8; 16]);

impl RecordId {
    /// Generates a random record id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }
}
