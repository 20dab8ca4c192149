//! Documents: typed CRDT instances addressed within a workspace, optionally
//! filed under a folder.

use crate::folder::FolderId;
use crate::workspace::WorkspaceId;
use serde::{Deserialize, Serialize};

/// The document's CRDT shape. The core implements exactly these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    /// A replicated sequence of Unicode scalar values.
    Text,
    /// A map of `(row, col)` to a multi-value register.
    Sheet,
    /// An ordered sequence of record ids, each a small field map.
    Kanban,
}

impl TypeTag {
    /// Stable lowercase name, used in persistence keys and log records.
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Text => "text",
            TypeTag::Sheet => "sheet",
            TypeTag::Kanban => "kanban",
        }
    }

    /// Parses the lowercase name back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(TypeTag::Text),
            "sheet" => Some(TypeTag::Sheet),
            "kanban" => Some(TypeTag::Kanban),
            _ => None,
        }
    }
}

/// A 16-byte document identifier, rendered as lowercase hex for topic
/// derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub [u8; 16]);

impl DocId {
    /// Generates a random document id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Lowercase-hex rendering, the exact string fed into topic derivation.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

/// A document: id, name, CRDT shape, owning workspace, optional folder, and
/// timestamps. The content itself is opaque to this crate; it lives in
/// `nahma-crdt`'s `ReplicationState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub name: String,
    pub type_tag: TypeTag,
    pub workspace: WorkspaceId,
    pub folder: Option<FolderId>,
    pub created_at: u64,
    pub last_edit_at: u64,
}

impl Document {
    /// Creates a new, empty document record.
    pub fn new(
        name: impl Into<String>,
        type_tag: TypeTag,
        workspace: WorkspaceId,
        folder: Option<FolderId>,
        now_ms: u64,
    ) -> Self {
        Self {
            id: DocId::generate(),
            name: name.into(),
            type_tag,
            workspace,
            folder,
            created_at: now_ms,
            last_edit_at: now_ms,
        }
    }

    /// Bumps `last_edit_at`. Called by the supervisor whenever the engine
    /// applies a local or remote update to this document.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_edit_at = now_ms;
    }
}
