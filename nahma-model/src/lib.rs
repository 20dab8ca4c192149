//! Nahma's domain model: identity, workspace membership, the folder forest,
//! document records, topic derivation and invite URIs.
//!
//! This crate has no networking, persistence or CRDT logic of its own; it is
//! the shared vocabulary every other `nahma-*` crate builds on.

mod document;
mod folder;
mod identity;
mod invite;
mod topic;
mod workspace;

pub use document::{DocId, Document, TypeTag};
pub use folder::{is_descendant, Folder, FolderId};
pub use identity::{Identity, Keypair, PeerId};
pub use invite::{Invite, InviteError};
pub use topic::Topic;
pub use workspace::{EncryptionKey, Role, Workspace, WorkspaceId};
