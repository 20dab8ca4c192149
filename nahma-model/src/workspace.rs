//! Workspaces: the addressable unit of sharing. A workspace bundles a set of
//! documents behind one symmetric encryption key and one membership map.

use crate::identity::PeerId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coarse membership tag. There is no finer-grained, document-level access
/// control in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Can destroy the workspace (tombstone propagates to peers) and change
    /// the role map.
    Owner,
    /// Can mutate documents.
    Editor,
    /// Can read documents but not mutate them.
    Viewer,
}

impl Role {
    /// Parses the `perm:` invite query fragment.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Role::Owner),
            "editor" => Some(Role::Editor),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    /// Renders the `perm:` invite query fragment.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

/// A workspace identifier, rendered as lowercase hex.
///
/// We always *generate* 16 random bytes, but *parsing* accepts
/// any even-length hex string, so the parser does not enforce a fixed
/// width on ids it merely carries through.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub Vec<u8>);

impl WorkspaceId {
    /// Generates a random 16-byte workspace id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.to_vec())
    }

    /// Parses a lowercase-hex workspace id, as used in invite URIs.
    pub fn from_hex(s: &str) -> Option<Self> {
        let v = hex::decode(s).ok()?;
        Some(Self(v))
    }

    /// Renders the lowercase-hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// The workspace's symmetric encryption key (32 bytes). Encrypting document
/// content at this layer is out of the core's scope; the core
/// only carries the key material through invites and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey(pub [u8; 32]);

impl EncryptionKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Standard (padded) base64: a 32-byte key always renders as 44
    /// characters.
    pub fn to_base64(self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Parses a standard-base64 32-byte key.
    pub fn from_base64(s: &str) -> Option<Self> {
        use base64::Engine;
        let v = base64::engine::general_purpose::STANDARD
            .decode(s)
            .ok()?;
        let bytes: [u8; 32] = v.try_into().ok()?;
        Some(Self(bytes))
    }
}

/// A workspace: id, display name, owner, role map, shared encryption key,
/// and creation time.
#[derive(Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub display_name: String,
    pub owner: PeerId,
    pub roles: BTreeMap<PeerId, Role>,
    pub key: EncryptionKey,
    pub created_at: u64,
}

impl Workspace {
    /// Creates a brand-new, locally-owned workspace.
    pub fn create(display_name: impl Into<String>, owner: PeerId, now_ms: u64) -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(owner, Role::Owner);
        Self {
            id: WorkspaceId::generate(),
            display_name: display_name.into(),
            owner,
            roles,
            key: EncryptionKey::generate(),
            created_at: now_ms,
        }
    }

    /// The role of `peer`, if any. Peers absent from the map have no role.
    pub fn role_of(&self, peer: PeerId) -> Option<Role> {
        self.roles.get(&peer).copied()
    }

    /// Grants or updates a peer's role. Only the owner calls this in
    /// practice; the core does not itself enforce who may call it beyond
    /// what `nahma-auth`'s signature check on the issuing control message
    /// already establishes.
    pub fn set_role(&mut self, peer: PeerId, role: Role) {
        self.roles.insert(peer, role);
    }

    /// Removes a peer from the membership set entirely.
    pub fn remove_member(&mut self, peer: &PeerId) {
        self.roles.remove(peer);
    }
}
