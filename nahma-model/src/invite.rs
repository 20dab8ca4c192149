//! Invite URIs: the sole bit-exact wire format the core imposes on external
//! callers.
//!
//! Exact form: `nightjar://w/<workspaceId>#k:<base64key>[&perm:<role>]`.
//!
//! Open question resolved: invites carry **no issuer
//! signature**. The workspace encryption key embedded in the URI is already
//! the bearer secret; a join is only ever admitted once the new peer's own
//! `announce` is signed and checked against the workspace's role map
//! (`nahma-auth` + the role map in `Workspace`), so a second signature over
//! the invite itself would guard a threat the key's possession already
//! covers. See `DESIGN.md`.

use crate::workspace::{EncryptionKey, Role, WorkspaceId};
use thiserror::Error;

/// An invite is not retained once used; it exists only as a parsed tuple
/// `(workspaceId, encryptionKey, role)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub workspace: WorkspaceId,
    pub key: EncryptionKey,
    pub role: Role,
}

/// Failure modes for invite parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InviteError {
    #[error("invite URI missing the `nightjar://w/` scheme and path")]
    BadScheme,
    #[error("invite URI missing a workspace id")]
    MissingWorkspaceId,
    #[error("invite URI has a malformed workspace id")]
    BadWorkspaceId,
    #[error("invite URI missing the `#k:` key fragment")]
    MissingKey,
    #[error("invite URI has a malformed encryption key")]
    BadKey,
    #[error("invite URI has an unrecognized `perm:` role")]
    BadRole,
}

const SCHEME_PREFIX: &str = "nightjar://w/";

impl Invite {
    /// Builds an invite for `(workspace, key, role)`. `role` defaults to
    /// `editor` when omitted from the rendered URI: we always render it
    /// explicitly so round-tripping is lossless, but a parser tolerant of
    /// older links may still treat an absent fragment as `editor`.
    pub fn new(workspace: WorkspaceId, key: EncryptionKey, role: Role) -> Self {
        Self {
            workspace,
            key,
            role,
        }
    }

    /// Renders the exact URI form.
    pub fn to_uri(&self) -> String {
        format!(
            "{}{}#k:{}&perm:{}",
            SCHEME_PREFIX,
            self.workspace.to_hex(),
            self.key.to_base64(),
            self.role.as_str()
        )
    }

    /// Parses a URI produced by [`Invite::to_uri`], or any URI of the same
    /// exact shape. The `&perm:<role>` suffix is optional on input; when
    /// absent the role defaults to `editor`.
    pub fn parse(uri: &str) -> Result<Self, InviteError> {
        let rest = uri.strip_prefix(SCHEME_PREFIX).ok_or(InviteError::BadScheme)?;
        let (workspace_part, fragment) = rest.split_once('#').ok_or(InviteError::MissingKey)?;
        if workspace_part.is_empty() {
            return Err(InviteError::MissingWorkspaceId);
        }
        let workspace =
            WorkspaceId::from_hex(workspace_part).ok_or(InviteError::BadWorkspaceId)?;

        let mut key = None;
        let mut role = Role::Editor;
        for field in fragment.split('&') {
            if let Some(k) = field.strip_prefix("k:") {
                key = Some(EncryptionKey::from_base64(k).ok_or(InviteError::BadKey)?);
            } else if let Some(p) = field.strip_prefix("perm:") {
                role = Role::parse(p).ok_or(InviteError::BadRole)?;
            }
        }
        let key = key.ok_or(InviteError::MissingKey)?;

        Ok(Self {
            workspace,
            key,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exact_wire_format_for_a_known_workspace_and_key() {
        let workspace = WorkspaceId::from_hex("abcd1234abcd1234").unwrap();
        let key = EncryptionKey([0u8; 32]);
        let encoded = key.to_base64();
        assert_eq!(encoded.len(), 44, "base64 of 32 bytes is 44 chars");
        let invite = Invite::new(workspace, key, Role::Editor);
        assert_eq!(
            invite.to_uri(),
            format!(
                "nightjar://w/abcd1234abcd1234#k:{}&perm:editor",
                encoded
            )
        );
    }

    #[test]
    fn round_trip_every_legal_triple() {
        for role in [Role::Owner, Role::Editor, Role::Viewer] {
            let workspace = WorkspaceId::generate();
            let key = EncryptionKey::generate();
            let invite = Invite::new(workspace.clone(), key, role);
            let parsed = Invite::parse(&invite.to_uri()).unwrap();
            assert_eq!(parsed.workspace, workspace);
            assert_eq!(parsed.key, key);
            assert_eq!(parsed.role, role);
        }
    }

    #[test]
    fn missing_role_defaults_to_editor() {
        let workspace = WorkspaceId::generate();
        let key = EncryptionKey::generate();
        let uri = format!(
            "nightjar://w/{}#k:{}",
            workspace.to_hex(),
            key.to_base64()
        );
        let parsed = Invite::parse(&uri).unwrap();
        assert_eq!(parsed.role, Role::Editor);
    }

    #[test]
    fn rejects_bad_scheme() {
        assert_eq!(
            Invite::parse("https://example.com/"),
            Err(InviteError::BadScheme)
        );
    }

    #[test]
    fn rejects_missing_key() {
        assert_eq!(
            Invite::parse("nightjar://w/abcd1234abcd1234#perm:editor"),
            Err(InviteError::MissingKey)
        );
    }

    proptest! {
        /// Any workspace id, key, and role round-trips through the exact
        /// URI form, regardless of the particular byte values chosen.
        #[test]
        fn invite_round_trips_for_arbitrary_workspace_and_key(
            workspace_bytes in prop::collection::vec(any::<u8>(), 1..32),
            key_bytes in prop::array::uniform32(any::<u8>()),
            role_index in 0u8..3,
        ) {
            let workspace = WorkspaceId(workspace_bytes);
            let key = EncryptionKey(key_bytes);
            let role = [Role::Owner, Role::Editor, Role::Viewer][role_index as usize];
            let invite = Invite::new(workspace.clone(), key, role);

            let parsed = Invite::parse(&invite.to_uri()).unwrap();
            prop_assert_eq!(parsed.workspace, workspace);
            prop_assert_eq!(parsed.key, key);
            prop_assert_eq!(parsed.role, role);
        }
    }
}
