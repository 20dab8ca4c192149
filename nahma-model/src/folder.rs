//! Folders form a forest of tree nodes within a workspace.

use crate::workspace::WorkspaceId;
use serde::{Deserialize, Serialize};

/// A 16-byte folder identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FolderId(pub [u8; 16]);

impl FolderId {
    /// Generates a random folder id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }
}

/// A tree node within a workspace. `parent` is `None` at the forest roots.
///
/// Invariant: the forest contains no cycles; deleting a folder deletes its
/// entire subtree (enforced by the owning collaborator layer, which walks
/// `children_of` before issuing deletes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub parent: Option<FolderId>,
    pub workspace: WorkspaceId,
}

impl Folder {
    /// Creates a new folder node.
    pub fn new(
        name: impl Into<String>,
        parent: Option<FolderId>,
        workspace: WorkspaceId,
    ) -> Self {
        Self {
            id: FolderId::generate(),
            name: name.into(),
            parent,
            workspace,
        }
    }
}

/// Returns true if `candidate` is a descendant of `root` (or equal to it),
/// walking `all` as the full folder set of the workspace. Used to reject
/// re-parenting operations that would introduce a cycle.
pub fn is_descendant(all: &[Folder], root: FolderId, candidate: FolderId) -> bool {
    if root == candidate {
        return true;
    }
    let mut frontier = vec![root];
    while let Some(id) = frontier.pop() {
        for f in all {
            if f.parent == Some(id) {
                if f.id == candidate {
                    return true;
                }
                frontier.push(f.id);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws() -> WorkspaceId {
        WorkspaceId::generate()
    }

    #[test]
    fn detects_descendant() {
        let w = ws();
        let root = Folder::new("root", None, w.clone());
        let child = Folder::new("child", Some(root.id), w.clone());
        let grandchild = Folder::new("grandchild", Some(child.id), w);
        let all = vec![root.clone(), child.clone(), grandchild.clone()];
        assert!(is_descendant(&all, root.id, grandchild.id));
        assert!(!is_descendant(&all, grandchild.id, root.id));
    }
}
