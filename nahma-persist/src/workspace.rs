//! Workspace, folder and document metadata records. Each
//! record set lives in its own sled tree, keyed by the record's id bytes.

use crate::error::PersistError;
use nahma_model::{Document, Folder, FolderId, Workspace, WorkspaceId};

/// Inserts or overwrites a workspace record.
pub fn put_workspace(tree: &sled::Tree, workspace: &Workspace) -> Result<(), PersistError> {
    let bytes = bincode::serialize(workspace)?;
    tree.insert(&workspace.id.0, bytes)?;
    tree.flush()?;
    Ok(())
}

/// Loads a single workspace by id.
pub fn get_workspace(
    tree: &sled::Tree,
    id: &WorkspaceId,
) -> Result<Option<Workspace>, PersistError> {
    tree.get(&id.0)?
        .map(|bytes| Ok(bincode::deserialize(&bytes)?))
        .transpose()
}

/// Removes a workspace record. Caller is responsible for cascading deletes
/// of its folders and documents.
pub fn delete_workspace(tree: &sled::Tree, id: &WorkspaceId) -> Result<(), PersistError> {
    tree.remove(&id.0)?;
    tree.flush()?;
    Ok(())
}

/// Every workspace this peer knows about, in no particular order.
pub fn list_workspaces(tree: &sled::Tree) -> Result<Vec<Workspace>, PersistError> {
    tree.iter()
        .values()
        .map(|bytes| Ok(bincode::deserialize(&bytes?)?))
        .collect()
}

/// Inserts or overwrites a folder record.
pub fn put_folder(tree: &sled::Tree, folder: &Folder) -> Result<(), PersistError> {
    let bytes = bincode::serialize(folder)?;
    tree.insert(&folder.id.0, bytes)?;
    tree.flush()?;
    Ok(())
}

/// Removes a folder record.
pub fn delete_folder(tree: &sled::Tree, id: FolderId) -> Result<(), PersistError> {
    tree.remove(&id.0)?;
    tree.flush()?;
    Ok(())
}

/// Every folder belonging to `workspace`.
pub fn list_folders(
    tree: &sled::Tree,
    workspace: &WorkspaceId,
) -> Result<Vec<Folder>, PersistError> {
    let mut out = Vec::new();
    for bytes in tree.iter().values() {
        let folder: Folder = bincode::deserialize(&bytes?)?;
        if &folder.workspace == workspace {
            out.push(folder);
        }
    }
    Ok(out)
}

/// Inserts or overwrites a document record.
pub fn put_document(tree: &sled::Tree, document: &Document) -> Result<(), PersistError> {
    let bytes = bincode::serialize(document)?;
    tree.insert(&document.id.0, bytes)?;
    tree.flush()?;
    Ok(())
}

/// Removes a document record. Caller is responsible for also dropping its
/// snapshot and log (`Store::delete_document`).
pub fn delete_document(tree: &sled::Tree, id: nahma_model::DocId) -> Result<(), PersistError> {
    tree.remove(&id.0)?;
    tree.flush()?;
    Ok(())
}

/// Every document belonging to `workspace`.
pub fn list_documents(
    tree: &sled::Tree,
    workspace: &WorkspaceId,
) -> Result<Vec<Document>, PersistError> {
    let mut out = Vec::new();
    for bytes in tree.iter().values() {
        let document: Document = bincode::deserialize(&bytes?)?;
        if &document.workspace == workspace {
            out.push(document);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nahma_model::PeerId;

    fn db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[test]
    fn workspace_round_trips() {
        let tree = db().open_tree("workspaces").unwrap();
        let ws = Workspace::create("demo", PeerId::new([1; 32]), 0);
        put_workspace(&tree, &ws).unwrap();
        let loaded = get_workspace(&tree, &ws.id).unwrap().unwrap();
        assert_eq!(loaded.id, ws.id);
        delete_workspace(&tree, &ws.id).unwrap();
        assert!(get_workspace(&tree, &ws.id).unwrap().is_none());
    }

    #[test]
    fn list_folders_filters_by_workspace() {
        let tree = db().open_tree("folders").unwrap();
        let ws_a = WorkspaceId::generate();
        let ws_b = WorkspaceId::generate();
        put_folder(&tree, &Folder::new("a", None, ws_a.clone())).unwrap();
        put_folder(&tree, &Folder::new("b", None, ws_b)).unwrap();
        let folders = list_folders(&tree, &ws_a).unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "a");
    }

    #[test]
    fn list_documents_filters_by_workspace() {
        let tree = db().open_tree("documents").unwrap();
        let ws = WorkspaceId::generate();
        let doc = Document::new("sheet", nahma_model::TypeTag::Sheet, ws.clone(), None, 0);
        put_document(&tree, &doc).unwrap();
        let docs = list_documents(&tree, &ws).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, doc.id);
    }
}
