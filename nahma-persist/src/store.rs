//! The sled-backed store: one embedded database per peer holding the
//! identity blob, workspace/folder/document metadata, and every open
//! document's snapshot and update log.

use crate::error::PersistError;
use crate::identity::{delete_identity, load_identity, store_identity};
use crate::keys::MachineKey;
use crate::workspace::{
    delete_document, delete_folder, delete_workspace, get_workspace, list_documents,
    list_folders, list_workspaces, put_document, put_folder, put_workspace,
};
use async_trait::async_trait;
use nahma_crdt::PersistenceBackend;
use nahma_model::{DocId, Document, Folder, FolderId, Identity, Workspace, WorkspaceId};
use std::path::Path;

const SNAPSHOT_TREE: &str = "snapshots";
const LOG_TREE: &str = "log";

fn log_prefix(doc: DocId) -> [u8; 16] {
    doc.0
}

fn log_key(doc: DocId, seq: u64) -> Vec<u8> {
    let mut key = doc.0.to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// The peer's whole local store: identity, workspace metadata and every
/// document's durable CRDT state.
pub struct Store {
    db: sled::Db,
    identities: sled::Tree,
    workspaces: sled::Tree,
    folders: sled::Tree,
    documents: sled::Tree,
    snapshots: sled::Tree,
    log: sled::Tree,
    machine_key: MachineKey,
}

impl Store {
    /// Opens (creating if absent) the store rooted at `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self, PersistError> {
        std::fs::create_dir_all(state_dir)
            .map_err(|e| PersistError::MachineKey(e.to_string()))?;
        let machine_key = MachineKey::load_or_create(state_dir)?;
        let db = sled::open(state_dir.join("db"))?;
        Self::from_db(db, machine_key)
    }

    fn from_db(db: sled::Db, machine_key: MachineKey) -> Result<Self, PersistError> {
        Ok(Self {
            identities: db.open_tree("identities")?,
            workspaces: db.open_tree("workspaces")?,
            folders: db.open_tree("folders")?,
            documents: db.open_tree("documents")?,
            snapshots: db.open_tree(SNAPSHOT_TREE)?,
            log: db.open_tree(LOG_TREE)?,
            db,
            machine_key,
        })
    }

    // -- identity -----------------------------------------------------

    /// Loads the local identity, if onboarding has already run.
    pub fn load_identity(&self) -> Result<Option<Identity>, PersistError> {
        load_identity(&self.identities, &self.machine_key)
    }

    /// Persists the local identity.
    pub fn store_identity(&self, identity: &Identity) -> Result<(), PersistError> {
        store_identity(&self.identities, &self.machine_key, identity)
    }

    /// Deletes the local identity blob.
    pub fn delete_identity(&self) -> Result<(), PersistError> {
        delete_identity(&self.identities)
    }

    // -- workspace / folder / document metadata ------------------------

    pub fn put_workspace(&self, workspace: &Workspace) -> Result<(), PersistError> {
        put_workspace(&self.workspaces, workspace)
    }

    pub fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, PersistError> {
        get_workspace(&self.workspaces, id)
    }

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>, PersistError> {
        list_workspaces(&self.workspaces)
    }

    /// Deletes a workspace and every folder and document filed under it,
    /// including their CRDT snapshots and logs.
    pub fn delete_workspace(&self, id: &WorkspaceId) -> Result<(), PersistError> {
        for folder in list_folders(&self.folders, id)? {
            delete_folder(&self.folders, folder.id)?;
        }
        for document in list_documents(&self.documents, id)? {
            self.delete_document(document.id)?;
        }
        delete_workspace(&self.workspaces, id)
    }

    pub fn put_folder(&self, folder: &Folder) -> Result<(), PersistError> {
        put_folder(&self.folders, folder)
    }

    pub fn delete_folder(&self, id: FolderId) -> Result<(), PersistError> {
        delete_folder(&self.folders, id)
    }

    pub fn list_folders(&self, workspace: &WorkspaceId) -> Result<Vec<Folder>, PersistError> {
        list_folders(&self.folders, workspace)
    }

    pub fn put_document(&self, document: &Document) -> Result<(), PersistError> {
        put_document(&self.documents, document)
    }

    pub fn list_documents(&self, workspace: &WorkspaceId) -> Result<Vec<Document>, PersistError> {
        list_documents(&self.documents, workspace)
    }

    /// Drops a document's metadata record, snapshot and entire update log.
    pub fn delete_document(&self, doc: DocId) -> Result<(), PersistError> {
        delete_document(&self.documents, doc)?;
        self.snapshots.remove(&doc.0)?;
        let prefix = log_prefix(doc);
        for key in self.log.scan_prefix(prefix).keys() {
            self.log.remove(key?)?;
        }
        self.snapshots.flush()?;
        self.log.flush()?;
        Ok(())
    }

    /// Replaces a document's log with a fresh snapshot: writes the snapshot
    /// first, then truncates the log, so a crash between the two steps
    /// leaves the old log intact and the document still replays correctly.
    pub fn compact(&self, doc: DocId, snapshot: Vec<u8>) -> Result<(), PersistError> {
        self.snapshots.insert(&doc.0, snapshot)?;
        self.snapshots.flush()?;
        let prefix = log_prefix(doc);
        for key in self.log.scan_prefix(prefix).keys() {
            self.log.remove(key?)?;
        }
        self.log.flush()?;
        Ok(())
    }

    /// Every update logged for `doc` since its last snapshot, oldest first.
    pub fn load_log(&self, doc: DocId) -> Result<Vec<Vec<u8>>, PersistError> {
        let prefix = log_prefix(doc);
        self.log
            .scan_prefix(prefix)
            .values()
            .map(|v| Ok(v?.to_vec()))
            .collect()
    }
}

#[async_trait]
impl PersistenceBackend for Store {
    /// If the snapshot tree itself can't be read, the log is the only other
    /// place the document's state could still live; when that's unreadable
    /// too, this is a quarantine case rather than an ordinary storage error.
    async fn load_snapshot(&self, doc: DocId) -> anyhow::Result<Option<Vec<u8>>> {
        match self.snapshots.get(&doc.0) {
            Ok(bytes) => Ok(bytes.map(|v| v.to_vec())),
            Err(snapshot_err) => match self.load_log(doc) {
                Ok(_) => Err(PersistError::Storage(snapshot_err).into()),
                Err(_) => Err(PersistError::Quarantined(doc).into()),
            },
        }
    }

    async fn store_snapshot(&self, doc: DocId, bytes: Vec<u8>) -> anyhow::Result<()> {
        self.compact(doc, bytes)?;
        Ok(())
    }

    async fn append_log(&self, doc: DocId, bytes: Vec<u8>) -> anyhow::Result<()> {
        let seq = self.db.generate_id()?;
        self.log.insert(log_key(doc, seq), bytes)?;
        self.log.flush_async().await?;
        Ok(())
    }

    async fn load_log(&self, doc: DocId) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(self.load_log(doc)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nahma_model::TypeTag;

    fn store() -> Store {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let machine_key = MachineKey::load_or_create(dir.path()).unwrap();
        // The tempdir is deliberately leaked for the lifetime of the test:
        // the machine key file must outlive the in-memory db it protects.
        std::mem::forget(dir);
        Store::from_db(db, machine_key).unwrap()
    }

    #[tokio::test]
    async fn snapshot_and_log_round_trip_through_the_backend() {
        let store = store();
        let doc = DocId::generate();
        assert!(store.load_snapshot(doc).await.unwrap().is_none());

        store.append_log(doc, b"op-1".to_vec()).await.unwrap();
        store.append_log(doc, b"op-2".to_vec()).await.unwrap();
        assert_eq!(store.load_log(doc).unwrap(), vec![b"op-1".to_vec(), b"op-2".to_vec()]);

        store.store_snapshot(doc, b"snap".to_vec()).await.unwrap();
        assert_eq!(store.load_snapshot(doc).await.unwrap(), Some(b"snap".to_vec()));
        assert!(store.load_log(doc).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_document_drops_its_snapshot_and_log() {
        let store = store();
        let ws = WorkspaceId::generate();
        let doc = Document::new("t", TypeTag::Text, ws, None, 0);
        store.put_document(&doc).unwrap();
        store.snapshots.insert(&doc.id.0, b"snap".to_vec()).unwrap();
        store.log.insert(log_key(doc.id, 1), b"op".to_vec()).unwrap();

        store.delete_document(doc.id).unwrap();

        assert!(store.snapshots.get(&doc.id.0).unwrap().is_none());
        assert!(store.load_log(doc.id).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_workspace_cascades_to_its_documents() {
        let store = store();
        let ws = Workspace::create("demo", nahma_model::PeerId::new([2; 32]), 0);
        store.put_workspace(&ws).unwrap();
        let doc = Document::new("t", TypeTag::Text, ws.id.clone(), None, 0);
        store.put_document(&doc).unwrap();
        store.snapshots.insert(&doc.id.0, b"snap".to_vec()).unwrap();

        store.delete_workspace(&ws.id).unwrap();

        assert!(store.get_workspace(&ws.id).unwrap().is_none());
        assert!(store.list_documents(&ws.id).unwrap().is_empty());
        assert!(store.snapshots.get(&doc.id.0).unwrap().is_none());
    }
}
