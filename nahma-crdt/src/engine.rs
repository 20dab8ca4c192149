//! The replication engine: owns every open document's [`ReplicationState`]
//! and mediates all reads/writes through a single `RwLock` per document, so
//! callers on the supervisor's task and callers on a mesh receive task never
//! race on the same state.

use crate::clock::Clock;
use crate::doc::{ReplicationState, Transaction, Update, View};
use crate::error::CrdtError;
use async_trait::async_trait;
use nahma_model::{DocId, PeerId, TypeTag};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Where the engine persists snapshots and logs. Implemented by
/// `nahma-persist`; kept as a trait here so this crate never depends on a
/// concrete storage engine.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Loads a document's last-persisted snapshot, if any exists.
    async fn load_snapshot(&self, doc: DocId) -> anyhow::Result<Option<Vec<u8>>>;

    /// Persists a document's full state as a snapshot, superseding any
    /// previous one.
    async fn store_snapshot(&self, doc: DocId, bytes: Vec<u8>) -> anyhow::Result<()>;

    /// Appends one update to the document's durable log, for replay after a
    /// restart between snapshots.
    async fn append_log(&self, doc: DocId, bytes: Vec<u8>) -> anyhow::Result<()>;

    /// Every update logged for `doc` since its last snapshot, oldest first.
    /// `open_document` replays these onto the loaded snapshot so a restart
    /// without a clean `close_document` loses nothing.
    async fn load_log(&self, doc: DocId) -> anyhow::Result<Vec<Vec<u8>>>;
}

/// A backend that persists nothing: documents live only in memory for the
/// lifetime of the process. Used when running with `--no-persist`.
#[derive(Default)]
pub struct NullBackend;

#[async_trait]
impl PersistenceBackend for NullBackend {
    async fn load_snapshot(&self, _doc: DocId) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn store_snapshot(&self, _doc: DocId, _bytes: Vec<u8>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn append_log(&self, _doc: DocId, _bytes: Vec<u8>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn load_log(&self, _doc: DocId) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }
}

struct OpenDoc {
    state: RwLock<ReplicationState>,
}

/// Owns the in-memory replication state for every currently-open document
/// and persists through the configured [`PersistenceBackend`].
pub struct Engine {
    backend: Arc<dyn PersistenceBackend>,
    open: RwLock<HashMap<DocId, Arc<OpenDoc>>>,
}

impl Engine {
    /// Builds an engine over the given persistence backend.
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            backend,
            open: RwLock::new(HashMap::new()),
        }
    }

    /// An engine that persists nothing, for tests and `--no-persist` runs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(NullBackend))
    }

    /// Opens a document, loading its snapshot if the backend has one (or
    /// starting fresh of the given shape otherwise), then replaying every
    /// update logged since that snapshot. This is what makes an unclean
    /// shutdown (no `close_document`, so no final snapshot) lossless: the
    /// log holds everything the last snapshot doesn't. Idempotent: opening
    /// an already-open document returns the existing handle.
    pub async fn open_document(
        &self,
        doc: DocId,
        type_tag: TypeTag,
    ) -> Result<(), CrdtError> {
        if self.open.read().await.contains_key(&doc) {
            return Ok(());
        }
        let mut open = self.open.write().await;
        if open.contains_key(&doc) {
            return Ok(());
        }
        let mut state = match self
            .backend
            .load_snapshot(doc)
            .await
            .map_err(CrdtError::Backend)?
        {
            Some(bytes) => ReplicationState::from_snapshot(&bytes)?,
            None => ReplicationState::new(type_tag),
        };
        for bytes in self.backend.load_log(doc).await.map_err(CrdtError::Backend)? {
            let update = Update::decode(&bytes)?;
            state.apply_remote(&update)?;
        }
        open.insert(
            doc,
            Arc::new(OpenDoc {
                state: RwLock::new(state),
            }),
        );
        Ok(())
    }

    /// Drops a document's in-memory state after persisting a final
    /// snapshot. A closed document's state is gone; reopening it reloads
    /// from the backend.
    pub async fn close_document(&self, doc: DocId) -> Result<(), CrdtError> {
        let entry = self.open.write().await.remove(&doc);
        if let Some(entry) = entry {
            let bytes = entry.state.read().await.snapshot_bytes();
            self.backend
                .store_snapshot(doc, bytes)
                .await
                .map_err(CrdtError::Backend)?;
        }
        Ok(())
    }

    async fn handle(&self, doc: DocId) -> Result<Arc<OpenDoc>, CrdtError> {
        self.open
            .read()
            .await
            .get(&doc)
            .cloned()
            .ok_or_else(|| CrdtError::NotFound(doc.to_hex()))
    }

    /// Runs a local mutation against an open document and appends the
    /// resulting update to the backend's durable log.
    pub async fn apply_local(
        &self,
        doc: DocId,
        actor: PeerId,
        mutate: impl FnOnce(&mut Transaction) -> Result<(), CrdtError> + Send,
    ) -> Result<Update, CrdtError> {
        let handle = self.handle(doc).await?;
        let update = {
            let mut state = handle.state.write().await;
            state.apply_local(actor, mutate)?
        };
        if !update.is_empty() {
            self.backend
                .append_log(doc, update.encode()?)
                .await
                .map_err(CrdtError::Backend)?;
        }
        Ok(update)
    }

    /// Applies a remote update to an open document and appends it to the
    /// backend's durable log. A no-op update (every op already applied) is
    /// not re-logged.
    pub async fn apply_remote(&self, doc: DocId, update: &Update) -> Result<(), CrdtError> {
        let handle = self.handle(doc).await?;
        let applied = {
            let mut state = handle.state.write().await;
            let before = state.state_vector();
            state.apply_remote(update)?;
            state.state_vector() != before
        };
        if applied {
            self.backend
                .append_log(doc, update.encode()?)
                .await
                .map_err(CrdtError::Backend)?;
        }
        Ok(())
    }

    /// The document's current state vector, encoded for a sync handshake.
    pub async fn state_vector(&self, doc: DocId) -> Result<Vec<u8>, CrdtError> {
        let handle = self.handle(doc).await?;
        Ok(handle.state.read().await.state_vector())
    }

    /// The update containing every operation newer than `remote`'s encoded
    /// state vector.
    pub async fn diff_since(&self, doc: DocId, remote: &[u8]) -> Result<Update, CrdtError> {
        let remote: Clock<PeerId> = ReplicationState::decode_state_vector(remote)?;
        let handle = self.handle(doc).await?;
        Ok(handle.state.read().await.diff_since(&remote))
    }

    /// Runs `read` against the document's current materialized view.
    pub async fn view<R>(
        &self,
        doc: DocId,
        read: impl FnOnce(View<'_>) -> R,
    ) -> Result<R, CrdtError> {
        let handle = self.handle(doc).await?;
        let state = handle.state.read().await;
        Ok(read(state.view()))
    }

    /// True if the document is currently open.
    pub async fn is_open(&self, doc: DocId) -> bool {
        self.open.read().await.contains_key(&doc)
    }
}
