//! The editor integration surface: `openDocument`,
//! `applyLocal`, `subscribe`. The editor never touches persistence,
//! transport, or keys directly — everything flows through here.

use crate::error::SdkError;
use crate::wire::{WireBody, WireFrame};
use nahma_crdt::{CrdtError, Engine, Transaction, Update, View};
use nahma_mesh::Mesh;
use nahma_model::{DocId, PeerId, Topic, TypeTag};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// The editor-facing facade over the replication engine and mesh. One
/// instance per running peer.
pub struct Sdk {
    engine: Arc<Engine>,
    mesh: Arc<Mesh>,
    local_peer: PeerId,
    subscribers: RwLock<HashMap<DocId, Vec<mpsc::UnboundedSender<Update>>>>,
}

impl Sdk {
    pub fn new(engine: Arc<Engine>, mesh: Arc<Mesh>, local_peer: PeerId) -> Self {
        Self {
            engine,
            mesh,
            local_peer,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Opens a document for editing, replaying its persisted state if any.
    pub async fn open_document(&self, doc: DocId, type_tag: TypeTag) -> Result<(), CrdtError> {
        self.engine.open_document(doc, type_tag).await
    }

    /// Releases a document's in-memory state after a final snapshot flush.
    pub async fn close_document(&self, doc: DocId) -> Result<(), CrdtError> {
        self.engine.close_document(doc).await
    }

    /// Runs `mutate` as one atomic local transaction and broadcasts the
    /// resulting update to every peer on the document's topic. A no-op
    /// mutation (empty update) is not broadcast.
    pub async fn apply_local(
        &self,
        doc: DocId,
        mutate: impl FnOnce(&mut Transaction) -> Result<(), CrdtError> + Send,
    ) -> Result<(), SdkError> {
        let update = self.engine.apply_local(doc, self.local_peer, mutate).await?;
        if update.is_empty() {
            return Ok(());
        }
        let topic = Topic::derive(&doc.to_hex(), None);
        let frame = WireFrame {
            doc,
            body: WireBody::CrdtUpdate(update.encode()?),
        };
        let report = self.mesh.broadcast(topic.0, &frame.encode()).await;
        if !report.failed.is_empty() {
            tracing::debug!(?doc, failed = report.failed.len(), "broadcast had partial failures");
        }
        Ok(())
    }

    /// Registers a channel that receives every remote update applied to
    /// `doc` from now on.
    pub async fn subscribe(&self, doc: DocId) -> mpsc::UnboundedReceiver<Update> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.entry(doc).or_default().push(tx);
        rx
    }

    /// Runs `read` against the document's current materialized view.
    pub async fn view<R>(&self, doc: DocId, read: impl FnOnce(View<'_>) -> R) -> Result<R, CrdtError> {
        self.engine.view(doc, read).await
    }

    /// Applies an inbound update from the mesh and fans it out to every
    /// local subscriber of that document. Called by the supervisor's
    /// receive loop, never directly by the editor.
    pub async fn deliver_remote(&self, doc: DocId, update: Update) -> Result<(), CrdtError> {
        self.engine.apply_remote(doc, &update).await?;
        if let Some(subs) = self.subscribers.read().await.get(&doc) {
            for tx in subs {
                let _ = tx.send(update.clone());
            }
        }
        Ok(())
    }

    /// Sends a sync handshake to `to`, asking for everything newer than
    /// this document's current state vector. Used on partition heal.
    pub async fn request_sync(&self, doc: DocId, to: PeerId) -> Result<(), SdkError> {
        let state_vector = self.engine.state_vector(doc).await?;
        let frame = WireFrame {
            doc,
            body: WireBody::SyncRequest { state_vector },
        };
        self.mesh
            .send(to, &frame.encode())
            .await
            .map_err(|e| SdkError::Broadcast(vec![(to, e)]))
    }

    /// Answers a peer's sync request with the diff since their state
    /// vector. A no-op diff is not sent.
    pub async fn respond_sync(&self, doc: DocId, to: PeerId, remote_state_vector: &[u8]) -> Result<(), SdkError> {
        let diff = self.engine.diff_since(doc, remote_state_vector).await?;
        if diff.is_empty() {
            return Ok(());
        }
        let frame = WireFrame {
            doc,
            body: WireBody::SyncResponse {
                update: diff.encode()?,
            },
        };
        self.mesh
            .send(to, &frame.encode())
            .await
            .map_err(|e| SdkError::Broadcast(vec![(to, e)]))
    }
}
