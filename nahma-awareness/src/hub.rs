//! Owns one [`AwarenessState`] per open document and drives the periodic
//! 5-second resend and 30-second eviction sweep.

use crate::error::AwarenessError;
use crate::frame::AwarenessFrame;
use crate::state::AwarenessState;
use nahma_model::{DocId, PeerId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex, RwLock};

const RESEND_INTERVAL: Duration = Duration::from_secs(5);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Every outbound awareness broadcast the hub produces: which document, and
/// the encoded frame to hand to the mesh.
pub type OutboundAwareness = (DocId, Vec<u8>);

/// The awareness channel's entry point: one per running peer, shared across
/// every open document.
pub struct AwarenessHub {
    local: PeerId,
    documents: RwLock<HashMap<DocId, Arc<Mutex<AwarenessState>>>>,
    outbound: mpsc::UnboundedSender<OutboundAwareness>,
}

impl AwarenessHub {
    /// Builds a hub for `local`, returning the receiver the supervisor drains
    /// to forward frames onto the mesh.
    pub fn new(local: PeerId) -> (Self, mpsc::UnboundedReceiver<OutboundAwareness>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                local,
                documents: RwLock::new(HashMap::new()),
                outbound,
            },
            rx,
        )
    }

    /// Starts tracking presence for `doc`. Idempotent.
    pub async fn open_document(&self, doc: DocId) {
        self.documents
            .write()
            .await
            .entry(doc)
            .or_insert_with(|| Arc::new(Mutex::new(AwarenessState::new(self.local))));
    }

    /// Stops tracking presence for `doc`. The map is never persisted, so
    /// this simply drops the in-memory state.
    pub async fn close_document(&self, doc: DocId) {
        self.documents.write().await.remove(&doc);
    }

    /// Sets the local presence for `doc` (or tombstones it with `None`) and
    /// queues the resulting frame for broadcast.
    pub async fn set_local(&self, doc: DocId, state: Option<Vec<u8>>) -> Result<(), AwarenessError> {
        let handle = self.handle(doc).await?;
        let frame = handle.lock().await.set_local(state, now_ms());
        self.queue(doc, &frame);
        Ok(())
    }

    /// Applies an inbound awareness frame. Returns true if it changed the
    /// local view of that peer's presence.
    pub async fn apply_remote(&self, doc: DocId, bytes: &[u8]) -> Result<bool, AwarenessError> {
        let frame = AwarenessFrame::decode(bytes)?;
        let handle = self.handle(doc).await?;
        Ok(handle.lock().await.apply_remote(&frame, now_ms()))
    }

    /// Every peer currently considered online for `doc`, with their last
    /// broadcast state.
    pub async fn view(&self, doc: DocId) -> Result<Vec<(PeerId, Vec<u8>)>, AwarenessError> {
        let handle = self.handle(doc).await?;
        Ok(handle.lock().await.view())
    }

    async fn handle(&self, doc: DocId) -> Result<Arc<Mutex<AwarenessState>>, AwarenessError> {
        self.documents
            .read()
            .await
            .get(&doc)
            .cloned()
            .ok_or(AwarenessError::NotOpen)
    }

    fn queue(&self, doc: DocId, frame: &AwarenessFrame) {
        let _ = self.outbound.send((doc, frame.encode()));
    }

    /// Runs forever: every 5 seconds, resends the local heartbeat for every
    /// open document and evicts peers silent for more than 30 seconds.
    /// Intended to be spawned once by the supervisor for the process
    /// lifetime.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(RESEND_INTERVAL);
        loop {
            ticker.tick().await;
            let snapshot: Vec<(DocId, Arc<Mutex<AwarenessState>>)> = self
                .documents
                .read()
                .await
                .iter()
                .map(|(doc, state)| (*doc, state.clone()))
                .collect();
            for (doc, state) in snapshot {
                let mut state = state.lock().await;
                let evicted = state.evict_offline(now_ms());
                for peer in evicted {
                    tracing::debug!(?doc, ?peer, "awareness entry went offline");
                }
                let heartbeat = state.local_heartbeat();
                drop(state);
                self.queue(doc, &heartbeat);
            }
        }
    }
}
