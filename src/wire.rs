//! The envelope carried by every mesh frame. `InboundFrame` tells a
//! receiver which transport and peer a frame arrived from but not which
//! document it belongs to, so the document id travels inside the
//! envelope instead.

use crate::supervisor::AnnouncePayload;
use nahma_auth::SignedMessage;
use nahma_model::DocId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed wire frame: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    pub doc: DocId,
    pub body: WireBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireBody {
    /// An encoded `nahma_crdt::Update`, applied via `apply_remote`.
    CrdtUpdate(Vec<u8>),
    /// An encoded `nahma_awareness::AwarenessFrame`.
    Awareness(Vec<u8>),
    /// A request for everything newer than the sender's state vector, sent
    /// on rejoining a topic after a partition heals.
    SyncRequest { state_vector: Vec<u8> },
    /// The answer to a `SyncRequest`: an encoded `Update`.
    SyncResponse { update: Vec<u8> },
    /// A signed topic-join announcement, propagated peer-to-peer so every
    /// already-connected member learns of a newcomer within a bounded
    /// number of hops. `hops_remaining` is relay metadata, not part of
    /// the signed payload, and is decremented on each re-broadcast.
    Announce {
        signed: SignedMessage<AnnouncePayload>,
        hops_remaining: u32,
    },
}

impl WireFrame {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("wire frame encodes infallibly")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(bytes).map_err(|e| WireError::Malformed(e.to_string()))
    }
}
