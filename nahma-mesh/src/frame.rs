//! The finite signaling message-type set and the inbound
//! frame envelope the mesh delivers to its single subscriber.

use nahma_model::PeerId;
use serde::{Deserialize, Serialize};

/// Which transport carried an inbound frame, reported alongside it so the
/// caller can reason about connection health without touching the mesh's
/// internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportTag {
    WebRtc,
    SignalingRelay,
    Relay,
    /// Store-and-forward via an intermediate peer already connected to
    /// both ends.
    Forward,
}

/// The finite set of signaling control-frame types a signaling server
/// accepts and emits. `Yjs` carries an opaque CRDT update
/// blob; the signaling layer does not interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    Identity { peer: PeerId },
    Announce { topic: [u8; 32], peer: PeerId },
    Offer { to: PeerId, sdp: String },
    Answer { to: PeerId, sdp: String },
    Candidate { to: PeerId, candidate: String },
    Relay { to: PeerId, from: PeerId, bytes: Vec<u8> },
    SyncRequest { topic: [u8; 32], state_vector: Vec<u8> },
    SyncResponse { topic: [u8; 32], update: Vec<u8> },
    YjsUpdate { topic: [u8; 32], update: Vec<u8> },
    Awareness { topic: [u8; 32], state: Vec<u8> },
}

/// One frame received from a peer, tagged with the path it arrived on.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub peer: PeerId,
    pub transport: TransportTag,
    pub bytes: Vec<u8>,
}

/// What a transport actually carries on the wire, one layer below the
/// application's [`InboundFrame`]: either a frame addressed to us
/// directly, or one we're asked to relay on to its real recipient
/// because we're the only transport both ends currently share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MeshEnvelope {
    Direct(Vec<u8>),
    Forward {
        from: PeerId,
        to: PeerId,
        bytes: Vec<u8>,
    },
}
