//! The `Transport` abstraction: one implementation per variant
//! (signaling, WebRTC, relay), each an explicit stream of inbound frames
//! rather than a callback/emitter.

use crate::error::MeshError;
use crate::frame::TransportTag;
use async_trait::async_trait;
use nahma_model::PeerId;

/// A single path by which frames can reach peers. Implementations own
/// their own reconnection and backoff; the mesh only calls `send` and
/// reads inbound frames from the shared channel each transport was built
/// with.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which variant this is, for routing preference and observability.
    fn tag(&self) -> TransportTag;

    /// True if this transport currently has a usable path to `peer`.
    async fn is_reachable(&self, peer: PeerId) -> bool;

    /// Sends a raw frame to `peer` over this transport.
    async fn send(&self, peer: PeerId, frame: &[u8]) -> Result<(), MeshError>;
}
