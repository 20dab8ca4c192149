//! The mesh: composes the available transports behind one
//! `send`/`broadcast`/`subscribe` surface, picking the
//! best available path per peer in preference order `WebRTC >
//! Signaling-relay > Relay > forward via intermediate peer`.

use crate::error::MeshError;
use crate::frame::{InboundFrame, MeshEnvelope, TransportTag};
use crate::router::{DiscoveryBudget, Registry};
use crate::transport::Transport;
use nahma_model::PeerId;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// An aggregate outcome of a `broadcast`: per-peer failures are
/// independent and reported together rather than aborting the whole
/// operation.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub sent: Vec<PeerId>,
    pub failed: Vec<(PeerId, MeshError)>,
}

/// Composes every configured transport and the peer registry into the
/// single send/receive surface the replication and awareness layers use.
/// Owns a background task that unwraps [`MeshEnvelope`]s off the raw
/// inbound stream, delivering `Direct` frames to the subscriber and
/// re-sending `Forward` frames not addressed to us onward — the fourth
/// fallback tier, "forward via intermediate peer", documented above.
pub struct Mesh {
    transports: Vec<Arc<dyn Transport>>,
    registry: RwLock<Registry>,
    local_peer: PeerId,
    publish_rx: RwLock<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
}

impl Mesh {
    /// Builds a mesh over the given transports, in preference order
    /// (earlier entries are tried first when more than one claims
    /// reachability — callers should list WebRTC before signaling-relay
    /// before relay), and spawns its envelope-unwrapping dispatch loop.
    pub fn new(
        transports: Vec<Arc<dyn Transport>>,
        local_peer: PeerId,
        inbound_rx: mpsc::UnboundedReceiver<InboundFrame>,
    ) -> Arc<Self> {
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let mesh = Arc::new(Self {
            transports,
            registry: RwLock::new(Registry::new()),
            local_peer,
            publish_rx: RwLock::new(Some(publish_rx)),
        });
        tokio::spawn(mesh.clone().run_dispatch(inbound_rx, publish_tx));
        mesh
    }

    async fn run_dispatch(
        self: Arc<Self>,
        mut inbound_rx: mpsc::UnboundedReceiver<InboundFrame>,
        publish_tx: mpsc::UnboundedSender<InboundFrame>,
    ) {
        while let Some(frame) = inbound_rx.recv().await {
            let Ok(envelope) = bincode::deserialize::<MeshEnvelope>(&frame.bytes) else {
                continue;
            };
            match envelope {
                MeshEnvelope::Direct(bytes) => {
                    let _ = publish_tx.send(InboundFrame {
                        peer: frame.peer,
                        transport: frame.transport,
                        bytes,
                    });
                }
                MeshEnvelope::Forward { from, to, bytes } if to == self.local_peer => {
                    let _ = publish_tx.send(InboundFrame {
                        peer: from,
                        transport: TransportTag::Forward,
                        bytes,
                    });
                }
                MeshEnvelope::Forward { from, to, bytes } => {
                    let _ = self.relay_forward(from, to, &bytes).await;
                }
            }
        }
    }

    /// Re-sends a frame addressed to someone else, once, over whichever
    /// transport currently reaches them. Silently dropped if none does —
    /// a two-hop relay chain is not retried.
    async fn relay_forward(&self, from: PeerId, to: PeerId, bytes: &[u8]) -> Result<(), MeshError> {
        let envelope = MeshEnvelope::Forward {
            from,
            to,
            bytes: bytes.to_vec(),
        };
        let wrapped = bincode::serialize(&envelope).map_err(|e| MeshError::MalformedFrame(e.to_string()))?;
        for transport in &self.transports {
            if transport.is_reachable(to).await {
                return transport.send(to, &wrapped).await;
            }
        }
        Err(MeshError::NoRoute)
    }

    /// Read access to the peer registry, for the supervisor's
    /// partition-heal and announce logic.
    pub fn registry(&self) -> &RwLock<Registry> {
        &self.registry
    }

    /// Sends `frame` to `peer` over the first reachable transport in
    /// preference order. If none reaches `peer` directly, tries
    /// forwarding it through a peer the registry already knows that we
    /// in turn reach directly. Fails with `NoRoute` if nothing works.
    pub async fn send(&self, peer: PeerId, frame: &[u8]) -> Result<(), MeshError> {
        let envelope = MeshEnvelope::Direct(frame.to_vec());
        let wrapped = bincode::serialize(&envelope).map_err(|e| MeshError::MalformedFrame(e.to_string()))?;
        for transport in &self.transports {
            if transport.is_reachable(peer).await {
                return transport.send(peer, &wrapped).await;
            }
        }
        self.send_via_intermediate(peer, frame).await
    }

    async fn send_via_intermediate(&self, peer: PeerId, frame: &[u8]) -> Result<(), MeshError> {
        let candidates = {
            let registry = self.registry.read().await;
            let known: Vec<PeerId> = registry.known_peers().into_iter().filter(|p| *p != peer).collect();
            registry.plan_next_hop(&known, &HashSet::new(), &DiscoveryBudget::default(), 1)
        };
        let envelope = MeshEnvelope::Forward {
            from: self.local_peer,
            to: peer,
            bytes: frame.to_vec(),
        };
        let wrapped = bincode::serialize(&envelope).map_err(|e| MeshError::MalformedFrame(e.to_string()))?;
        for intermediate in candidates {
            for transport in &self.transports {
                if transport.is_reachable(intermediate).await
                    && transport.send(intermediate, &wrapped).await.is_ok()
                {
                    return Ok(());
                }
            }
        }
        Err(MeshError::NoRoute)
    }

    /// Sends `frame` to every peer registered on `topic`. Per-peer
    /// failures do not abort the broadcast.
    pub async fn broadcast(&self, topic: [u8; 32], frame: &[u8]) -> BroadcastReport {
        let peers = self.registry.read().await.topic_peers(topic);
        let mut report = BroadcastReport::default();
        for peer in peers {
            match self.send(peer, frame).await {
                Ok(()) => report.sent.push(peer),
                Err(err) => report.failed.push((peer, err)),
            }
        }
        report
    }

    /// Takes ownership of the published (envelope-unwrapped) inbound
    /// frame stream. May only be called once; a second call returns
    /// `None`.
    pub async fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<InboundFrame>> {
        self.publish_rx.write().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TransportTag;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeTransport {
        tag: TransportTag,
        reachable: AtomicBool,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn tag(&self) -> TransportTag {
            self.tag
        }

        async fn is_reachable(&self, _peer: PeerId) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }

        async fn send(&self, _peer: PeerId, _frame: &[u8]) -> Result<(), MeshError> {
            Ok(())
        }
    }

    fn peer(n: u8) -> PeerId {
        PeerId::new([n; 32])
    }

    #[tokio::test]
    async fn send_fails_with_no_route_when_nothing_is_reachable() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mesh = Mesh::new(vec![], peer(0), rx);
        let err = mesh.send(peer(1), b"hi").await.unwrap_err();
        assert!(matches!(err, MeshError::NoRoute));
    }

    #[tokio::test]
    async fn send_prefers_the_first_reachable_transport_in_order() {
        let webrtc = Arc::new(FakeTransport {
            tag: TransportTag::WebRtc,
            reachable: AtomicBool::new(false),
        });
        let relay = Arc::new(FakeTransport {
            tag: TransportTag::Relay,
            reachable: AtomicBool::new(true),
        });
        let (_tx, rx) = mpsc::unbounded_channel();
        let mesh = Mesh::new(vec![webrtc, relay], peer(0), rx);
        assert!(mesh.send(peer(1), b"hi").await.is_ok());
    }

    #[tokio::test]
    async fn subscribe_can_only_be_taken_once() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mesh = Mesh::new(vec![], peer(0), rx);
        assert!(mesh.subscribe().await.is_some());
        assert!(mesh.subscribe().await.is_none());
    }

    /// Reachable for every peer except one, so a send to that one peer
    /// fails direct and falls through to the forward path.
    struct ReachesEveryoneBut(PeerId);

    #[async_trait]
    impl Transport for ReachesEveryoneBut {
        fn tag(&self) -> TransportTag {
            TransportTag::WebRtc
        }
        async fn is_reachable(&self, peer: PeerId) -> bool {
            peer != self.0
        }
        async fn send(&self, _peer: PeerId, _frame: &[u8]) -> Result<(), MeshError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_falls_back_to_forwarding_through_a_known_intermediate_peer() {
        let target = peer(1);
        let transport = Arc::new(ReachesEveryoneBut(target));
        let (_tx, rx) = mpsc::unbounded_channel();
        let mesh = Mesh::new(vec![transport], peer(0), rx);
        mesh.registry().write().await.observe(peer(2), [1u8; 32], 0);

        assert!(mesh.send(target, b"hi").await.is_ok());
    }

    #[tokio::test]
    async fn send_fails_when_no_intermediate_peer_is_known_either() {
        let target = peer(1);
        let transport = Arc::new(ReachesEveryoneBut(target));
        let (_tx, rx) = mpsc::unbounded_channel();
        let mesh = Mesh::new(vec![transport], peer(0), rx);

        let err = mesh.send(target, b"hi").await.unwrap_err();
        assert!(matches!(err, MeshError::NoRoute));
    }
}
