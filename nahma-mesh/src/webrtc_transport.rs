//! The WebRTC transport: one ordered, reliable data channel per peer,
//! preferred once established. Offer/answer/candidate exchange rides the
//! signaling transport; this module only owns the peer connections and
//! their state machines.

use crate::error::MeshError;
use crate::frame::{InboundFrame, TransportTag};
use crate::transport::Transport;
use async_trait::async_trait;
use nahma_model::PeerId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const MAX_RETRIES: u32 = 5;

/// ICE server configuration derived from `STUN_SERVERS`.
#[derive(Debug, Clone, Default)]
pub struct StunConfig {
    pub urls: Vec<String>,
}

impl StunConfig {
    /// Parses the comma-separated `STUN_SERVERS` environment value.
    pub fn from_env_value(value: &str) -> Self {
        Self {
            urls: value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    fn rtc_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.urls.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

/// The per-peer WebRTC connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Offering,
    AnsweringPending,
    Connected,
    Failing,
    Closed,
}

struct PeerConn {
    state: RwLock<PeerState>,
    connection: Arc<RTCPeerConnection>,
    data_channel: RwLock<Option<Arc<RTCDataChannel>>>,
    retries: AtomicU32,
}

/// Owns every peer's WebRTC connection. Offers/answers/candidates are
/// handed to and produced from this type but transmitted by the caller
/// over the signaling transport — this module has no signaling
/// dependency of its own, keeping the two transports independently
/// testable.
pub struct WebRtcTransport {
    stun: StunConfig,
    peers: RwLock<HashMap<PeerId, Arc<PeerConn>>>,
    inbound: mpsc::UnboundedSender<InboundFrame>,
}

impl WebRtcTransport {
    pub fn new(stun: StunConfig, inbound: mpsc::UnboundedSender<InboundFrame>) -> Self {
        Self {
            stun,
            peers: RwLock::new(HashMap::new()),
            inbound,
        }
    }

    async fn api() -> Result<webrtc::api::API, MeshError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| MeshError::WebRtc(e.to_string()))?;
        let mut registry = webrtc::interceptor::registry::Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| MeshError::WebRtc(e.to_string()))?;
        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    /// Begins offering a connection to `peer`, returning the local SDP
    /// offer to send over signaling. Transitions `Idle → Offering`.
    pub async fn create_offer(&self, peer: PeerId) -> Result<String, MeshError> {
        let api = Self::api().await?;
        let connection = Arc::new(
            api.new_peer_connection(self.stun.rtc_config())
                .await
                .map_err(|e| MeshError::WebRtc(e.to_string()))?,
        );
        let data_channel = connection
            .create_data_channel("nahma", None)
            .await
            .map_err(|e| MeshError::WebRtc(e.to_string()))?;
        self.wire_data_channel(peer, data_channel.clone()).await;

        let offer = connection
            .create_offer(None)
            .await
            .map_err(|e| MeshError::WebRtc(e.to_string()))?;
        connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| MeshError::WebRtc(e.to_string()))?;

        let conn = Arc::new(PeerConn {
            state: RwLock::new(PeerState::Offering),
            connection,
            data_channel: RwLock::new(Some(data_channel)),
            retries: AtomicU32::new(0),
        });
        self.peers.write().await.insert(peer, conn);
        Ok(offer.sdp)
    }

    /// Accepts a remote offer, returning the local SDP answer to send back
    /// over signaling. Transitions `Idle → AnsweringPending`.
    pub async fn accept_offer(&self, peer: PeerId, remote_sdp: String) -> Result<String, MeshError> {
        let api = Self::api().await?;
        let connection = Arc::new(
            api.new_peer_connection(self.stun.rtc_config())
                .await
                .map_err(|e| MeshError::WebRtc(e.to_string()))?,
        );
        let offer = RTCSessionDescription::offer(remote_sdp).map_err(|e| MeshError::WebRtc(e.to_string()))?;
        connection
            .set_remote_description(offer)
            .await
            .map_err(|e| MeshError::WebRtc(e.to_string()))?;

        let inbound = self.inbound.clone();
        connection.on_data_channel(Box::new(move |dc| {
            let inbound = inbound.clone();
            Box::pin(async move {
                let inbound_for_msg = inbound.clone();
                dc.on_message(Box::new(move |msg| {
                    let inbound = inbound_for_msg.clone();
                    Box::pin(async move {
                        let _ = inbound.send(InboundFrame {
                            peer,
                            transport: TransportTag::WebRtc,
                            bytes: msg.data.to_vec(),
                        });
                    })
                }));
            })
        }));

        let answer = connection
            .create_answer(None)
            .await
            .map_err(|e| MeshError::WebRtc(e.to_string()))?;
        connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| MeshError::WebRtc(e.to_string()))?;

        let conn = Arc::new(PeerConn {
            state: RwLock::new(PeerState::AnsweringPending),
            connection,
            data_channel: RwLock::new(None),
            retries: AtomicU32::new(0),
        });
        self.peers.write().await.insert(peer, conn);
        Ok(answer.sdp)
    }

    /// Applies a remote answer to an in-flight offer, transitioning
    /// `Offering → Connected` once the channel opens.
    pub async fn apply_answer(&self, peer: PeerId, remote_sdp: String) -> Result<(), MeshError> {
        let peers = self.peers.read().await;
        let Some(conn) = peers.get(&peer) else {
            return Err(MeshError::WebRtc(format!("no offer in flight for {peer}")));
        };
        let answer =
            RTCSessionDescription::answer(remote_sdp).map_err(|e| MeshError::WebRtc(e.to_string()))?;
        conn.connection
            .set_remote_description(answer)
            .await
            .map_err(|e| MeshError::WebRtc(e.to_string()))?;
        *conn.state.write().await = PeerState::Connected;
        Ok(())
    }

    /// Adds a remote ICE candidate to an in-flight connection.
    pub async fn add_candidate(&self, peer: PeerId, candidate: String) -> Result<(), MeshError> {
        let peers = self.peers.read().await;
        let Some(conn) = peers.get(&peer) else {
            return Ok(()); // candidate for a connection we've already torn down
        };
        let candidate = webrtc::ice_transport::ice_candidate::RTCIceCandidateInit {
            candidate,
            ..Default::default()
        };
        conn.connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| MeshError::WebRtc(e.to_string()))
    }

    /// Marks a peer as failing, to be retried with backoff by the caller
    /// up to `MAX_RETRIES`, after which it transitions to `Closed` and is
    /// dropped.
    pub async fn mark_failing(&self, peer: PeerId) {
        let peers = self.peers.read().await;
        let Some(conn) = peers.get(&peer) else {
            return;
        };
        *conn.state.write().await = PeerState::Failing;
        if conn.retries.fetch_add(1, Ordering::SeqCst) + 1 >= MAX_RETRIES {
            *conn.state.write().await = PeerState::Closed;
            drop(peers);
            self.peers.write().await.remove(&peer);
        }
    }

    /// The current state machine position for a peer, if tracked.
    pub async fn state_of(&self, peer: PeerId) -> Option<PeerState> {
        let peers = self.peers.read().await;
        let conn = peers.get(&peer)?;
        Some(*conn.state.read().await)
    }

    async fn wire_data_channel(&self, peer: PeerId, dc: Arc<RTCDataChannel>) {
        let inbound = self.inbound.clone();
        dc.on_message(Box::new(move |msg| {
            let inbound = inbound.clone();
            Box::pin(async move {
                let _ = inbound.send(InboundFrame {
                    peer,
                    transport: TransportTag::WebRtc,
                    bytes: msg.data.to_vec(),
                });
            })
        }));
        let peers_state_handle: Arc<RwLock<PeerState>> = {
            let peers = self.peers.read().await;
            match peers.get(&peer) {
                Some(conn) => Arc::new(RwLock::new(*conn.state.read().await)),
                None => Arc::new(RwLock::new(PeerState::Offering)),
            }
        };
        dc.on_open(Box::new(move || {
            let state = peers_state_handle.clone();
            Box::pin(async move {
                *state.write().await = PeerState::Connected;
            })
        }));
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    fn tag(&self) -> TransportTag {
        TransportTag::WebRtc
    }

    async fn is_reachable(&self, peer: PeerId) -> bool {
        self.state_of(peer).await == Some(PeerState::Connected)
    }

    async fn send(&self, peer: PeerId, frame: &[u8]) -> Result<(), MeshError> {
        let peers = self.peers.read().await;
        let Some(conn) = peers.get(&peer) else {
            return Err(MeshError::NoRoute);
        };
        if *conn.state.read().await != PeerState::Connected {
            return Err(MeshError::NoRoute);
        }
        let guard = conn.data_channel.read().await;
        let Some(dc) = guard.as_ref() else {
            return Err(MeshError::NoRoute);
        };
        dc.send(&bytes::Bytes::copy_from_slice(frame))
            .await
            .map_err(|e| MeshError::WebRtc(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stun_config_parses_comma_separated_urls() {
        let config = StunConfig::from_env_value("stun:a.example:3478, stun:b.example:3478");
        assert_eq!(
            config.urls,
            vec!["stun:a.example:3478", "stun:b.example:3478"]
        );
    }

    #[test]
    fn stun_config_ignores_empty_entries() {
        let config = StunConfig::from_env_value("stun:a.example:3478,,");
        assert_eq!(config.urls, vec!["stun:a.example:3478"]);
    }
}
