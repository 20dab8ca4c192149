//! The signaling transport: a persistent outbound WebSocket connection to
//! a signaling server, used for WebRTC offer/answer/candidate exchange and
//! as a low-volume relay path. Reconnects with jittered exponential
//! backoff, base 500ms, max 30s.

use crate::error::MeshError;
use crate::frame::{InboundFrame, SignalingMessage, TransportTag};
use crate::transport::Transport;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nahma_model::PeerId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connects to a signaling server and exposes it as a [`Transport`].
/// Frames are addressed to a peer by wrapping them in
/// [`SignalingMessage::Relay`]; the server is responsible for routing by
/// the `to` field.
pub struct SignalingTransport {
    url: url::Url,
    local_peer: PeerId,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connected: AtomicBool,
}

impl SignalingTransport {
    /// Builds a transport that will connect to `url` once [`Self::run`] is
    /// spawned, identifying itself as `local_peer`.
    pub fn new(url: url::Url, local_peer: PeerId) -> Self {
        Self {
            url,
            local_peer,
            outbound: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Drives the reconnect loop, forwarding decoded inbound frames to
    /// `inbound` until `self` is dropped. Intended to be spawned as a
    /// background task by the mesh.
    pub async fn run(&self, inbound: mpsc::UnboundedSender<InboundFrame>) {
        let mut backoff = BASE_BACKOFF;
        loop {
            match self.connect_once(&inbound).await {
                Ok(()) => backoff = BASE_BACKOFF,
                Err(err) => {
                    tracing::warn!(%err, "signaling connection lost, backing off");
                }
            }
            self.connected.store(false, Ordering::SeqCst);
            let jitter = Duration::from_millis(rand::random::<u64>() % 250);
            tokio::time::sleep(backoff + jitter).await;
            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
        }
    }

    async fn connect_once(
        &self,
        inbound: &mpsc::UnboundedSender<InboundFrame>,
    ) -> Result<(), MeshError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| MeshError::Signaling(e.to_string()))?;
        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.outbound.lock().await = Some(tx);
        self.connected.store(true, Ordering::SeqCst);

        let hello = SignalingMessage::Identity {
            peer: self.local_peer,
        };
        let text = serde_json::to_string(&hello).map_err(|e| MeshError::Signaling(e.to_string()))?;
        write
            .send(Message::Text(text))
            .await
            .map_err(|e| MeshError::Signaling(e.to_string()))?;

        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(msg) => write.send(msg).await.map_err(|e| MeshError::Signaling(e.to_string()))?,
                        None => break,
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(frame) = decode_inbound(&text, self.local_peer) {
                                let _ = inbound.send(frame);
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(MeshError::Signaling(err.to_string())),
                        None => break,
                    }
                }
            }
        }
        *self.outbound.lock().await = None;
        Ok(())
    }
}

fn decode_inbound(text: &str, _local_peer: PeerId) -> Option<InboundFrame> {
    let message: SignalingMessage = serde_json::from_str(text).ok()?;
    match message {
        SignalingMessage::Relay { to: _, from, bytes } => {
            // The server stamps `from` from the authenticated connection
            // the message arrived on, not from anything inside `bytes`.
            Some(InboundFrame {
                peer: from,
                transport: TransportTag::SignalingRelay,
                bytes,
            })
        }
        _ => None,
    }
}

#[async_trait]
impl Transport for SignalingTransport {
    fn tag(&self) -> TransportTag {
        TransportTag::SignalingRelay
    }

    async fn is_reachable(&self, _peer: PeerId) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, to: PeerId, frame: &[u8]) -> Result<(), MeshError> {
        let guard = self.outbound.lock().await;
        let Some(tx) = guard.as_ref() else {
            return Err(MeshError::Signaling("not connected".to_owned()));
        };
        let message = SignalingMessage::Relay {
            to,
            from: self.local_peer,
            bytes: frame.to_vec(),
        };
        let text = serde_json::to_string(&message).map_err(|e| MeshError::Signaling(e.to_string()))?;
        tx.send(Message::Text(text))
            .map_err(|_| MeshError::Signaling("send on closed connection".to_owned()))
    }
}
