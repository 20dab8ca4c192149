//! The relay transport client: connects to a server-hosted relay (embedded
//! or standalone, see `nahma-relay`) that forwards binary frames between
//! authenticated peers when WebRTC is unavailable.

use crate::error::MeshError;
use crate::frame::{InboundFrame, TransportTag};
use crate::transport::Transport;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nahma_model::PeerId;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

/// One relay frame: a recipient peer and the opaque bytes to forward. The
/// relay server does not interpret `bytes`; it authenticates the sender
/// out-of-band (the connection itself is established after an
/// authenticator handshake) and forwards by `to`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RelayFrame {
    to: PeerId,
    from: PeerId,
    bytes: Vec<u8>,
}

/// A client connection to a single relay server.
pub struct RelayTransport {
    url: url::Url,
    local_peer: PeerId,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connected: AtomicBool,
}

impl RelayTransport {
    pub fn new(url: url::Url, local_peer: PeerId) -> Self {
        Self {
            url,
            local_peer,
            outbound: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Drives the connection, forwarding decoded frames to `inbound`.
    /// Reconnection on drop is the caller's responsibility (the mesh
    /// treats a closed relay connection the same as "relay unavailable"
    /// and falls back, rather than retrying aggressively the way
    /// signaling does).
    pub async fn run(&self, inbound: mpsc::UnboundedSender<InboundFrame>) -> Result<(), MeshError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| MeshError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.outbound.lock().await = Some(tx);
        self.connected.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                outgoing = rx.recv() => match outgoing {
                    Some(msg) => write.send(msg).await.map_err(|e| MeshError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?,
                    None => break,
                },
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Ok(frame) = serde_json::from_slice::<RelayFrame>(&bytes) {
                            let _ = inbound.send(InboundFrame {
                                peer: frame.from,
                                transport: TransportTag::Relay,
                                bytes: frame.bytes,
                            });
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(MeshError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))),
                    None => break,
                }
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.lock().await = None;
        Ok(())
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn tag(&self) -> TransportTag {
        TransportTag::Relay
    }

    async fn is_reachable(&self, _peer: PeerId) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, to: PeerId, frame: &[u8]) -> Result<(), MeshError> {
        let guard = self.outbound.lock().await;
        let Some(tx) = guard.as_ref() else {
            return Err(MeshError::NoRoute);
        };
        let payload = RelayFrame {
            to,
            from: self.local_peer,
            bytes: frame.to_vec(),
        };
        let bytes = serde_json::to_vec(&payload).map_err(|e| MeshError::MalformedFrame(e.to_string()))?;
        tx.send(Message::Binary(bytes))
            .map_err(|_| MeshError::NoRoute)
    }
}
