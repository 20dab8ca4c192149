//! Connection bookkeeping for the relay/signaling server: which peers are
//! connected, which topics they claim, and how to forward a frame to
//! either.

use crate::error::RelayError;
use nahma_mesh::SignalingMessage;
use nahma_model::PeerId;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

/// Shared server state. One instance per process, cloned behind an `Arc` into
/// every connection handler.
pub struct Hub {
    max_connections: usize,
    peers: RwLock<HashMap<PeerId, mpsc::UnboundedSender<Message>>>,
    topics: RwLock<HashMap<[u8; 32], HashSet<PeerId>>>,
}

impl Hub {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            peers: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Registers a freshly identified connection. Sheds the connection with
    /// [`RelayError::Busy`] once `max_connections` is reached,
    /// `7`'s resource-exhaustion policy: shed new connections, never drop
    /// existing ones.
    pub async fn register(
        &self,
        peer: PeerId,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Result<(), RelayError> {
        let mut peers = self.peers.write().await;
        if peers.len() >= self.max_connections {
            return Err(RelayError::Busy);
        }
        peers.insert(peer, sender);
        Ok(())
    }

    pub async fn unregister(&self, peer: &PeerId) {
        self.peers.write().await.remove(peer);
        let mut topics = self.topics.write().await;
        for members in topics.values_mut() {
            members.remove(peer);
        }
        topics.retain(|_, members| !members.is_empty());
    }

    /// Dispatches one decoded message from `from`, forwarding by peer
    /// address or fanning out to topic members as the message type
    /// dictates.
    pub async fn dispatch(&self, from: PeerId, message: SignalingMessage) {
        match message {
            SignalingMessage::Identity { .. } => {}
            SignalingMessage::Announce { topic, peer } => {
                self.topics.write().await.entry(topic).or_default().insert(peer);
                self.broadcast_topic(topic, from, &SignalingMessage::Announce { topic, peer })
                    .await;
            }
            SignalingMessage::Offer { to, sdp } => {
                self.send_to(to, &SignalingMessage::Offer { to, sdp }).await;
            }
            SignalingMessage::Answer { to, sdp } => {
                self.send_to(to, &SignalingMessage::Answer { to, sdp }).await;
            }
            SignalingMessage::Candidate { to, candidate } => {
                self.send_to(to, &SignalingMessage::Candidate { to, candidate }).await;
            }
            SignalingMessage::Relay { to, bytes, .. } => {
                self.send_to(to, &SignalingMessage::Relay { to, from, bytes }).await;
            }
            SignalingMessage::SyncRequest { topic, state_vector } => {
                self.broadcast_topic(
                    topic,
                    from,
                    &SignalingMessage::SyncRequest { topic, state_vector },
                )
                .await;
            }
            SignalingMessage::SyncResponse { topic, update } => {
                self.broadcast_topic(topic, from, &SignalingMessage::SyncResponse { topic, update })
                    .await;
            }
            SignalingMessage::YjsUpdate { topic, update } => {
                self.broadcast_topic(topic, from, &SignalingMessage::YjsUpdate { topic, update })
                    .await;
            }
            SignalingMessage::Awareness { topic, state } => {
                self.broadcast_topic(topic, from, &SignalingMessage::Awareness { topic, state })
                    .await;
            }
        }
    }

    async fn send_to(&self, to: PeerId, message: &SignalingMessage) {
        let Ok(text) = serde_json::to_string(message) else {
            return;
        };
        if let Some(sender) = self.peers.read().await.get(&to) {
            let _ = sender.send(Message::text(text));
        }
    }

    async fn broadcast_topic(&self, topic: [u8; 32], from: PeerId, message: &SignalingMessage) {
        let Ok(text) = serde_json::to_string(message) else {
            return;
        };
        let members = self.topics.read().await.get(&topic).cloned().unwrap_or_default();
        let peers = self.peers.read().await;
        for member in members {
            if member == from {
                continue;
            }
            if let Some(sender) = peers.get(&member) {
                let _ = sender.send(Message::text(text.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::new([n; 32])
    }

    #[tokio::test]
    async fn registration_is_shed_past_the_connection_limit() {
        let hub = Hub::new(1);
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        hub.register(peer(1), tx1).await.unwrap();
        let err = hub.register(peer(2), tx2).await.unwrap_err();
        assert!(matches!(err, RelayError::Busy));
    }

    #[tokio::test]
    async fn announce_fans_out_to_other_topic_members() {
        let hub = Hub::new(10);
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.register(peer(1), tx1).await.unwrap();
        hub.register(peer(2), tx2).await.unwrap();

        let topic = [7u8; 32];
        hub.dispatch(peer(2), SignalingMessage::Announce { topic, peer: peer(2) })
            .await;
        hub.dispatch(peer(1), SignalingMessage::Announce { topic, peer: peer(1) })
            .await;

        let received = rx2.try_recv().unwrap();
        let decoded: SignalingMessage = serde_json::from_str(received.to_str().unwrap()).unwrap();
        assert!(matches!(decoded, SignalingMessage::Announce { peer, .. } if peer == peer(1)));
    }

    #[tokio::test]
    async fn unregistering_drops_empty_topics() {
        let hub = Hub::new(10);
        let (tx1, _rx1) = mpsc::unbounded_channel();
        hub.register(peer(1), tx1).await.unwrap();
        let topic = [9u8; 32];
        hub.dispatch(peer(1), SignalingMessage::Announce { topic, peer: peer(1) })
            .await;
        hub.unregister(&peer(1)).await;
        assert!(hub.topics.read().await.is_empty());
    }
}
