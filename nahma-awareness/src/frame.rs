//! The wire encoding for one awareness broadcast.

use crate::error::AwarenessError;
use nahma_model::PeerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwarenessFrame {
    pub peer: PeerId,
    pub clock: u64,
    /// `None` is a tombstone: the peer removed its local presence.
    pub state: Option<Vec<u8>>,
}

impl AwarenessFrame {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("awareness frame always serializes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AwarenessError> {
        bincode::deserialize(bytes).map_err(|e| AwarenessError::MalformedFrame(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let frame = AwarenessFrame {
            peer: PeerId::new([4; 32]),
            clock: 7,
            state: Some(b"cursor:12".to_vec()),
        };
        let decoded = AwarenessFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.clock, 7);
        assert_eq!(decoded.state, Some(b"cursor:12".to_vec()));
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        assert!(AwarenessFrame::decode(&[1, 2, 3]).is_err());
    }
}
