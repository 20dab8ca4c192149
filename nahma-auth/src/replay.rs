//! Replay guard: rejects messages outside a ±5 minute timestamp window or
//! whose `(peer, nonce)` pair has already been seen within the last 10
//! minutes.

use crate::error::AuthError;
use crate::message::{Nonce, SignedMessage};
use nahma_model::PeerId;
use std::collections::HashMap;

const WINDOW_MS: u64 = 5 * 60 * 1000;
const NONCE_TTL_MS: u64 = 10 * 60 * 1000;

/// Tracks recently-seen `(peer, nonce)` pairs to reject replays. Callers
/// drive the clock explicitly (`now_ms`) so this is deterministic to test.
#[derive(Default)]
pub struct ReplayGuard {
    seen: HashMap<(PeerId, Nonce), u64>,
}

impl ReplayGuard {
    /// A fresh, empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `message` against the timestamp window and nonce cache
    /// relative to `now_ms`, and records its nonce on success. Does not
    /// check the signature itself; callers run [`crate::message::verify`]
    /// first.
    pub fn check<T>(&mut self, message: &SignedMessage<T>, now_ms: u64) -> Result<(), AuthError> {
        self.evict(now_ms);
        let delta = now_ms.abs_diff(message.timestamp_ms);
        if delta > WINDOW_MS {
            return Err(AuthError::Expired {
                timestamp_ms: message.timestamp_ms,
            });
        }
        let key = (message.peer, message.nonce);
        if self.seen.contains_key(&key) {
            return Err(AuthError::ReplayDetected);
        }
        self.seen.insert(key, now_ms);
        Ok(())
    }

    fn evict(&mut self, now_ms: u64) {
        self.seen
            .retain(|_, seen_at| now_ms.saturating_sub(*seen_at) < NONCE_TTL_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::sign;
    use nahma_model::Keypair;

    fn signed(now_ms: u64) -> SignedMessage<&'static str> {
        let keypair = Keypair::generate();
        let peer = keypair.peer_id();
        sign(&keypair, peer, "hi", now_ms).unwrap()
    }

    #[test]
    fn accepts_a_fresh_message_within_the_window() {
        let mut guard = ReplayGuard::new();
        let message = signed(1_000_000);
        assert!(guard.check(&message, 1_000_000).is_ok());
    }

    #[test]
    fn rejects_a_message_outside_the_five_minute_window() {
        let mut guard = ReplayGuard::new();
        let message = signed(0);
        let err = guard.check(&message, WINDOW_MS + 1).unwrap_err();
        assert!(matches!(err, AuthError::Expired { .. }));
    }

    #[test]
    fn rejects_a_replayed_nonce_within_ten_minutes() {
        let mut guard = ReplayGuard::new();
        let message = signed(1_000_000);
        guard.check(&message, 1_000_000).unwrap();
        let err = guard.check(&message, 1_000_001).unwrap_err();
        assert!(matches!(err, AuthError::ReplayDetected));
    }

    #[test]
    fn admits_the_same_nonce_again_once_it_has_aged_out() {
        let mut guard = ReplayGuard::new();
        let mut message = signed(1_000_000);
        guard.check(&message, 1_000_000).unwrap();
        // Same (peer, nonce) pair, but the prior sighting has aged out of
        // the 10-minute cache by the time it is seen again.
        let later = 1_000_000 + NONCE_TTL_MS + 1;
        message.timestamp_ms = later;
        assert!(guard.check(&message, later).is_ok());
    }
}
