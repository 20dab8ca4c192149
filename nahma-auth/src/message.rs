//! Signed control messages: identity announcements, join/leave, invites.
//! CRDT update payloads are not signed here — they ride inside a CRDT that
//! is itself encrypted at a higher layer.

use crate::canonical::canonicalize;
use crate::error::AuthError;
use nahma_model::{Keypair, PeerId};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// A 16-byte anti-replay nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce(pub [u8; 16]);

impl Nonce {
    /// Generates a fresh random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// An authenticated envelope: an arbitrary JSON-serializable payload plus
/// the replay-guard fields and a detached signature over the canonical
/// encoding of everything but the signature itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedMessage<T> {
    pub peer: PeerId,
    pub timestamp_ms: u64,
    pub nonce: Nonce,
    pub payload: T,
    /// Hex-encoded detached Ed25519 signature.
    pub signature: String,
}

#[derive(Serialize)]
struct Unsigned<'a, T> {
    peer: PeerId,
    timestamp_ms: u64,
    nonce: Nonce,
    payload: &'a T,
}

/// Signs `payload` as the given peer at `now_ms`, with a freshly generated
/// nonce.
pub fn sign<T: Serialize>(
    keypair: &Keypair,
    peer: PeerId,
    payload: T,
    now_ms: u64,
) -> Result<SignedMessage<T>, AuthError> {
    let nonce = Nonce::generate();
    let unsigned = Unsigned {
        peer,
        timestamp_ms: now_ms,
        nonce,
        payload: &payload,
    };
    let bytes = canonicalize(&unsigned)?;
    let signature = hex::encode(keypair.sign(&bytes));
    Ok(SignedMessage {
        peer,
        timestamp_ms: now_ms,
        nonce,
        payload,
        signature,
    })
}

/// Verifies a signed message's detached signature against its canonical
/// remainder, without consulting the replay guard.
pub fn verify<T: Serialize>(message: &SignedMessage<T>) -> Result<(), AuthError> {
    let unsigned = Unsigned {
        peer: message.peer,
        timestamp_ms: message.timestamp_ms,
        nonce: message.nonce,
        payload: &message.payload,
    };
    let bytes = canonicalize(&unsigned)?;
    let Ok(sig_bytes) = hex::decode(&message.signature) else {
        return Err(AuthError::InvalidSignature);
    };
    let Ok(sig): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return Err(AuthError::InvalidSignature);
    };
    if Keypair::verify(message.peer, &bytes, &sig) {
        Ok(())
    } else {
        Err(AuthError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn signed_message_round_trips_through_verify() {
        let keypair = Keypair::generate();
        let peer = keypair.peer_id();
        let message = sign(&keypair, peer, "hello", 1_000).unwrap();
        assert!(verify(&message).is_ok());
    }

    #[test]
    fn tampering_any_byte_of_the_payload_fails_verification() {
        let keypair = Keypair::generate();
        let peer = keypair.peer_id();
        let mut message = sign(&keypair, peer, "hello".to_owned(), 1_000).unwrap();
        message.payload.push('!');
        assert!(verify(&message).is_err());
    }

    #[test]
    fn tampering_the_timestamp_fails_verification() {
        let keypair = Keypair::generate();
        let peer = keypair.peer_id();
        let mut message = sign(&keypair, peer, "hello", 1_000).unwrap();
        message.timestamp_ms += 1;
        assert!(verify(&message).is_err());
    }

    proptest! {
        /// Any string payload at any timestamp signs and verifies, and
        /// appending so much as one byte to the payload always breaks
        /// verification.
        #[test]
        fn sign_then_verify_round_trips_for_arbitrary_payloads(
            payload in ".*",
            now_ms in any::<u64>(),
            extra in any::<char>(),
        ) {
            let keypair = Keypair::generate();
            let peer = keypair.peer_id();
            let message = sign(&keypair, peer, payload.clone(), now_ms).unwrap();
            prop_assert!(verify(&message).is_ok());

            let mut tampered = message;
            tampered.payload.push(extra);
            prop_assert!(verify(&tampered).is_err());
        }
    }
}
