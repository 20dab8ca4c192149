//! Authenticator failure modes. All result in the message
//! being silently dropped from the application layer's view and logged at
//! debug level by the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("signature does not verify against the canonical payload")]
    InvalidSignature,

    #[error("timestamp {timestamp_ms} outside the ±5 minute window of local time")]
    Expired { timestamp_ms: u64 },

    #[error("(peer, nonce) pair already seen within the replay window")]
    ReplayDetected,

    #[error("payload failed to canonicalize: {0}")]
    Malformed(#[from] serde_json::Error),
}
