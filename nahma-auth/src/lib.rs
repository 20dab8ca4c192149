//! Nahma's authenticator: deterministic message canonicalization, Ed25519
//! sign/verify, and a replay guard for control messages (identity
//! announcements, join/leave, invites). CRDT update payloads never pass
//! through here — they are trusted because they travel inside a CRDT
//! encrypted at a higher layer.

pub mod canonical;
pub mod error;
pub mod message;
pub mod replay;

pub use canonical::canonicalize;
pub use error::AuthError;
pub use message::{sign, verify, Nonce, SignedMessage};
pub use replay::ReplayGuard;
