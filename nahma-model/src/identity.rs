//! Long-lived local identity: an Ed25519 keypair plus human-readable profile
//! fields. The public key doubles as the peer id used throughout the mesh,
//! registry and authenticator.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A peer's public key, used as its address on the mesh and as the `actor`
/// in every CRDT clock.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Wraps a raw public key.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the hex-encoded peer id, used in logs and the discovery
    /// protocol's deterministic lexicographic ordering.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// An Ed25519 keypair. Never serialized in plaintext outside `nahma-persist`'s
/// at-rest encryption.
pub struct Keypair(SigningKey);

impl Keypair {
    /// Generates a fresh keypair. Called exactly once at onboarding.
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    /// Restores a keypair from its 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self(SigningKey::from_bytes(&bytes))
    }

    /// Returns the 32-byte secret scalar for persistence.
    pub fn to_secret_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Returns the public key / peer id for this keypair.
    pub fn peer_id(&self) -> PeerId {
        PeerId(self.0.verifying_key().to_bytes())
    }

    /// Signs a message, returning a detached 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.0.sign(message).to_bytes()
    }

    /// Verifies a detached signature produced by [`Keypair::sign`].
    pub fn verify(public: PeerId, message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&public.0) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        key.verify(message, &sig).is_ok()
    }
}

/// The local identity: keypair plus mutable, human-readable profile fields.
///
/// Created once at onboarding and persisted at rest (`nahma-persist`); only
/// the profile fields are ever mutated thereafter.
pub struct Identity {
    keypair: Keypair,
    /// Milliseconds since epoch at creation.
    pub created_at: u64,
    /// Bumped on every profile-field mutation; lets `nahma-persist` apply a
    /// last-write-wins rule without a full CRDT for a single-owner record.
    pub profile_version: u64,
    /// Human-readable display name.
    pub display_name: String,
    /// Presence color (e.g. `"#7f5af0"`), purely cosmetic.
    pub color: String,
    /// Icon identifier, purely cosmetic.
    pub icon: String,
}

impl Identity {
    /// Creates a brand-new identity with a fresh keypair.
    pub fn generate(display_name: impl Into<String>, now_ms: u64) -> Self {
        Self {
            keypair: Keypair::generate(),
            created_at: now_ms,
            profile_version: 0,
            display_name: display_name.into(),
            color: "#6c5ce7".to_owned(),
            icon: "default".to_owned(),
        }
    }

    /// Reconstructs an identity from persisted parts.
    pub fn from_parts(
        keypair: Keypair,
        created_at: u64,
        profile_version: u64,
        display_name: String,
        color: String,
        icon: String,
    ) -> Self {
        Self {
            keypair,
            created_at,
            profile_version,
            display_name,
            color,
            icon,
        }
    }

    /// The peer id for this identity.
    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    /// The underlying keypair, for the authenticator to sign with.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Applies a profile mutation, bumping `profile_version`. Concurrent
    /// mutations from a future multi-device identity are out of scope; this
    /// is a single-writer record.
    pub fn set_profile(&mut self, display_name: String, color: String, icon: String) {
        self.profile_version += 1;
        self.display_name = display_name;
        self.color = color;
        self.icon = icon;
    }
}
