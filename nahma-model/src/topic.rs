//! Topic derivation: the 32-byte rendezvous tag peers use to find each other
//! for a document. Bit-exact: peers must agree on this without
//! any protocol negotiation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The 32-byte SHA-256 rendezvous tag for a document.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Topic(pub [u8; 32]);

impl Topic {
    /// `SHA256("nahma:" + docId)` without a password,
    /// `SHA256("nahma:" + docId + ":" + password)` with one.
    ///
    /// `doc_id` is the document's lowercase-hex id. An empty `doc_id` is
    /// legal and deterministic.
    pub fn derive(doc_id: &str, password: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"nahma:");
        hasher.update(doc_id.as_bytes());
        if let Some(password) = password {
            hasher.update(b":");
            hasher.update(password.as_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Hex rendering, used as the sled/registry key and in logs.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Topic {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", &self.to_hex()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_without_password() {
        assert_eq!(Topic::derive("doc1", None), Topic::derive("doc1", None));
    }

    #[test]
    fn password_changes_topic() {
        assert_ne!(
            Topic::derive("doc1", None),
            Topic::derive("doc1", Some("secret"))
        );
    }

    #[test]
    fn empty_id_is_legal() {
        let a = Topic::derive("", None);
        let b = Topic::derive("", None);
        assert_eq!(a, b);
    }

    #[test]
    fn preimage_has_no_separator_before_bare_id() {
        // "nahma:" + docId, not "nahma:" + ":" + docId.
        let mut hasher = Sha256::new();
        hasher.update(b"nahma:doc1");
        let mut expected = [0u8; 32];
        expected.copy_from_slice(&hasher.finalize());
        assert_eq!(Topic::derive("doc1", None).0, expected);
    }
}
