//! At-rest encryption for the identity blob: an OS keychain secret where
//! available, else a machine-bound on-disk key. This crate
//! provides only the pure, platform-independent reference path — an
//! on-disk key file scoped to the state directory; wiring an OS keychain
//! is left to the platform-specific onboarding collaborator.

use crate::error::PersistError;
use aes_gcm::aead::{generic_array::GenericArray, Aead, NewAead};
use aes_gcm::Aes256Gcm;
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};

const KEY_FILE: &str = "machine.key";
const NONCE_LEN: usize = 12;

/// The 256-bit key used to encrypt the identity blob at rest.
pub struct MachineKey {
    cipher: Aes256Gcm,
}

impl MachineKey {
    /// Loads the key file under `state_dir`, generating one on first run.
    pub fn load_or_create(state_dir: &Path) -> Result<Self, PersistError> {
        let path = state_dir.join(KEY_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) if bytes.len() == 32 => bytes,
            _ => {
                let mut bytes = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                fs::create_dir_all(state_dir).map_err(|e| PersistError::MachineKey(e.to_string()))?;
                fs::write(&path, &bytes).map_err(|e| PersistError::MachineKey(e.to_string()))?;
                bytes
            }
        };
        let key = GenericArray::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypts `plaintext`, prefixing the output with a fresh random
    /// nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, PersistError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);
        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| PersistError::Decrypt(e.to_string()))?;
        let mut out = nonce_bytes.to_vec();
        out.append(&mut ciphertext);
        Ok(out)
    }

    /// Decrypts a blob produced by [`Self::encrypt`].
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, PersistError> {
        if blob.len() < NONCE_LEN {
            return Err(PersistError::Decrypt("blob shorter than nonce".to_owned()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = GenericArray::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| PersistError::Decrypt(e.to_string()))
    }
}

/// Resolves the effective state directory: `STATE_DIR` if set, else a
/// platform default under the user's data directory.
pub fn state_dir_from_env() -> PathBuf {
    std::env::var_os("STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".nahma"))
}
