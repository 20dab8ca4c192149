//! Persistence failure modes.

use nahma_model::DocId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sled storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("identity blob could not be decrypted: {0}")]
    Decrypt(String),

    #[error("document {0} is quarantined: both snapshot and log are unreadable")]
    Quarantined(DocId),

    #[error("machine key could not be read or created: {0}")]
    MachineKey(String),
}
