//! Awareness failure modes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AwarenessError {
    #[error("awareness frame did not decode: {0}")]
    MalformedFrame(String),

    #[error("document is not open for awareness")]
    NotOpen,
}
