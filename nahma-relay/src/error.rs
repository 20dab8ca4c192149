//! Relay server failure modes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay is at its concurrent-connection limit")]
    Busy,
}
