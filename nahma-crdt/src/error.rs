//! Error taxonomy for the replication engine.

use nahma_model::TypeTag;
use thiserror::Error;

/// Failures the engine can report back to its caller. None of these leave
/// a document's in-memory state partially mutated: every fallible path is
/// checked before any payload mutation occurs.
#[derive(Debug, Error)]
pub enum CrdtError {
    /// An update blob failed to decode, or decoded to an op targeting a
    /// different document shape than the one it was applied to.
    #[error("malformed update: {0}")]
    MalformedUpdate(String),

    /// A persisted snapshot or log entry failed to decode.
    #[error("corrupt log or snapshot: {0}")]
    CorruptLog(String),

    /// An operation built for one document shape was applied (or would be
    /// applied) against another.
    #[error("operation for {operation:?} document applied to {document:?} document")]
    TypeMismatch {
        document: TypeTag,
        operation: TypeTag,
    },

    /// `open_document` was asked for a document the backend has no record
    /// of and the caller did not request creation.
    #[error("document {0} not found")]
    NotFound(String),

    /// The configured persistence backend failed.
    #[error("persistence backend error: {0}")]
    Backend(#[source] anyhow::Error),
}
