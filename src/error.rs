//! Supervisor-level error taxonomy, layering `nahma-crdt`/`nahma-mesh`
//! errors under one type for the editor-facing facade.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Crdt(#[from] nahma_crdt::CrdtError),

    #[error("broadcasting the update failed: {0:?}")]
    Broadcast(Vec<(nahma_model::PeerId, nahma_mesh::MeshError)>),
}
