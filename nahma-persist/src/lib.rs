//! Nahma's persistence layer: an embedded `sled` database holding the
//! at-rest-encrypted identity blob, workspace/folder/document metadata, and
//! every open document's CRDT snapshot and update log.

mod error;
mod identity;
mod keys;
mod store;
mod workspace;

pub use error::PersistError;
pub use keys::{state_dir_from_env, MachineKey};
pub use store::Store;
