//! Peer-to-peer collaborative editing runtime: CRDT sync substrate. This
//! crate wires together `nahma-model`, `nahma-crdt`, `nahma-auth`,
//! `nahma-mesh`, `nahma-persist`, and `nahma-awareness` into one running
//! peer, exposed to an editor integration through [`Sdk`] and driven end to
//! end by [`Supervisor`].

pub mod config;
pub mod error;
pub mod event;
pub mod sdk;
pub mod supervisor;
pub mod wire;

pub use config::Config;
pub use error::SdkError;
pub use event::SupervisorEvent;
pub use sdk::Sdk;
pub use supervisor::Supervisor;
pub use wire::{WireBody, WireFrame};
