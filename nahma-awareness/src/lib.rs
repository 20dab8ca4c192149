//! Nahma's awareness channel: ephemeral per-document presence (cursor,
//! selection, typing, online), carried on its own frame type and never
//! persisted.

mod error;
mod frame;
mod hub;
mod state;

pub use error::AwarenessError;
pub use frame::AwarenessFrame;
pub use hub::{AwarenessHub, OutboundAwareness};
pub use state::AwarenessState;
