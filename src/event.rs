//! The structured event taxonomy surfaced to the collaborator observability
//! layer.

use nahma_model::{DocId, PeerId};

/// One notable condition the supervisor observed. None of these tear down
/// unrelated work; only [`SupervisorEvent::Fatal`] precedes a shutdown.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// The mesh lost its last usable transport; local mutations continue to
    /// queue in memory.
    Degraded,
    /// The mesh regained at least one usable transport; the queue is
    /// draining.
    Reconnected,
    /// Three consecutive persistence write failures; the supervisor is now
    /// serving reads only.
    PersistenceReadOnly,
    /// A peer's signed frame was dropped because it is not in the
    /// workspace's role map.
    PeerRejected { peer: PeerId },
    /// A document's snapshot and log are both unreadable; it remains listed
    /// but cannot be opened until a human intervenes.
    DocumentQuarantined { doc: DocId },
    /// A sustained (>60s) network outage worth surfacing even though the
    /// supervisor keeps retrying.
    NetworkSustainedOutage,
    /// An unrecoverable condition (identity lost, persistence root
    /// unmountable) that precedes a controlled shutdown.
    Fatal(String),
}
