//! Nahma's transport mesh: signaling, relay, and direct WebRTC peer
//! connections behind one `send`/`broadcast`/`subscribe` surface, plus the
//! peer registry that drives recursive topic discovery.

pub mod error;
pub mod frame;
pub mod mesh;
pub mod relay;
pub mod router;
pub mod signaling;
pub mod transport;
pub mod webrtc_transport;

pub use error::MeshError;
pub use frame::{InboundFrame, SignalingMessage, TransportTag};
pub use mesh::{BroadcastReport, Mesh};
pub use relay::RelayTransport;
pub use router::{DiscoveryBudget, PeerEntry, Registry};
pub use signaling::SignalingTransport;
pub use transport::Transport;
pub use webrtc_transport::{PeerState, StunConfig, WebRtcTransport};
