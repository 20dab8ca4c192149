//! Mesh failure modes. Transport failures degrade rather
//! than fail fatally; these variants are what callers of `send`/`accept`
//! see, not what tears down the mesh.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    /// No WebRTC channel, relay path, or forwarding peer was available for
    /// the target peer.
    #[error("no route to peer")]
    NoRoute,

    /// The relay (or this node's embedded relay) is at its configured
    /// connection limit; new connections are shed, existing ones untouched.
    #[error("relay at capacity")]
    Busy,

    /// An inbound or outbound frame did not parse as a recognized message
    /// type.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("signaling connection error: {0}")]
    Signaling(String),

    #[error("webrtc error: {0}")]
    WebRtc(String),
}
