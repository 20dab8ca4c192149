//! CLI flags and environment configuration.

use clap::Parser;
use std::path::PathBuf;

/// Nahma's P2P collaborative-editing sync supervisor.
#[derive(Parser, Debug, Clone)]
#[command(name = "nahma", version)]
pub struct Config {
    /// Signaling port to bind when this process also hosts a local relay.
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// Runs in ephemeral memory-only mode: nothing is read from or written
    /// to disk. Used for tests and relay-only deployments.
    #[arg(long)]
    pub no_persist: bool,

    /// Raises log verbosity to `debug`.
    #[arg(long)]
    pub verbose: bool,

    /// Overrides the persistence directory.
    #[arg(long, env = "STATE_DIR", default_value = ".nahma")]
    pub state_dir: PathBuf,

    /// Comma-separated STUN server URLs for WebRTC ICE.
    #[arg(long, env = "STUN_SERVERS", default_value = "")]
    pub stun_servers: String,

    /// Signaling server URL to connect to (`ws://` or `wss://`). Optional:
    /// without it the mesh runs relay/WebRTC-only.
    #[arg(long, env = "SIGNALING_URL")]
    pub signaling_url: Option<String>,
}

/// Process exit codes.
pub mod exit_code {
    pub const CLEAN: i32 = 0;
    pub const TEST_FAILURE: i32 = 1;
    pub const INFRASTRUCTURE: i32 = 2;
}
