//! Standalone signaling + relay server binary.

mod error;
mod hub;

use clap::Parser;
use futures::{SinkExt, StreamExt};
use hub::Hub;
use nahma_mesh::SignalingMessage;
use nahma_model::PeerId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use warp::ws::{Message, WebSocket};
use warp::Filter;

/// Nahma's embedded signaling and relay server.
#[derive(Parser)]
struct Opts {
    /// Port to bind the WebSocket signaling endpoint on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Maximum number of concurrent peer connections before new ones are
    /// shed with a close frame.
    #[arg(long, default_value_t = 100)]
    max_connections: usize,

    /// Raises log verbosity.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let default_level = if opts.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let hub = Arc::new(Hub::new(opts.max_connections));
    let with_hub = warp::any().map(move || hub.clone());

    let signaling = warp::path::end()
        .and(warp::ws())
        .and(with_hub)
        .map(|ws: warp::ws::Ws, hub: Arc<Hub>| {
            ws.on_upgrade(move |socket| handle_connection(socket, hub))
        });

    tracing::info!(port = opts.port, max_connections = opts.max_connections, "relay listening");
    warp::serve(signaling).run(([0, 0, 0, 0], opts.port)).await;
    Ok(())
}

async fn handle_connection(socket: WebSocket, hub: Arc<Hub>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let Some(Ok(first)) = stream.next().await else {
        return;
    };
    let Some(peer) = identify(&first) else {
        tracing::debug!("connection closed before identifying itself");
        return;
    };

    if hub.register(peer, tx).await.is_err() {
        tracing::warn!(?peer, "shedding connection: at capacity");
        let _ = sink.send(Message::close()).await;
        return;
    }
    tracing::debug!(?peer, connections = hub.connection_count().await, "peer connected");

    let forward = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        if let Some(decoded) = decode(&message) {
            hub.dispatch(peer, decoded).await;
        }
    }

    forward.abort();
    hub.unregister(&peer).await;
    tracing::debug!(?peer, "peer disconnected");
}

fn identify(message: &Message) -> Option<PeerId> {
    match decode(message)? {
        SignalingMessage::Identity { peer } => Some(peer),
        _ => None,
    }
}

fn decode(message: &Message) -> Option<SignalingMessage> {
    let text = message.to_str().ok()?;
    serde_json::from_str(text).ok()
}
