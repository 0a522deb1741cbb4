//! duet signaling server -- two-peer rendezvous for WebRTC handshakes.
//!
//! An axum WebSocket server that pairs peers by room name and relays
//! offers, answers and ICE candidates between them. Payloads are opaque.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! cargo run --bin duet-server
//!
//! # Run on custom address
//! cargo run --bin duet-server -- --bind 127.0.0.1:9000
//!
//! # Legacy mode: echo every message to every other client
//! cargo run --bin duet-server -- --mode broadcast
//! ```

use clap::Parser;
use duet_server::config::{ServerCliArgs, ServerConfig};
use duet_server::server;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, mode = %config.mode, "starting duet signaling server");

    match server::start_server_with_config(&config).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "signaling server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "signaling server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start signaling server");
            std::process::exit(1);
        }
    }
}
