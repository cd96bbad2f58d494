//! Multi-room WebSocket Chat Hub - Entry Point
//!
//! Starts the TCP listener and Hub actor, accepting connections until Ctrl-C.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_hub::{serve, AppError, HubHandle, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_hub=info")),
        )
        .init();

    // CHAT_HUB_* variables, then the bind address from the command line
    let config = Arc::new(ServerConfig::load()?);

    // Start TCP listener
    let listener = TcpListener::bind(&config.addr).await?;
    info!(
        "WebSocket Chat Hub listening on ws://{}{}",
        config.addr, config.ws_path
    );

    // Start the Hub actor
    let hub = HubHandle::start(config.command_buffer);

    tokio::select! {
        _ = serve(listener, hub, config) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown requested");
        }
    }

    Ok(())
}
