//! Network Map Service Binary
//!
//! Runs the network map and doorman HTTP server.

use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use netmap_service::{create_router, AppState, NetworkMapConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkMapConfig::from_env()?;

    // Initialize logging
    let log_level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        port = config.port,
        database = ?config.database_url,
        keys_dir = ?config.keys_dir,
        notaries_dir = ?config.notaries_dir,
        "Starting network map service"
    );

    // Create application state and publish the first snapshot
    let state = Arc::new(AppState::from_config(config.clone()).await?);
    info!(root = %state.hierarchy.trust_root().subject(), "Trust anchors ready");

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Network map listening");

    axum::serve(listener, app).await?;
    Ok(())
}
