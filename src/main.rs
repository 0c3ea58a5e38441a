//! Blockyard Server - relay for the multiplayer voxel sandbox
//!
//! This is the main entry point for the server. It handles:
//! - WebSocket connections for real-time world sync
//! - The world task owning blocks, players and cars
//! - Flat-file accounts and saved characters

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blockyard::app::AppState;
use blockyard::config::Config;
use blockyard::game::{CharacterSave, GameWorld, WorldConfig};
use blockyard::http::build_router;
use blockyard::store::{AccountStore, CharacterStore};
use blockyard::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Blockyard Server");
    info!("Server address: {}", config.server_addr);
    info!(data_dir = %config.data_dir.display(), seed = config.world_seed, "World settings");

    // Open flat-file stores
    let accounts = AccountStore::open(&config.data_dir)
        .await
        .context("opening account store")?;
    let characters = CharacterStore::open(&config.data_dir)
        .await
        .context("opening character store")?;

    // Spawn the world task and the character writer
    let (world, world_handle, save_rx) = GameWorld::new(WorldConfig::from(&config));
    tokio::spawn(world.run());
    tokio::spawn(persist_characters(characters.clone(), save_rx));

    // Create application state
    let state = AppState::new(config.clone(), accounts, characters, world_handle);

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Write character saves requested by the world task
async fn persist_characters(characters: CharacterStore, mut save_rx: mpsc::UnboundedReceiver<CharacterSave>) {
    while let Some(save) = save_rx.recv().await {
        if let Err(e) = characters.save(&save.username, save.record).await {
            error!(username = %save.username, error = %e, "Failed to save character");
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
