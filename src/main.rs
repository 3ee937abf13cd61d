//! # Chat Hub
//!
//! WebSocket room chat server.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Message store (PostgreSQL or in-memory)
//! - Chat hub and HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use chat_hub::config::Settings;
use chat_hub::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    chat_hub::telemetry::init_tracing();

    info!("Starting Chat Hub...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        backend = ?settings.database.backend,
        "Configuration loaded"
    );

    // Build and run the application
    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
