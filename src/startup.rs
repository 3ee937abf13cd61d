//! Application Startup
//!
//! Application building and server initialization.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::{DatabaseBackend, Settings};
use crate::domain::MessageRepository;
use crate::infrastructure::database;
use crate::infrastructure::repositories::{InMemoryMessageRepository, PgMessageRepository};
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::{Hub, HubHandle};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub messages: Arc<dyn MessageRepository>,
    pub settings: Arc<Settings>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    hub: HubHandle,
    hub_task: JoinHandle<()>,
}

impl Application {
    /// Build the application from settings, connecting the configured message store.
    pub async fn build(settings: Settings) -> Result<Self> {
        let messages: Arc<dyn MessageRepository> = match settings.database.backend {
            DatabaseBackend::Postgres => {
                let pool = database::create_pool(&settings.database).await?;
                tracing::info!("Database connection pool created");

                if settings.database.run_migrations {
                    database::run_migrations(&pool).await?;
                }

                Arc::new(PgMessageRepository::new(pool))
            }
            DatabaseBackend::Memory => {
                tracing::warn!("Using in-memory message store; history is lost on restart");
                Arc::new(InMemoryMessageRepository::new())
            }
        };

        Self::build_with_repository(settings, messages).await
    }

    /// Build the application around an existing message store.
    pub async fn build_with_repository(
        settings: Settings,
        messages: Arc<dyn MessageRepository>,
    ) -> Result<Self> {
        health::init_server_start();

        // Start the hub before accepting connections
        let (hub, hub_task) = Hub::spawn(messages.clone(), &settings.hub);

        let state = AppState {
            hub: hub.clone(),
            messages,
            settings: Arc::new(settings.clone()),
        };

        // Build router with middleware
        let router = routes::create_router(state)
            .layer(logging::create_trace_layer())
            .layer(cors::create_cors_layer(&settings.cors));

        let listener = TcpListener::bind(settings.server_addr()).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router,
            hub,
            hub_task,
        })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the running hub
    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Run the server until Ctrl-C or SIGTERM
    pub async fn run_until_stopped(self) -> Result<()> {
        self.run_with_shutdown(shutdown_signal()).await
    }

    /// Run the server until `signal` resolves, then stop the hub.
    ///
    /// Stopping the hub closes every client's outbound queue, so each open
    /// connection receives a close frame and its tasks wind down.
    pub async fn run_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let hub = self.hub.clone();

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                signal.await;
                tracing::info!("Shutdown signal received, stopping hub");
                hub.shutdown();
            })
            .await?;

        self.hub_task.await?;
        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
