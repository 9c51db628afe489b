//! HTTP server components for pokemon-sync
//!
//! This module provides the HTTP server infrastructure including:
//! - Router configuration and route handlers
//! - Server lifecycle management

pub mod router;

pub use router::{build_router, AppState, BreakerStatusResponse, HealthResponse, SyncQuery};

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// HTTP Server for pokemon-sync
///
/// Manages the axum server lifecycle, including:
/// - Binding to configured address
/// - Applying middleware layers
/// - Graceful shutdown handling
pub struct Server {
    config: ServerConfig,
    state: AppState,
    cancel_on_shutdown: Option<CancellationToken>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_on_shutdown: None,
        }
    }

    /// Cancel `token` as soon as the shutdown signal fires
    ///
    /// Graceful shutdown waits for in-flight requests, so a protected sync
    /// sleeping between retries must be woken before the drain starts.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_on_shutdown = Some(token);
        self
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.config.host.parse().unwrap_or([0, 0, 0, 0].into()),
            self.config.port,
        )
    }

    /// Run the server until shutdown signal is received
    ///
    /// # Arguments
    ///
    /// * `shutdown` - Future that resolves when the server should shut down
    ///
    /// # Returns
    ///
    /// Ok(()) if server shuts down gracefully, Err if there was an error
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        tracing::info!("Server listening on {}", addr);

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let app = build_router(self.state);

        // Apply middleware layers
        let app = app
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .layer(tower_http::compression::CompressionLayer::new());

        let token = self.cancel_on_shutdown;
        let shutdown = async move {
            shutdown.await;
            if let Some(token) = token {
                tracing::info!("Cancelling in-flight sync work");
                token.cancel();
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    /// Failed to serve requests
    #[error("Server error: {0}")]
    Serve(String),
}
