mod health;
mod request_context;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use switchyard_config::Config;
use switchyard_llm::GatewayState;
use switchyard_llm::transport::FingerprintBackend;
use tower_http::trace::TraceLayer;

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    state: GatewayState,
    listen_address: SocketAddr,
}

impl Server {
    /// Build the server from configuration
    ///
    /// `fingerprint` backs the browser-fingerprinting transport when
    /// `transport.fingerprint` is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if provider clients cannot be built
    pub fn new(config: &Config, fingerprint: Option<Arc<dyn FingerprintBackend>>) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let state = GatewayState::from_config(config, fingerprint)?;

        let mut app = Router::new();

        // Health check
        if config.server.health.enabled {
            app = app.route(
                &config.server.health.path,
                axum::routing::get(health::health_handler).with_state(state.clone()),
            );
        }

        // Gateway routes
        app = app.merge(switchyard_llm::gateway_router(state.clone()));

        // Apply middleware layers (innermost first)
        app = app.layer(axum::middleware::from_fn(request_context::request_context_middleware));
        app = app.layer(TraceLayer::new_for_http());

        Ok(Self {
            router: app,
            state,
            listen_address,
        })
    }

    /// Get the configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Override the listen address
    #[must_use]
    pub const fn with_listen_address(mut self, listen_address: SocketAddr) -> Self {
        self.listen_address = listen_address;
        self
    }

    /// Shared gateway state behind the routes
    #[must_use]
    pub const fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Runs the credential refresh loop alongside the listener and blocks
    /// until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let refresh = self.state.start_refresh(shutdown.child_token());

        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, providers = ?self.state.providers(), "server listening");

        let shutdown_signal = shutdown.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown_signal.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        shutdown.cancel();
        if let Some(refresh) = refresh
            && let Err(e) = refresh.await
        {
            tracing::warn!(error = %e, "refresh task ended abnormally");
        }

        Ok(())
    }
}
