//! HTTP server configuration and startup

use axum::Router;
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;

use crate::{routes, AppState, DEFAULT_PORT, DEFAULT_PROJECT};

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;

/// Docker API endpoint used when `DOCKER_HOST_URL` is unset.
pub const DEFAULT_DOCKER_URL: &str = "http://docker-proxy:2375";

/// Helper configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperConfig {
    pub port: u16,
    pub host: String,
    /// Compose project to report on
    pub project: String,
    /// Docker Engine API endpoint
    pub docker_url: String,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: "0.0.0.0".to_string(),
            project: DEFAULT_PROJECT.to_string(),
            docker_url: DEFAULT_DOCKER_URL.to_string(),
        }
    }
}

impl HelperConfig {
    /// Read `DOCKER_HELPER_PORT`, `COMPOSE_PROJECT_NAME` and
    /// `DOCKER_HOST_URL`, falling back to the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let port = match env::var("DOCKER_HELPER_PORT") {
            Ok(port) => port
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid DOCKER_HELPER_PORT {port:?}: {e}"))?,
            Err(_) => defaults.port,
        };
        Ok(Self {
            port,
            project: env::var("COMPOSE_PROJECT_NAME").unwrap_or(defaults.project),
            docker_url: env::var("DOCKER_HOST_URL").unwrap_or(defaults.docker_url),
            ..defaults
        })
    }
}

pub struct HelperServer {
    config: HelperConfig,
    state: AppState,
}

impl HelperServer {
    pub fn new(config: HelperConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone())
    }

    /// Serve until CTRL+C or SIGTERM.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        ));

        tracing::info!(project = %self.config.project, "Starting docker helper on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        let app = self.router();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received CTRL+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
