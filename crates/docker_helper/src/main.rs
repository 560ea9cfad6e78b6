//! Docker helper server
//!
//! # Environment Variables
//!
//! - `DOCKER_HELPER_PORT`: Port to listen on (default: 8000)
//! - `COMPOSE_PROJECT_NAME`: Compose project to report on (default: docker)
//! - `DOCKER_HOST_URL`: Docker API endpoint (default: http://docker-proxy:2375)
//! - `RUST_LOG`: Log level (default: info)

use std::env;
use std::sync::Arc;

use docker_helper::{AppState, BollardDocker, HelperConfig, HelperServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let config = HelperConfig::from_env()?;
    let docker = BollardDocker::connect(&config.docker_url)?;
    tracing::info!(docker = %config.docker_url, "Using docker API");

    let state = AppState::new(config.project.clone(), Arc::new(docker));
    HelperServer::new(config, state).serve().await
}
