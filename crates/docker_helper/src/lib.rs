//! Docker helper service
//!
//! A tiny HTTP service running inside a compose project. Containers of the
//! project cannot see how their own ports are published on the host, nor the
//! address of the network gateway; both are needed to build URLs pointing
//! back at the platform (keycloak frontend URL, integration tests running in
//! a container). The helper asks the Docker Engine API and answers in plain
//! text:
//!
//! - `GET /` - liveness, `OK`
//! - `GET /public-port/` - public port of `nginx`
//! - `GET /public-port/{service}/` - public port of `service`
//! - `GET /gateway/` - gateway address of the project's default network

pub mod docker;
pub mod errors;
pub mod routes;
pub mod server;

use std::sync::Arc;

pub use docker::{BollardDocker, ContainerSource};
pub use errors::HelperError;
pub use server::{HelperConfig, HelperServer};

/// Port listened on when `DOCKER_HELPER_PORT` is unset.
pub const DEFAULT_PORT: u16 = 8000;

/// Compose project looked up when `COMPOSE_PROJECT_NAME` is unset.
pub const DEFAULT_PROJECT: &str = "docker";

/// Service whose port `/public-port/` reports.
pub const DEFAULT_SERVICE: &str = "nginx";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Compose project the helper belongs to.
    pub project: String,
    pub docker: Arc<dyn ContainerSource>,
}

impl AppState {
    pub fn new(project: impl Into<String>, docker: Arc<dyn ContainerSource>) -> Self {
        Self {
            project: project.into(),
            docker,
        }
    }
}
