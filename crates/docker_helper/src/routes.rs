//! HTTP routing configuration
//!
//! - GET /                        - liveness
//! - GET /public-port/            - public port of nginx
//! - GET /public-port/:service/   - public port of a service
//! - GET /gateway/                - gateway of the project network

use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::docker::{self, default_network_name};
use crate::{AppState, HelperError, DEFAULT_SERVICE};

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/public-port/", get(default_public_port))
        .route("/public-port/:service/", get(service_public_port))
        .route("/gateway/", get(gateway))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> &'static str {
    "OK"
}

async fn default_public_port(State(state): State<AppState>) -> Result<String, HelperError> {
    port_of(&state, DEFAULT_SERVICE).await
}

async fn service_public_port(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<String, HelperError> {
    port_of(&state, &service).await
}

async fn port_of(state: &AppState, service: &str) -> Result<String, HelperError> {
    let containers = state.docker.containers().await?;
    let port = docker::public_port(&containers, &state.project, service)?;
    Ok(port.to_string())
}

async fn gateway(State(state): State<AppState>) -> Result<String, HelperError> {
    let name = default_network_name(&state.project);
    let network = state.docker.network(&name).await?;
    docker::gateway(&network)
        .map(str::to_string)
        .ok_or(HelperError::NoGateway { network: name })
}
