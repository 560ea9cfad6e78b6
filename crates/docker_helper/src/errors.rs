//! Error handling and HTTP error conversion
//!
//! Lookup failures are reported the way clients of the helper expect: a
//! `404` with an empty body means "not there (yet)" and is retried by the
//! callers. Failures to reach the Docker API are server errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("expected exactly one container for service {service}, found {count}")]
    ContainerCount { service: String, count: usize },

    #[error("service {service} has no public port bound to container port 80")]
    NoPublicPort { service: String },

    #[error("network {network} has no gateway")]
    NoGateway { network: String },

    #[error("docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

impl HelperError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ContainerCount { .. } | Self::NoPublicPort { .. } | Self::NoGateway { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::Docker(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for HelperError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Docker lookup failed");
        } else {
            tracing::debug!(error = %self, "Nothing to report");
        }
        status.into_response()
    }
}
