//! Error types for Keycloak provisioning.

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Errors that can occur while talking to the Keycloak admin API.
#[derive(Debug, thiserror::Error)]
pub enum KeycloakError {
    /// The request could not be sent or its response could not be read.
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Keycloak answered with an unexpected status code.
    ///
    /// Creation requests answered with `409 Conflict` are reported as
    /// [`KeycloakError::AlreadyExists`] instead.
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// The object a creation request targets already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// A lookup by name found nothing.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// A URL could not be built from the server URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The admin token endpoint returned no token.
    #[error("Failed to authenticate as {username}: {message}")]
    Authentication { username: String, message: String },
}

impl KeycloakError {
    /// Whether the error only says that the object is already there.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}
