//! Error types for the integration-test harness.
//!
//! Every failure of the harness surfaces as a [`HarnessError`]. Scenario tests
//! usually wrap them in `anyhow::Error`, so that a failing step fails the test
//! with the full context of what went wrong.

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

/// Errors that can occur while driving a compose session and the services in it.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Neither `docker compose` (v2) nor `docker-compose` (v1) is usable on this host.
    #[error("docker compose is not available on this host")]
    ComposeUnavailable,

    /// A configuration value read from the environment is invalid.
    #[error("Invalid value for {variable}: {message}")]
    Config { variable: String, message: String },

    /// A command could not be spawned at all.
    #[error("Failed to spawn `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A command ran but exited unsuccessfully.
    ///
    /// The captured output is kept so that the test failure shows what the
    /// service answered.
    #[error("Command `{command}` failed with status {status:?}\nstdout: {stdout}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// A polled predicate never returned a truthy value.
    #[error("{message} (gave up after {attempts} attempts)")]
    RetryExhausted { message: String, attempts: u32 },

    /// An API path was given with a leading `/`, which would discard the
    /// path of the base URL.
    #[error("API path must be relative, got {0}")]
    AbsolutePath(String),

    /// An URL could not be built.
    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The HTTP request itself failed (connection, protocol, ...).
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP response did not carry the expected status code.
    #[error("failed to retrieve {url}: expected status {expected}, got {actual}: {body}")]
    UnexpectedStatus {
        url: String,
        expected: u16,
        actual: u16,
        body: String,
    },

    /// Polling an URL never returned a successful response.
    #[error("Polling {url} failed after {attempts} attempts")]
    PollExhausted { url: String, attempts: u32 },

    /// A response did not have the expected shape.
    #[error("Unexpected response from {source_name}: {message}")]
    UnexpectedResponse {
        source_name: String,
        message: String,
    },

    /// JSON (de)serialization failure.
    #[error("Failed to process JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A recovery bundle manifest could not be parsed.
    #[error("Failed to parse recovery bundle manifest: {0}")]
    Manifest(#[from] serde_yaml::Error),

    /// A recovery bundle manifest does not list the origins requested for removal.
    #[error("Removal {identifier} requested {requested:?} but was asked to remove {origins:?}")]
    ManifestMismatch {
        identifier: String,
        requested: Vec<String>,
        origins: Vec<String>,
    },

    /// A string is not a valid SWHID.
    #[error("Invalid SWHID: {0}")]
    InvalidSwhid(String),

    /// No container is running for the given compose service.
    #[error("No container found for service {0}")]
    ServiceNotFound(String),

    /// `docker compose port` returned something that is not `host:port`.
    #[error("Cannot parse port mapping of {service}: {output:?}")]
    InvalidPortMapping { service: String, output: String },

    /// Local filesystem failure (log dumps, temporary files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the harness.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
