//! Keycloak provisioning for the Software Heritage compose environment.
//!
//! Creates the `SoftwareHeritage` realm with the public OIDC clients used by
//! the web app, the deposit and the COAR Notify services, the client and
//! realm roles they check, and a handful of test users. Running it twice is
//! harmless.

pub mod admin;
pub mod errors;
pub mod provision;

use std::env;

pub use admin::KeycloakAdmin;
pub use errors::KeycloakError;
pub use provision::provision;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080/keycloak/auth/";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";
pub const DEFAULT_HELPER_URL: &str = "http://docker-helper/public-port/";

/// Where Keycloak and the docker helper are reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupConfig {
    pub server_url: String,
    pub admin_password: String,
    /// Endpoint answering the public port of the edge router.
    pub helper_url: String,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
            helper_url: DEFAULT_HELPER_URL.to_string(),
        }
    }
}

impl SetupConfig {
    /// Read `KEYCLOAK_SERVER_URL` and `KEYCLOAK_ADMIN_PASSWORD`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_url: env::var("KEYCLOAK_SERVER_URL").unwrap_or(defaults.server_url),
            admin_password: env::var("KEYCLOAK_ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
            ..defaults
        }
    }
}

/// Initialize logging for the provisioning binary.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}
