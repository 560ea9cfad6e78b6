//! Provision Keycloak for the compose environment.
//!
//! # Environment Variables
//!
//! - `KEYCLOAK_SERVER_URL`: Keycloak base URL (default: http://localhost:8080/keycloak/auth/)
//! - `KEYCLOAK_ADMIN_PASSWORD`: password of the master realm admin (default: admin)
//! - `RUST_LOG`: Log level (default: info)

use anyhow::Context;
use keycloak_setup::{provision, SetupConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keycloak_setup::init_logging();

    let config = SetupConfig::from_env();
    tracing::info!(server = %config.server_url, "Provisioning Keycloak");

    provision(&config)
        .await
        .context("Keycloak provisioning failed")
}
