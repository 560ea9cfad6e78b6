//! Building blocks shared by the scenario tests.
//!
//! [`Platform`] wraps a started [`ComposeSession`] with the addresses tests
//! talk to (nginx, the public API, the Kafka REST proxy) and the service
//! containers commands are run in.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::compose::ComposeSession;
use crate::error::HarnessError;
use crate::host::{shell_quote, ServiceHost};
use crate::http::ApiClient;
use crate::retry::PollConfig;

#[cfg(test)]
#[path = "fixtures_tests.rs"]
mod tests;

/// Small git repository loaded by default.
pub const TINY_GIT_REPO: &str = "https://gitlab.softwareheritage.org/swh/devel/swh-py-template.git";
/// Bigger git repository for scenarios needing more objects.
pub const SMALL_GIT_REPO: &str = "https://gitlab.softwareheritage.org/swh/devel/swh-counters.git";
/// A fork of [`TINY_GIT_REPO`], sharing most of its objects.
pub const FORK_GIT_REPO: &str = "https://gitlab.softwareheritage.org/lunar/swh-py-template.git";

/// Address of Keycloak inside the compose network.
pub const KEYCLOAK_OIDC_URL: &str = "http://keycloak:8080/keycloak/auth/";

/// An origin to load: visit type and one or more alternative URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginSpec {
    pub visit_type: String,
    pub urls: Vec<String>,
}

impl OriginSpec {
    pub fn new(visit_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            visit_type: visit_type.into(),
            urls: vec![url.into()],
        }
    }

    pub fn git(url: impl Into<String>) -> Self {
        Self::new("git", url)
    }

    /// An origin served from several mirrors; the first reachable one is used.
    pub fn alternatives<I, S>(visit_type: impl Into<String>, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            visit_type: visit_type.into(),
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }
}

/// Origins loaded when a scenario does not ask for anything else.
pub fn default_origins() -> Vec<OriginSpec> {
    vec![OriginSpec::git(TINY_GIT_REPO)]
}

/// An origin that has been loaded into the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedOrigin {
    pub visit_type: String,
    pub url: String,
}

/// Name of the loader handling `visit_type`.
pub fn loader_name(visit_type: &str) -> &str {
    match visit_type {
        "hg" => "mercurial",
        other => other,
    }
}

/// Pick the first URL of `spec` that answers successfully.
///
/// Falls back to the first URL when none answers, so that the loader reports
/// the actual failure.
pub async fn resolve_origin(client: &reqwest::Client, spec: &OriginSpec) -> Option<String> {
    if spec.urls.len() > 1 {
        for url in &spec.urls {
            match client.get(url).send().await {
                Ok(response) if response.status().is_success() => return Some(url.clone()),
                Ok(response) => {
                    debug!(url = %url, status = response.status().as_u16(), "Origin mirror unavailable")
                }
                Err(e) => debug!(url = %url, error = %e, "Origin mirror unreachable"),
            }
        }
    }
    spec.urls.first().cloned()
}

/// A started platform and the addresses to reach it.
#[derive(Debug, Clone)]
pub struct Platform {
    session: Arc<ComposeSession>,
    gateway_ip: String,
    nginx_url: String,
}

impl Platform {
    /// Locate the public entry points of `session`.
    ///
    /// Tests may run inside a container themselves, so services are reached
    /// through the docker network gateway, as reported by `docker-helper`.
    pub async fn connect(session: Arc<ComposeSession>) -> Result<Self, HarnessError> {
        let helper = session.host("docker-helper").await?;
        let gateway_ip = helper
            .check_output("curl -s http://localhost/gateway/")
            .await?
            .trim()
            .to_string();
        if gateway_ip.is_empty() {
            return Err(HarnessError::UnexpectedResponse {
                source_name: "docker-helper".to_string(),
                message: "empty gateway address".to_string(),
            });
        }
        let nginx_url = session.service_url("nginx", &gateway_ip, 80).await?;
        info!(gateway = %gateway_ip, nginx = %nginx_url, "Platform is reachable");

        Ok(Self {
            session,
            gateway_ip,
            nginx_url,
        })
    }

    pub fn session(&self) -> &ComposeSession {
        &self.session
    }

    pub fn gateway_ip(&self) -> &str {
        &self.gateway_ip
    }

    pub fn nginx_url(&self) -> &str {
        &self.nginx_url
    }

    /// `<nginx>/api/1/`
    pub fn api_url(&self) -> String {
        format!("{}/api/1/", self.nginx_url)
    }

    /// `<nginx>/kafka/v3/clusters`
    pub fn kafka_api_url(&self) -> String {
        format!("{}/kafka/v3/clusters", self.nginx_url)
    }

    /// Client of the public web API.
    pub fn api(&self) -> Result<ApiClient, HarnessError> {
        ApiClient::new(&self.api_url())
    }

    /// Client of everything served by nginx.
    pub fn nginx(&self) -> Result<ApiClient, HarnessError> {
        ApiClient::new(&format!("{}/", self.nginx_url))
    }

    /// URL of another service with a published port.
    pub async fn service_url(&self, service: &str, port: u16) -> Result<String, HarnessError> {
        self.session.service_url(service, &self.gateway_ip, port).await
    }

    /// Container of `service`, once `target` accepts connections.
    pub async fn host_waiting_for(
        &self,
        service: &str,
        target: &str,
    ) -> Result<ServiceHost, HarnessError> {
        let host = self.session.host(service).await?;
        host.wait_for_default(target).await?;
        Ok(host)
    }

    pub async fn loader_host(&self) -> Result<ServiceHost, HarnessError> {
        self.host_waiting_for("swh-loader", "swh-storage:5002").await
    }

    pub async fn scheduler_host(&self) -> Result<ServiceHost, HarnessError> {
        self.host_waiting_for("swh-scheduler", "swh-storage:5002").await
    }

    pub async fn webapp_host(&self) -> Result<ServiceHost, HarnessError> {
        self.host_waiting_for("swh-web", "swh-storage:5002").await
    }

    pub async fn lister_host(&self) -> Result<ServiceHost, HarnessError> {
        self.host_waiting_for("swh-lister", "swh-scheduler:5008").await
    }

    pub async fn deposit_host(&self) -> Result<ServiceHost, HarnessError> {
        self.host_waiting_for("swh-deposit", "swh-deposit:5006").await
    }

    /// The `swh-alter` container, once its graph mock answers.
    pub async fn alter_host(&self) -> Result<ServiceHost, HarnessError> {
        let container = self
            .session
            .running_container(
                "swh-alter",
                PollConfig::attempts(10).with_interval(Duration::from_secs(5)),
            )
            .await?;
        let host = self.session.host_for_container("swh-alter", container);
        host.wait_for("swh-alter:5009", Duration::from_secs(60))
            .await?;
        Ok(host)
    }

    /// Load `origins` into the archive with `swh loader run`.
    pub async fn load_origins(
        &self,
        origins: &[OriginSpec],
    ) -> Result<Vec<LoadedOrigin>, HarnessError> {
        let loader = self.loader_host().await?;
        load_origins_with(&loader, origins).await
    }
}

/// Load `origins` from an already available loader container.
pub async fn load_origins_with(
    loader: &ServiceHost,
    origins: &[OriginSpec],
) -> Result<Vec<LoadedOrigin>, HarnessError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|source| HarnessError::Http {
            url: String::new(),
            source,
        })?;

    let mut loaded = Vec::with_capacity(origins.len());
    for spec in origins {
        let Some(url) = resolve_origin(&client, spec).await else {
            warn!(visit_type = %spec.visit_type, "Origin without any URL, skipped");
            continue;
        };

        info!(visit_type = %spec.visit_type, url = %url, "Loading origin");
        let started = Instant::now();
        loader
            .check_output(&format!(
                "swh loader run {} {}",
                loader_name(&spec.visit_type),
                shell_quote(&url)
            ))
            .await?;
        info!(
            url = %url,
            elapsed = %format!("{:.2}s", started.elapsed().as_secs_f64()),
            "Origin loaded"
        );

        loaded.push(LoadedOrigin {
            visit_type: spec.visit_type.clone(),
            url,
        });
    }
    Ok(loaded)
}

/// Get an OIDC bearer token for `username` from Keycloak.
///
/// Returns `None` on failure: Keycloak may still be starting, so callers
/// usually wrap this in [`crate::retry::retry_until_success`].
pub async fn generate_bearer_token(
    host: &ServiceHost,
    username: &str,
    password: &str,
) -> Option<String> {
    let command = format!(
        "swh auth --oidc-server-url {KEYCLOAK_OIDC_URL} --realm-name SoftwareHeritage \
         --client-id swh-web generate-token {} --password {}",
        shell_quote(username),
        shell_quote(password)
    );
    match host.check_output(&command).await {
        Ok(token) if !token.trim().is_empty() => Some(token.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Could not generate a bearer token yet");
            None
        }
    }
}
