//! Container and network lookups.

use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::network::InspectNetworkOptions;
use bollard::service::{ContainerSummary, Network};
use bollard::Docker;

use crate::errors::HelperError;

#[cfg(test)]
#[path = "docker_tests.rs"]
mod tests;

const PROJECT_LABEL: &str = "com.docker.compose.project";
const SERVICE_LABEL: &str = "com.docker.compose.service";

/// Where the helper reads container and network state from.
#[async_trait]
pub trait ContainerSource: Send + Sync {
    /// Running containers.
    async fn containers(&self) -> Result<Vec<ContainerSummary>, HelperError>;

    /// Details of the network called `name`.
    async fn network(&self, name: &str) -> Result<Network, HelperError>;
}

/// [`ContainerSource`] backed by the Docker Engine API.
pub struct BollardDocker {
    docker: Docker,
}

impl BollardDocker {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect over plain HTTP, typically to a docker socket proxy.
    pub fn connect(url: &str) -> Result<Self, HelperError> {
        let docker = Docker::connect_with_http(url, 30, &bollard::API_DEFAULT_VERSION)?;
        Ok(Self::new(docker))
    }
}

#[async_trait]
impl ContainerSource for BollardDocker {
    async fn containers(&self) -> Result<Vec<ContainerSummary>, HelperError> {
        Ok(self
            .docker
            .list_containers(None::<ListContainersOptions<String>>)
            .await?)
    }

    async fn network(&self, name: &str) -> Result<Network, HelperError> {
        Ok(self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await?)
    }
}

fn label<'a>(container: &'a ContainerSummary, name: &str) -> Option<&'a str> {
    container.labels.as_ref()?.get(name).map(String::as_str)
}

/// Public port of `service` in `project`.
///
/// Exactly one container must belong to the service; its first port bound
/// on `0.0.0.0` for container port 80 is returned.
pub fn public_port(
    containers: &[ContainerSummary],
    project: &str,
    service: &str,
) -> Result<u16, HelperError> {
    let matching: Vec<&ContainerSummary> = containers
        .iter()
        .filter(|c| label(c, PROJECT_LABEL) == Some(project) && label(c, SERVICE_LABEL) == Some(service))
        .collect();

    let [container] = matching.as_slice() else {
        return Err(HelperError::ContainerCount {
            service: service.to_string(),
            count: matching.len(),
        });
    };

    container
        .ports
        .iter()
        .flatten()
        .filter(|p| p.ip.as_deref() == Some("0.0.0.0") && p.private_port == 80)
        .find_map(|p| p.public_port)
        .ok_or_else(|| HelperError::NoPublicPort {
            service: service.to_string(),
        })
}

/// Name of the network compose creates for `project` by default.
pub fn default_network_name(project: &str) -> String {
    format!("{project}_default")
}

/// First gateway address configured on `network`.
pub fn gateway(network: &Network) -> Option<&str> {
    network
        .ipam
        .as_ref()?
        .config
        .iter()
        .flatten()
        .find_map(|config| config.gateway.as_deref())
}
