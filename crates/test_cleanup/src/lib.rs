//! Cleanup of leftover integration test environments.
//!
//! Every compose project started by the integration tests is named with the
//! `swh_test_` prefix. A test run that crashes or gets killed leaves its
//! containers, volumes and networks behind; this crate finds them through the
//! Docker Engine API and removes the ones older than a given age. It can be
//! used both programmatically and through the `cleanup-orphans` binary.

use anyhow::{Context, Result, anyhow};
use bollard::Docker;
use bollard::container::{ListContainersOptions, RemoveContainerOptions};
use bollard::network::ListNetworksOptions;
use bollard::service::ContainerSummary;
use bollard::volume::{ListVolumesOptions, RemoveVolumeOptions};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{BTreeSet, HashMap};
use std::env;
use test_utils::PROJECT_PREFIX;
use tracing::{debug, info, warn};

/// Label set by docker compose on every object of a project.
pub const PROJECT_LABEL: &str = "com.docker.compose.project";

/// Default age, in hours, past which a test project is an orphan.
pub const DEFAULT_MAX_AGE_HOURS: u64 = 1;

/// Configuration for cleanup operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupConfig {
    /// Projects whose containers are older than this are removed.
    pub max_age_hours: u64,
    /// Docker Engine API endpoint; the local socket when unset.
    pub docker_host: Option<String>,
}

impl CleanupConfig {
    /// Configuration for the given age, with the Docker endpoint taken from
    /// `DOCKER_HOST_URL` when set.
    pub fn from_env(max_age_hours: u64) -> Self {
        let docker_host = env::var("DOCKER_HOST_URL")
            .ok()
            .filter(|url| !url.is_empty());
        Self {
            max_age_hours,
            docker_host,
        }
    }

    /// Connect to the configured Docker daemon.
    pub fn connect(&self) -> Result<Docker> {
        match &self.docker_host {
            Some(url) => Docker::connect_with_http(url, 120, &bollard::API_DEFAULT_VERSION)
                .with_context(|| format!("Failed to connect to Docker at {url}")),
            None => Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon"),
        }
    }
}

/// Whether a compose project was started by the integration tests.
pub fn is_test_project(project: &str) -> bool {
    project.len() > PROJECT_PREFIX.len() && project.starts_with(PROJECT_PREFIX)
}

/// Instant `max_age_hours` before `now`.
///
/// Fails when the age does not fit in the supported date range.
pub fn cutoff_time(now: DateTime<Utc>, max_age_hours: u64) -> Result<DateTime<Utc>> {
    i64::try_from(max_age_hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| anyhow!("Maximum age of {max_age_hours} hours is out of range"))
}

/// Test projects having at least one container created before `cutoff`.
///
/// Containers without a creation date are never considered stale.
pub fn stale_projects(containers: &[ContainerSummary], cutoff: DateTime<Utc>) -> BTreeSet<String> {
    containers
        .iter()
        .filter_map(|container| {
            let project = container.labels.as_ref()?.get(PROJECT_LABEL)?;
            let created = DateTime::from_timestamp(container.created?, 0)?;
            (is_test_project(project) && created < cutoff).then(|| project.clone())
        })
        .collect()
}

fn project_of(labels: Option<&HashMap<String, String>>) -> Option<&str> {
    labels?.get(PROJECT_LABEL).map(String::as_str)
}

fn project_filter() -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), vec![PROJECT_LABEL.to_string()])])
}

/// What a cleanup pass removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub projects: BTreeSet<String>,
    pub containers: Vec<String>,
    pub volumes: Vec<String>,
    pub networks: Vec<String>,
}

/// Removal of orphaned compose projects.
pub struct ProjectCleanup {
    docker: Docker,
}

impl ProjectCleanup {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Remove every test project with a container older than
    /// `max_age_hours`, along with its volumes and networks.
    ///
    /// Removal is best effort: objects that cannot be removed are logged and
    /// skipped, listing failures are errors.
    pub async fn cleanup_orphaned_projects(&self, max_age_hours: u64) -> Result<CleanupReport> {
        let cutoff = cutoff_time(Utc::now(), max_age_hours)?;
        info!(max_age_hours, cutoff = %cutoff, "Searching for orphaned test projects");

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters: project_filter(),
                ..Default::default()
            }))
            .await
            .context("Failed to list containers")?;

        let projects = stale_projects(&containers, cutoff);
        if projects.is_empty() {
            info!("No orphaned test project found");
            return Ok(CleanupReport::default());
        }
        info!(count = projects.len(), "Found orphaned test projects");

        let mut report = CleanupReport {
            projects: projects.clone(),
            ..Default::default()
        };

        for container in &containers {
            let Some(project) = project_of(container.labels.as_ref()) else {
                continue;
            };
            let Some(id) = container.id.as_deref() else {
                continue;
            };
            if !projects.contains(project) {
                continue;
            }
            match self
                .docker
                .remove_container(
                    id,
                    Some(RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                Ok(()) => {
                    debug!(project, container = id, "Removed container");
                    report.containers.push(id.to_string());
                }
                Err(e) => warn!(project, container = id, error = %e, "Failed to remove container"),
            }
        }

        let volumes = self
            .docker
            .list_volumes(Some(ListVolumesOptions::<String> {
                filters: project_filter(),
            }))
            .await
            .context("Failed to list volumes")?;
        for volume in volumes.volumes.unwrap_or_default() {
            let Some(project) = project_of(Some(&volume.labels)) else {
                continue;
            };
            if !projects.contains(project) {
                continue;
            }
            match self
                .docker
                .remove_volume(&volume.name, Some(RemoveVolumeOptions { force: true }))
                .await
            {
                Ok(()) => {
                    debug!(project, volume = %volume.name, "Removed volume");
                    report.volumes.push(volume.name.clone());
                }
                Err(e) => warn!(project, volume = %volume.name, error = %e, "Failed to remove volume"),
            }
        }

        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions::<String> {
                filters: project_filter(),
            }))
            .await
            .context("Failed to list networks")?;
        for network in networks {
            let Some(project) = project_of(network.labels.as_ref()) else {
                continue;
            };
            let Some(name) = network.name.as_deref() else {
                continue;
            };
            if !projects.contains(project) {
                continue;
            }
            match self.docker.remove_network(name).await {
                Ok(()) => {
                    debug!(project, network = name, "Removed network");
                    report.networks.push(name.to_string());
                }
                Err(e) => warn!(project, network = name, error = %e, "Failed to remove network"),
            }
        }

        info!(
            projects = report.projects.len(),
            containers = report.containers.len(),
            volumes = report.volumes.len(),
            networks = report.networks.len(),
            "Cleanup completed"
        );
        Ok(report)
    }
}

/// Initialize logging for cleanup operations.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
