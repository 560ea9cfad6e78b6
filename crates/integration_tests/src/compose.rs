//! Docker compose sessions.
//!
//! A [`ComposeSession`] is one uniquely named compose project started for a
//! single scenario. [`ComposeSession::run`] brings it up, hands it to the
//! scenario body, dumps service logs if the body failed and always tears the
//! project down afterwards.

use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::command::{display_command, CommandOutput, CommandRunner, ProcessRunner};
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::host::ServiceHost;
use crate::retry::{try_retry_until_success, PollConfig};

#[cfg(test)]
#[path = "compose_tests.rs"]
mod tests;

/// Compose file added to every session when the override option is enabled.
pub const COMPOSE_OVERRIDE_FILE: &str = "compose.override.yml";

/// Number of `up` attempts before giving up on a session.
pub const UP_ATTEMPTS: u32 = 3;

/// Number of `ps -q` checks made while waiting for `down` to complete.
pub const SHUTDOWN_ATTEMPTS: u32 = 30;

/// Which compose implementation drives the sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    /// `docker compose` (v2 plugin).
    Plugin,
    /// Standalone `docker-compose` (v1).
    Standalone,
}

impl ComposeFlavor {
    /// Find a usable compose implementation, preferring the v2 plugin.
    pub async fn detect(runner: &dyn CommandRunner) -> Result<Self, HarnessError> {
        if matches!(
            runner.run("docker", &["compose".to_string(), "version".to_string()]).await,
            Ok(output) if output.succeeded()
        ) {
            return Ok(Self::Plugin);
        }

        debug!("docker compose v2 unavailable, trying docker-compose");
        if matches!(
            runner.run("docker-compose", &["version".to_string()]).await,
            Ok(output) if output.succeeded()
        ) {
            info!("Falling back to the standalone docker-compose command");
            return Ok(Self::Standalone);
        }

        Err(HarnessError::ComposeUnavailable)
    }

    fn program(self) -> &'static str {
        match self {
            Self::Plugin => "docker",
            Self::Standalone => "docker-compose",
        }
    }
}

/// What a scenario needs from the compose stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeSpec {
    /// Scenario name, used for the log dump file name.
    pub scenario: String,
    /// Compose files, relative to the compose directory.
    pub files: Vec<String>,
    /// Services to start; empty means every service of the compose files.
    pub services: Vec<String>,
}

impl ComposeSpec {
    /// A scenario using `compose.yml` and all of its services.
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            files: vec!["compose.yml".to_string()],
            services: Vec::new(),
        }
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }
}

/// A running compose project.
pub struct ComposeSession {
    runner: Arc<dyn CommandRunner>,
    flavor: ComposeFlavor,
    project_name: String,
    compose_files: Vec<PathBuf>,
    services: Vec<String>,
    scenario: String,
    config: HarnessConfig,
    stopped: AtomicBool,
}

impl std::fmt::Debug for ComposeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeSession")
            .field("flavor", &self.flavor)
            .field("project_name", &self.project_name)
            .field("compose_files", &self.compose_files)
            .field("scenario", &self.scenario)
            .finish()
    }
}

impl ComposeSession {
    /// Start a session, run `body` against it and tear it down.
    ///
    /// Service logs are dumped to `<logs_dir>/<scenario>.logs` when the
    /// session fails to start or when `body` returns an error or panics.
    /// Teardown happens in every case; the error of `body` is returned
    /// unchanged and a panic is resumed once the project is down.
    pub async fn run<F, Fut, T, E>(config: HarnessConfig, spec: ComposeSpec, body: F) -> Result<T, E>
    where
        F: FnOnce(Arc<ComposeSession>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<HarnessError>,
    {
        Self::run_with(Arc::new(ProcessRunner), config, spec, body).await
    }

    /// [`ComposeSession::run`] with a custom [`CommandRunner`].
    pub async fn run_with<F, Fut, T, E>(
        runner: Arc<dyn CommandRunner>,
        config: HarnessConfig,
        spec: ComposeSpec,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Arc<ComposeSession>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<HarnessError>,
    {
        let session = Arc::new(Self::create(runner, config, spec).await?);

        let outcome = match session.start().await {
            Ok(()) => AssertUnwindSafe(body(session.clone())).catch_unwind().await,
            Err(e) => Ok(Err(E::from(e))),
        };

        if !matches!(outcome, Ok(Ok(_))) {
            match session.dump_logs().await {
                Ok(path) => info!(path = %path.display(), "Dumped compose logs"),
                Err(e) => error!(error = %e, "Failed to dump compose logs"),
            }
        }

        let stopped = session.stop().await;

        match outcome {
            Ok(Ok(value)) => {
                stopped?;
                Ok(value)
            }
            Ok(Err(e)) => {
                if let Err(stop_error) = stopped {
                    error!(error = %stop_error, "Failed to stop compose session");
                }
                Err(e)
            }
            Err(panic) => {
                if let Err(stop_error) = stopped {
                    error!(error = %stop_error, "Failed to stop compose session");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Prepare a session without starting anything.
    ///
    /// The compose implementation is detected here, so this fails with
    /// [`HarnessError::ComposeUnavailable`] on hosts without docker compose.
    pub async fn create(
        runner: Arc<dyn CommandRunner>,
        config: HarnessConfig,
        spec: ComposeSpec,
    ) -> Result<Self, HarnessError> {
        let flavor = ComposeFlavor::detect(runner.as_ref()).await?;
        let compose_files = resolve_compose_files(&config, &spec.files);
        let project_name = test_utils::generate_project_name();

        info!(
            project = %project_name,
            files = ?compose_files,
            "Prepared compose session"
        );

        Ok(Self {
            runner,
            flavor,
            project_name,
            compose_files,
            services: spec.services,
            scenario: spec.scenario,
            config,
            stopped: AtomicBool::new(false),
        })
    }

    /// Pull images and bring the requested services up.
    ///
    /// `up --wait` is attempted [`UP_ATTEMPTS`] times; the last failure is
    /// returned.
    pub async fn start(&self) -> Result<(), HarnessError> {
        info!(project = %self.project_name, "Starting the compose session");
        self.check_compose_output(&["pull", "--ignore-pull-failures"])
            .await?;

        let mut up_args = vec!["up", "--wait", "-d"];
        up_args.extend(self.services.iter().map(String::as_str));

        for attempt in 1..=UP_ATTEMPTS {
            match self.check_compose_output(&up_args).await {
                Ok(_) => break,
                Err(e) if attempt < UP_ATTEMPTS => {
                    warn!(attempt = attempt, error = %e, "Failed to converge, retrying");
                }
                Err(e) => {
                    error!(error = %e, "Failed to converge, giving up");
                    return Err(e);
                }
            }
        }

        let services = self.check_compose_output(&["ps", "--services"]).await?;
        info!(
            project = %self.project_name,
            services = services.lines().count(),
            "Compose session started"
        );
        Ok(())
    }

    /// Kill the containers and remove the project with its volumes.
    ///
    /// Containers are killed first, which is much faster than a clean
    /// shutdown; kill failures are ignored since a container may already be
    /// gone because another one stopped.
    pub async fn stop(&self) -> Result<(), HarnessError> {
        info!(project = %self.project_name, "Stopping the compose session");

        let containers = self.check_compose_output(&["ps", "-q"]).await?;
        let ids: Vec<String> = containers.split_whitespace().map(str::to_string).collect();
        if !ids.is_empty() {
            let mut kill = vec!["kill".to_string()];
            kill.extend(ids);
            match self.runner.run("docker", &kill).await {
                Ok(output) if !output.succeeded() => {
                    debug!(stderr = %output.stderr, "docker kill reported an error");
                }
                Err(e) => debug!(error = %e, "docker kill failed"),
                Ok(_) => {}
            }
        }

        self.check_compose_output(&["down", "--volumes", "--remove-orphans"])
            .await?;
        self.stopped.store(true, Ordering::SeqCst);

        try_retry_until_success(
            PollConfig::attempts(SHUTDOWN_ATTEMPTS),
            "Failed to shut compose down",
            || async { Ok::<_, HarnessError>(self.check_compose_output(&["ps", "-q"]).await?.is_empty()) },
        )
        .await?;

        info!(project = %self.project_name, "All the services are stopped");
        Ok(())
    }

    /// Append the logs of every service to `<logs_dir>/<scenario>.logs`.
    pub async fn dump_logs(&self) -> Result<PathBuf, HarnessError> {
        tokio::fs::create_dir_all(&self.config.logs_dir).await?;
        let path = self.config.logs_dir.join(format!("{}.logs", self.scenario));
        warn!(
            scenario = %self.scenario,
            path = %path.display(),
            "Scenario failed, dumping service logs"
        );

        let services = self
            .check_compose_output(&["ps", "--services", "--all"])
            .await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        for service in services.lines().filter(|s| !s.is_empty()) {
            let logs = self.check_compose_output(&["logs", "-t", service]).await?;
            file.write_all(logs.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        file.flush().await?;

        Ok(path)
    }

    /// Run `<compose> <args>` and return its output, successful or not.
    pub async fn compose_output(&self, args: &[&str]) -> Result<CommandOutput, HarnessError> {
        let args = self.compose_args(args);
        self.runner.run(self.flavor.program(), &args).await
    }

    /// Run `<compose> <args>` and return stdout without trailing line breaks.
    pub async fn check_compose_output(&self, args: &[&str]) -> Result<String, HarnessError> {
        let args = self.compose_args(args);
        self.runner.check_output(self.flavor.program(), &args).await
    }

    /// Host port bound to `port` of `service`.
    pub async fn service_port(&self, service: &str, port: u16) -> Result<u16, HarnessError> {
        let output = self
            .check_compose_output(&["port", service, &port.to_string()])
            .await?;
        parse_port_mapping(service, &output)
    }

    /// URL of `service` as reachable from the tests.
    ///
    /// Tests may themselves run inside a container, so the docker network
    /// gateway is used instead of `localhost`.
    pub async fn service_url(
        &self,
        service: &str,
        gateway_ip: &str,
        port: u16,
    ) -> Result<String, HarnessError> {
        let bound = self.service_port(service, port).await?;
        Ok(format!("http://{gateway_ip}:{bound}"))
    }

    /// Id of the (first) container of `service`.
    pub async fn container_id(&self, service: &str) -> Result<String, HarnessError> {
        let output = self.check_compose_output(&["ps", "-q", service]).await?;
        output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| HarnessError::ServiceNotFound(service.to_string()))
    }

    /// Wait until a container of `service` is running and return its name.
    pub async fn running_container(
        &self,
        service: &str,
        poll: PollConfig,
    ) -> Result<String, HarnessError> {
        let found = try_retry_until_success(
            poll,
            &format!("No running container for {service}"),
            || async {
                let output = self
                    .check_compose_output(&["ps", "--status", "running", "--format", "{{.Name}}", service])
                    .await?;
                Ok::<_, HarnessError>(output.trim().to_string())
            },
        )
        .await;

        match found {
            Err(HarnessError::RetryExhausted { .. }) => {
                Err(HarnessError::ServiceNotFound(service.to_string()))
            }
            other => other,
        }
    }

    /// Command handle on the container of `service`.
    pub async fn host(&self, service: &str) -> Result<ServiceHost, HarnessError> {
        let container = self.container_id(service).await?;
        Ok(self.host_for_container(service, container))
    }

    /// Command handle on an already known container.
    pub fn host_for_container(&self, service: &str, container: String) -> ServiceHost {
        ServiceHost::new(
            self.runner.clone(),
            service,
            container,
            self.config.wait_for_it_timeout,
        )
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn flavor(&self) -> ComposeFlavor {
        self.flavor
    }

    pub fn compose_files(&self) -> &[PathBuf] {
        &self.compose_files
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        self.runner.clone()
    }

    fn compose_args(&self, extra: &[&str]) -> Vec<String> {
        let mut args = Vec::new();
        if self.flavor == ComposeFlavor::Plugin {
            args.push("compose".to_string());
        }
        args.push("-p".to_string());
        args.push(self.project_name.clone());
        for file in &self.compose_files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        args.extend(extra.iter().map(|a| a.to_string()));
        args
    }
}

impl Drop for ComposeSession {
    fn drop(&mut self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        // Best-effort cleanup when the session was never stopped.
        let args = self.compose_args(&["down", "--volumes", "--remove-orphans"]);
        warn!(
            command = %display_command(self.flavor.program(), &args),
            "Compose session dropped while running, shutting it down"
        );
        match self.runner.run_blocking(self.flavor.program(), &args) {
            Ok(output) if !output.succeeded() => {
                warn!(stderr = %output.stderr, "Failed to shut down compose session")
            }
            Err(e) => warn!(error = %e, "Failed to shut down compose session"),
            Ok(_) => {}
        }
    }
}

/// Compose files of a session, made absolute against the compose directory.
fn resolve_compose_files(config: &HarnessConfig, files: &[String]) -> Vec<PathBuf> {
    let mut names: Vec<&str> = files.iter().map(String::as_str).collect();
    if config.use_compose_override
        && !names.contains(&COMPOSE_OVERRIDE_FILE)
        && config.compose_dir.join(COMPOSE_OVERRIDE_FILE).is_file()
    {
        names.push(COMPOSE_OVERRIDE_FILE);
    }
    names
        .into_iter()
        .map(|name| absolute(&config.compose_dir, name))
        .collect()
}

fn absolute(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::path::absolute(&path).unwrap_or(path)
}

/// Parse `docker compose port` output (`host:port`, possibly `[::]:port`).
pub fn parse_port_mapping(service: &str, output: &str) -> Result<u16, HarnessError> {
    output
        .lines()
        .next()
        .and_then(|line| line.trim().rsplit_once(':'))
        .and_then(|(_, port)| port.parse().ok())
        .ok_or_else(|| HarnessError::InvalidPortMapping {
            service: service.to_string(),
            output: output.to_string(),
        })
}
