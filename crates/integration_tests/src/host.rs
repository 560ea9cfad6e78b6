//! Commands executed inside service containers.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::command::{CommandOutput, CommandRunner};
use crate::error::HarnessError;

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;

/// Handle on one container of a compose session.
///
/// Commands are shell strings run with `docker exec <container> /bin/sh -c`,
/// so pipes and redirections work as they would in the container.
#[derive(Clone)]
pub struct ServiceHost {
    runner: Arc<dyn CommandRunner>,
    service: String,
    container: String,
    wait_timeout: Duration,
}

impl std::fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHost")
            .field("service", &self.service)
            .field("container", &self.container)
            .finish()
    }
}

impl ServiceHost {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        service: impl Into<String>,
        container: impl Into<String>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            service: service.into(),
            container: container.into(),
            wait_timeout,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Run `command` and return its output whatever its exit status.
    pub async fn run(&self, command: &str) -> Result<CommandOutput, HarnessError> {
        debug!(service = %self.service, command = command, "Running command in container");
        self.runner.run("docker", &self.exec_args(command)).await
    }

    /// Run `command`, fail unless it succeeds, and return its stdout
    /// without trailing line breaks.
    pub async fn check_output(&self, command: &str) -> Result<String, HarnessError> {
        let output = self.run(command).await?;
        output.into_checked(&format!("[{}] {}", self.service, command))
    }

    /// Wait until `target` (`host:port`) accepts connections.
    pub async fn wait_for(&self, target: &str, timeout: Duration) -> Result<(), HarnessError> {
        self.check_output(&format!("wait-for-it {target} -t {}", timeout.as_secs()))
            .await
            .map(|_| ())
    }

    /// [`ServiceHost::wait_for`] with the configured default timeout.
    pub async fn wait_for_default(&self, target: &str) -> Result<(), HarnessError> {
        self.wait_for(target, self.wait_timeout).await
    }

    fn exec_args(&self, command: &str) -> Vec<String> {
        vec![
            "exec".to_string(),
            self.container.clone(),
            "/bin/sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]
    }
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
