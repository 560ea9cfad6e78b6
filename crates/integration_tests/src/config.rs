//! Harness configuration and logging setup.
//!
//! Everything is driven by environment variables so that the same test binary
//! runs from a developer checkout and from CI.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::HarnessError;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Directory holding the compose files.
pub const COMPOSE_DIR_VAR: &str = "SWH_COMPOSE_DIR";
/// Adds `compose.override.yml` to the compose files when set to a true value.
pub const USE_COMPOSE_OVERRIDE_VAR: &str = "SWH_USE_COMPOSE_OVERRIDE";
/// Where service logs are dumped when a scenario fails.
pub const LOGS_DIR_VAR: &str = "SWH_TEST_LOGS_DIR";
/// Timeout of `wait-for-it` invocations, in seconds.
pub const WAIT_FOR_IT_TIMEOUT_VAR: &str = "SWH_WAIT_FOR_IT_TIMEOUT";

/// Default `wait-for-it` timeout.
pub const WFI_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration of a test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Directory the compose files are resolved against.
    pub compose_dir: PathBuf,
    /// Whether `compose.override.yml` is added to every session.
    pub use_compose_override: bool,
    /// Where `<scenario>.logs` files are written on failure.
    pub logs_dir: PathBuf,
    /// Timeout used by [`crate::host::ServiceHost::wait_for`].
    pub wait_for_it_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            compose_dir: PathBuf::from("."),
            use_compose_override: false,
            logs_dir: default_logs_dir(),
            wait_for_it_timeout: WFI_TIMEOUT,
        }
    }
}

impl HarnessConfig {
    /// Load the configuration from environment variables.
    ///
    /// Recognised variables:
    /// - `SWH_COMPOSE_DIR`: compose files directory (default `.`)
    /// - `SWH_USE_COMPOSE_OVERRIDE`: `1`, `true` or `yes` to enable the override file
    /// - `SWH_TEST_LOGS_DIR`: log dump directory (default `<tmp>/swh-tests/docker`)
    /// - `SWH_WAIT_FOR_IT_TIMEOUT`: seconds (default 120)
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, HarnessError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let compose_dir = lookup(COMPOSE_DIR_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.compose_dir);

        let use_compose_override = match lookup(USE_COMPOSE_OVERRIDE_VAR) {
            Some(value) => parse_flag(USE_COMPOSE_OVERRIDE_VAR, &value)?,
            None => defaults.use_compose_override,
        };

        let logs_dir = lookup(LOGS_DIR_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.logs_dir);

        let wait_for_it_timeout = match lookup(WAIT_FOR_IT_TIMEOUT_VAR) {
            Some(value) => {
                let seconds = value.trim().parse::<u64>().map_err(|e| HarnessError::Config {
                    variable: WAIT_FOR_IT_TIMEOUT_VAR.to_string(),
                    message: format!("expected a number of seconds, got {value:?}: {e}"),
                })?;
                Duration::from_secs(seconds)
            }
            None => defaults.wait_for_it_timeout,
        };

        Ok(Self {
            compose_dir,
            use_compose_override,
            logs_dir,
            wait_for_it_timeout,
        })
    }

    /// Point the configuration at another compose directory.
    pub fn with_compose_dir(mut self, compose_dir: impl Into<PathBuf>) -> Self {
        self.compose_dir = compose_dir.into();
        self
    }

    /// Send log dumps to another directory.
    pub fn with_logs_dir(mut self, logs_dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = logs_dir.into();
        self
    }
}

fn default_logs_dir() -> PathBuf {
    env::temp_dir().join("swh-tests").join("docker")
}

fn parse_flag(variable: &str, value: &str) -> Result<bool, HarnessError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(HarnessError::Config {
            variable: variable.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

/// Initialize logging for integration tests.
///
/// Honours `RUST_LOG` and defaults to `info`. Calling it more than once is
/// harmless, every scenario test does.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_test_writer()
        .try_init();
}
