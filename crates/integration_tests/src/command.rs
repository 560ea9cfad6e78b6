//! Process execution.
//!
//! Everything the harness does to the compose stack goes through a
//! [`CommandRunner`]: the real [`ProcessRunner`] spawns processes, while unit
//! tests substitute a scripted runner to check the exact command lines issued.

use async_trait::async_trait;
use std::process::Output;
use tracing::trace;

use crate::error::HarnessError;

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful output with the given stdout.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given exit code and stderr.
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0.
    pub fn succeeded(&self) -> bool {
        self.status == Some(0)
    }

    /// Standard output decoded as UTF-8 (lossily).
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Turn a failed command into a [`HarnessError::CommandFailed`], or
    /// return its stdout with trailing line breaks stripped.
    pub fn into_checked(self, command: &str) -> Result<String, HarnessError> {
        if self.succeeded() {
            Ok(trim_line_breaks(&self.stdout_lossy()).to_string())
        } else {
            Err(HarnessError::CommandFailed {
                command: command.to_string(),
                status: self.status,
                stdout: self.stdout_lossy(),
                stderr: self.stderr,
            })
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Strip trailing `\r` and `\n` characters.
pub fn trim_line_breaks(value: &str) -> &str {
    value.trim_end_matches(['\r', '\n'])
}

/// Render a command line for logs and error messages.
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Spawns commands on behalf of the harness.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion and capture its output.
    ///
    /// A non-zero exit status is not an error at this level; only a failure
    /// to spawn the process is.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HarnessError>;

    /// Blocking variant of [`CommandRunner::run`], used from `Drop`.
    fn run_blocking(&self, program: &str, args: &[String]) -> Result<CommandOutput, HarnessError>;

    /// Run a command and fail unless it exits successfully.
    ///
    /// Returns stdout with trailing line breaks stripped.
    async fn check_output(&self, program: &str, args: &[String]) -> Result<String, HarnessError> {
        let output = self.run(program, args).await?;
        output.into_checked(&display_command(program, args))
    }
}

/// [`CommandRunner`] backed by real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HarnessError> {
        trace!(command = %display_command(program, args), "Running command");
        tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map(CommandOutput::from)
            .map_err(|source| HarnessError::CommandSpawn {
                command: display_command(program, args),
                source,
            })
    }

    fn run_blocking(&self, program: &str, args: &[String]) -> Result<CommandOutput, HarnessError> {
        trace!(command = %display_command(program, args), "Running blocking command");
        std::process::Command::new(program)
            .args(args)
            .output()
            .map(CommandOutput::from)
            .map_err(|source| HarnessError::CommandSpawn {
                command: display_command(program, args),
                source,
            })
    }
}

/// Build an owned argument vector from string slices.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
