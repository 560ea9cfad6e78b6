//! Integration-test harness for the Software Heritage docker environment.
//!
//! The harness starts combinations of archive services with docker compose,
//! drives them through realistic workflows and checks the resulting state.
//! The scenarios themselves live under `tests/`, one file per scenario; this
//! library provides what they share:
//!
//! - [`retry`]: fixed-interval polling until a condition holds
//! - [`http`]: a small client for the archive's web APIs
//! - [`compose`]: one uniquely named compose project per scenario
//! - [`host`]: commands run inside service containers
//! - [`fixtures`]: the started platform, origin loading, auth tokens
//! - [`kafka`], [`alter`], [`swhid`]: scenario-specific helpers

pub mod alter;
pub mod command;
pub mod compose;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod host;
pub mod http;
pub mod kafka;
pub mod retry;
pub mod swhid;

#[cfg(test)]
mod test_support;

pub use command::{CommandOutput, CommandRunner, ProcessRunner};
pub use compose::{ComposeFlavor, ComposeSession, ComposeSpec};
pub use config::{init_logging, HarnessConfig, WFI_TIMEOUT};
pub use error::{HarnessError, Result};
pub use fixtures::{generate_bearer_token, LoadedOrigin, OriginSpec, Platform};
pub use host::ServiceHost;
pub use http::{quote_plus, ApiClient, DirectoryEntry, EntryKind};
pub use retry::{retry_until_success, try_retry_until_success, PollConfig, Truthy};
pub use swhid::Swhid;

// Re-export the project naming helpers used by the cleanup tooling.
pub use test_utils::{generate_project_name, PROJECT_PREFIX};
