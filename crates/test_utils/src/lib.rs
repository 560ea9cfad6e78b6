//! Test utilities shared by the integration tests and the cleanup tooling.
//!
//! This crate owns the naming convention of the compose projects started by
//! the integration tests, so that leftovers can be recognised and removed
//! later on by `test_cleanup`.

use std::env;
use tracing::debug;
use uuid::Uuid;

/// Prefix shared by every compose project started by the integration tests.
pub const PROJECT_PREFIX: &str = "swh_test_";

/// Extract the CI context used in compose project names.
///
/// Returns:
/// - `mr{iid}` for merge request pipelines (e.g., "mr123")
/// - `main` for pipelines on the main/master branch
/// - the sanitized branch name for other branch pipelines
/// - `local` for local development
///
/// Uses the GitLab CI variables `CI_MERGE_REQUEST_IID` and `CI_COMMIT_BRANCH`.
pub fn get_workflow_context() -> String {
    if let Ok(iid) = env::var("CI_MERGE_REQUEST_IID") {
        if !iid.is_empty() {
            return format!("mr{}", sanitize_project_component(&iid));
        }
    }

    if let Ok(branch) = env::var("CI_COMMIT_BRANCH") {
        if branch == "main" || branch == "master" {
            return "main".to_string();
        }
        let sanitized = sanitize_project_component(&branch);
        if !sanitized.is_empty() {
            return sanitized;
        }
    }

    // Fallback for local development
    "local".to_string()
}

/// Restrict a string to the characters docker compose accepts in a project
/// name: lowercase ASCII letters, digits, `-` and `_`.
///
/// Any other character is replaced by `-`.
pub fn sanitize_project_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '-',
        })
        .collect()
}

/// Generate a unique compose project name following the naming convention.
///
/// Format: `swh_test_{context}_{uuid}`
///
/// # Examples
///
/// ```
/// use test_utils::generate_project_name;
///
/// let name = generate_project_name();
/// assert!(name.starts_with("swh_test_"));
/// ```
pub fn generate_project_name() -> String {
    let context = get_workflow_context();
    let name = format!("{}{}_{}", PROJECT_PREFIX, context, Uuid::new_v4().simple());
    debug!(project = name.as_str(), "Generated compose project name");
    name
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
