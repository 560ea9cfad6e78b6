//! Shared plumbing of the docker-backed scenarios.
//!
//! Every scenario starts its own compose project through [`run_scenario`];
//! hosts without docker compose skip the scenario instead of failing it.

#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use integration_tests::{
    init_logging, quote_plus, ApiClient, ComposeSession, ComposeSpec, HarnessConfig, HarnessError,
    Platform,
};
use serde_json::Value;
use std::future::Future;
use tracing::warn;

/// Start the compose project described by `spec`, run `body` on it and tear
/// it down.
pub async fn run_scenario<F, Fut>(spec: ComposeSpec, body: F) -> Result<()>
where
    F: FnOnce(Platform) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    init_logging();
    let config = HarnessConfig::from_env()?;
    let scenario = spec.scenario.clone();

    let outcome = ComposeSession::run(config, spec, |session| async move {
        let platform = Platform::connect(session).await?;
        body(platform).await
    })
    .await;

    match outcome {
        Err(e) if matches!(e.downcast_ref::<HarnessError>(), Some(HarnessError::ComposeUnavailable)) => {
            warn!(scenario = %scenario, "docker compose is not available, scenario skipped");
            Ok(())
        }
        other => other,
    }
}

/// A string field of a JSON object.
pub fn str_field<'a>(value: &'a Value, field: &str) -> Result<&'a str> {
    value[field]
        .as_str()
        .with_context(|| format!("missing string field {field:?} in {value}"))
}

/// Revision and root directory targeted by `HEAD` in the latest visit of
/// `origin_url`.
pub async fn head_revision(api: &ApiClient, origin_url: &str) -> Result<(String, String)> {
    let visit = api
        .get_json(&format!("origin/{}/visit/latest/", quote_plus(origin_url)))
        .await?;
    let snapshot = api
        .get_json(&format!("snapshot/{}/", str_field(&visit, "snapshot")?))
        .await?;

    let branches = &snapshot["branches"];
    if branches["HEAD"]["target_type"] != "alias" {
        bail!("HEAD of {origin_url} is not an alias: {}", branches["HEAD"]);
    }
    let head_target = str_field(&branches["HEAD"], "target")?;
    let target = &branches[head_target];
    if target["target_type"] != "revision" {
        bail!("{head_target} of {origin_url} is not a revision: {target}");
    }
    let rev_id = str_field(target, "target")?.to_string();

    let revision = api.get_json(&format!("revision/{rev_id}/")).await?;
    let dir_id = str_field(&revision, "directory")?.to_string();
    Ok((rev_id, dir_id))
}
