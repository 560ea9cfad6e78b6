//! Deposits through the SWORD service and their loading into the archive.

mod common;

use anyhow::{ensure, Context, Result};
use common::run_scenario;
use integration_tests::host::shell_quote;
use integration_tests::{retry_until_success, ApiClient, ComposeSpec, PollConfig, ServiceHost};
use serde_json::Value;
use std::collections::BTreeSet;

const SAMPLE_METADATA: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<entry xmlns="http://www.w3.org/2005/Atom"
       xmlns:swh="https://www.softwareheritage.org/schema/2018/deposit"
       xmlns:codemeta="https://doi.org/10.5063/SCHEMA/CODEMETA-2.0"
       xmlns:schema="http://schema.org/">
  <title>Test Software</title>
  <codemeta:author>
    <codemeta:name>No One</codemeta:name>
  </codemeta:author>
  <codemeta:softwareVersion>v1.0.0</codemeta:softwareVersion>
  <swh:deposit>
    <swh:metadata-provenance>
        <schema:url>some-metadata-provenance-url</schema:url>
    </swh:metadata-provenance>
  </swh:deposit>
</entry>
"#;

fn release_metadata(version: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<entry xmlns="http://www.w3.org/2005/Atom"
       xmlns:swh="https://www.softwareheritage.org/schema/2018/deposit"
       xmlns:codemeta="https://doi.org/10.5063/SCHEMA/CODEMETA-2.0"
       xmlns:schema="http://schema.org/">
  <title>Test Software</title>
  <codemeta:author>
    <codemeta:name>No One</codemeta:name>
  </codemeta:author>
  <codemeta:softwareVersion>{version}</codemeta:softwareVersion>
  <swh:deposit>
    <swh:create_origin>
      <swh:origin url="https://softwareheritage.org/test-software" />
    </swh:create_origin>
  </swh:deposit>
</entry>
"#
    )
}

fn deposit_spec() -> ComposeSpec {
    ComposeSpec::new("deposit")
        .with_files(["compose.yml", "compose.deposit.yml"])
        .with_services([
            "docker-helper",
            "docker-proxy",
            "swh-deposit",
            "swh-indexer-journal-client-remd",
            "swh-lister",
            "swh-loader",
            "swh-loader-deposit",
            "swh-scheduler-journal-client",
            "swh-scheduler-listener",
            "swh-scheduler-runner",
            "swh-web",
        ])
}

fn deposit_command(subcommand: &str, args: &str) -> String {
    format!(
        "swh deposit {subcommand} --format json --username test --password test \
         --url http://nginx/deposit/1 {args}"
    )
}

/// Deposit ids are numbers, but render string ones without quotes too.
fn id_arg(deposit_id: &Value) -> String {
    deposit_id
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| deposit_id.to_string())
}

/// Write the archive and metadata files deposited by the scenario.
async fn prepare_samples(deposit: &ServiceHost) -> Result<()> {
    deposit
        .check_output("echo 'print(\"Hello World!\")' > /tmp/hello.py")
        .await?;
    deposit
        .check_output("tar -C /tmp -czf /tmp/archive.tgz /tmp/hello.py")
        .await?;
    let samples = [
        ("/tmp/metadata.xml", SAMPLE_METADATA.to_string()),
        ("/tmp/metadata_release1.xml", release_metadata("v1.0.0")),
        ("/tmp/metadata_release2.xml", release_metadata("v2.0.0")),
    ];
    for (path, content) in samples {
        deposit
            .check_output(&format!("printf '%s' {} > {path}", shell_quote(&content)))
            .await?;
    }
    Ok(())
}

async fn upload(deposit: &ServiceHost, args: &str) -> Result<Value> {
    let output = deposit
        .check_output(&deposit_command("upload", args))
        .await?;
    let reply: Value = serde_json::from_str(&output)
        .with_context(|| format!("unexpected upload output: {output}"))?;

    let keys: BTreeSet<&str> = reply
        .as_object()
        .map(|o| o.keys().map(String::as_str).collect())
        .unwrap_or_default();
    ensure!(
        keys == BTreeSet::from([
            "deposit_id",
            "deposit_status",
            "deposit_status_detail",
            "deposit_date"
        ]),
        "unexpected upload reply: {reply}"
    );
    Ok(reply)
}

async fn deposit_status(deposit: &ServiceHost, deposit_id: &Value) -> Result<Value> {
    let output = deposit
        .check_output(&deposit_command("status", &format!("--deposit-id {}", id_arg(deposit_id))))
        .await?;
    Ok(serde_json::from_str(&output)?)
}

async fn wait_until_done(deposit: &ServiceHost, deposit_id: &Value) -> Result<()> {
    retry_until_success(PollConfig::attempts(60), "Deposit loading failed", || async {
        deposit_status(deposit, deposit_id)
            .await
            .map(|status| status["deposit_status"] == "done")
            .unwrap_or(false)
    })
    .await?;
    Ok(())
}

/// The deposit might already be verified by the time the upload returns.
fn ensure_deposited(reply: &Value) -> Result<()> {
    ensure!(
        reply["deposit_status"] == "deposited" || reply["deposit_status"] == "verified",
        "unexpected deposit status: {reply}"
    );
    Ok(())
}

async fn check_releases(deposit: &ServiceHost, api: &ApiClient) -> Result<()> {
    let first = upload(
        deposit,
        "--archive /tmp/archive.tgz --metadata /tmp/metadata_release1.xml",
    )
    .await?;
    wait_until_done(deposit, &first["deposit_id"]).await?;

    let second = upload(
        deposit,
        "--archive /tmp/archive.tgz --metadata /tmp/metadata_release2.xml",
    )
    .await?;
    wait_until_done(deposit, &second["deposit_id"]).await?;

    let status = deposit_status(deposit, &second["deposit_id"]).await?;
    let context = status["deposit_swh_id_context"]
        .as_str()
        .with_context(|| format!("no SWHID context in {status}"))?;
    let snapshot_id = snapshot_of_context(context)
        .with_context(|| format!("no visit in SWHID context {context}"))?;

    let snapshot = api.get_json(&format!("snapshot/{snapshot_id}/")).await?;
    let branches = &snapshot["branches"];
    ensure!(
        branches.as_object().map(|b| b.len()) == Some(3),
        "unexpected branches: {branches}"
    );
    ensure!(branches["HEAD"]["target_type"] == "alias", "{branches}");
    ensure!(branches["HEAD"]["target"] == "deposit/v2.0.0", "{branches}");

    for version in ["v1.0.0", "v2.0.0"] {
        let branch = &branches[format!("deposit/{version}").as_str()];
        ensure!(branch["target_type"] == "release", "{branches}");
        let release_id = branch["target"]
            .as_str()
            .with_context(|| format!("no target in {branch}"))?;
        let release = api.get_json(&format!("release/{release_id}/")).await?;
        ensure!(release["name"] == version, "unexpected release {release}");
    }
    Ok(())
}

/// Snapshot id from the `visit=swh:1:snp:<id>` qualifier of a SWHID.
fn snapshot_of_context(context: &str) -> Option<&str> {
    context
        .split(';')
        .find_map(|part| part.strip_prefix("visit="))
        .and_then(|visit| visit.rsplit(':').next())
}

#[tokio::test]
#[ignore = "Requires Docker daemon and the swh compose environment"]
async fn test_deposits() -> Result<()> {
    run_scenario(deposit_spec(), |platform| async move {
        let scheduler = platform.scheduler_host().await?;
        let task_types = scheduler.check_output("swh scheduler task-type list").await?;
        ensure!(
            task_types.contains("load-deposit:") && task_types.contains("check-deposit:"),
            "deposit task types are not registered: {task_types}"
        );

        let deposit = platform.deposit_host().await?;
        prepare_samples(&deposit).await?;

        let collections = deposit
            .check_output("swh deposit admin collection list")
            .await?;
        ensure!(collections == "test", "unexpected collections: {collections}");
        let users = deposit.check_output("swh deposit admin user list").await?;
        ensure!(users == "test", "unexpected users: {users}");

        // simple deposit
        let reply = upload(
            &deposit,
            "--archive /tmp/archive.tgz --name test_deposit --author somebody",
        )
        .await?;
        ensure_deposited(&reply)?;
        wait_until_done(&deposit, &reply["deposit_id"]).await?;

        // with metadata
        let reply = upload(
            &deposit,
            "--archive /tmp/archive.tgz --metadata /tmp/metadata.xml",
        )
        .await?;
        ensure_deposited(&reply)?;
        wait_until_done(&deposit, &reply["deposit_id"]).await?;

        // multipart
        let partial = upload(&deposit, "--archive /tmp/archive.tgz --partial").await?;
        ensure!(partial["deposit_status"] == "partial", "{partial}");
        let deposit_id = &partial["deposit_id"];
        let reply = upload(
            &deposit,
            &format!(
                "--metadata /tmp/metadata.xml --deposit-id {}",
                id_arg(deposit_id)
            ),
        )
        .await?;
        ensure_deposited(&reply)?;
        ensure!(reply["deposit_id"] == *deposit_id, "{reply}");
        wait_until_done(&deposit, deposit_id).await?;

        check_releases(&deposit, &platform.api()?).await
    })
    .await
}

#[test]
fn test_snapshot_is_read_from_swhid_context() {
    let context = "swh:1:dir:d83b7dda887dc790f7207608474650d4344b8df9;\
                   origin=https://softwareheritage.org/test-software;\
                   visit=swh:1:snp:68c0d26104d47e278dd6be07ed61fafb561d0d20;\
                   anchor=swh:1:rel:3b87a8d2b4c4a7c0e9e7c5d2f3b1a0e9d8c7b6a5;path=/";
    assert_eq!(
        snapshot_of_context(context),
        Some("68c0d26104d47e278dd6be07ed61fafb561d0d20")
    );
    assert_eq!(snapshot_of_context("swh:1:dir:abc"), None);
}
