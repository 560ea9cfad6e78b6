//! Removal and restoration of origins with `swh alter`.
//!
//! Two origins sharing most of their objects are loaded. The fork is removed
//! and restored, then the initial origin, then both at once; every step is
//! checked against each storage backend through the companion script.

mod common;

use anyhow::{ensure, Result};
use common::run_scenario;
use integration_tests::alter::{
    AlterCompanion, Backend, RemovalOperation, EXTRA_OBJSTORAGE_URL, NEVER_REMOVABLE,
    PRIMARY_OBJSTORAGE_URL,
};
use integration_tests::fixtures::{FORK_GIT_REPO, TINY_GIT_REPO};
use integration_tests::kafka::{wait_for_consumers, ALTER_CONSUMERS, CONSUMER_ATTEMPTS};
use integration_tests::swhid::Swhid;
use integration_tests::{ComposeSpec, OriginSpec, Platform, PollConfig, ServiceHost};
use std::collections::HashSet;
use tracing::info;

/// GPLv3 text, shared by both origins and never removed.
const GPLV3: &str = "swh:1:cnt:94a9ed024d3859793618152ea559a168bbcbb5e2";

fn alter_spec() -> ComposeSpec {
    ComposeSpec::new("alter")
        .with_files(["compose.yml", "compose.search.yml", "compose.alter.yml"])
        .with_services([
            "docker-helper",
            "docker-proxy",
            "swh-alter",
            "swh-search",
            "swh-search-journal-client-objects",
            "swh-search-journal-client-indexed",
            "swh-storage",
            "swh-objstorage",
            "swh-storage-replayer",
            "swh-extra-objstorage",
            "swh-objstorage-replayer",
            "swh-scheduler-runner",
            "swh-scheduler-listener",
            "swh-scheduler-schedule-recurrent",
            "swh-web",
            "swh-loader",
            "swh-lister",
        ])
}

async fn wait_for_replayers(platform: &Platform) -> Result<()> {
    info!("Waiting for the replayers to be done");
    wait_for_consumers(
        &platform.kafka_api_url(),
        &ALTER_CONSUMERS,
        PollConfig::attempts(CONSUMER_ATTEMPTS),
    )
    .await?;
    Ok(())
}

async fn remove(host: &ServiceHost, mut operation: RemovalOperation) -> Result<RemovalOperation> {
    operation.run_in(host).await?;
    ensure!(
        !operation.removed_swhids.is_empty(),
        "{} removed nothing",
        operation.identifier
    );
    Ok(operation)
}

fn swhid_set(swhids: &[Swhid]) -> HashSet<&Swhid> {
    swhids.iter().collect()
}

#[tokio::test]
#[ignore = "Requires Docker daemon and the swh compose environment"]
async fn test_alter_remove_and_restore() -> Result<()> {
    run_scenario(alter_spec(), |platform| async move {
        let origins = platform
            .load_origins(&[OriginSpec::git(TINY_GIT_REPO), OriginSpec::git(FORK_GIT_REPO)])
            .await?;
        let alter_host = platform.alter_host().await?;
        let companion = AlterCompanion::new(platform.session());

        // the loaded origins reached PostgreSQL and Kafka
        let origin_swhids: Vec<Swhid> = origins.iter().map(|o| Swhid::origin(&o.url)).collect();
        companion
            .assert_present(&Backend::Postgresql, &origin_swhids)
            .await?;
        companion.assert_present(&Backend::Kafka, &origin_swhids).await?;
        wait_for_replayers(&platform).await?;

        // fork removal
        let fork = remove(
            &alter_host,
            RemovalOperation::new(
                "integration-test-fork",
                "/tmp/integration-test-fork.swh-recovery-bundle",
                [FORK_GIT_REPO],
            ),
        )
        .await?;
        for backend in [Backend::Postgresql, Backend::Cassandra, Backend::Kafka] {
            companion.assert_absent(&backend, &fork.removed_swhids).await?;
        }
        companion
            .assert_absent(&Backend::Elasticsearch, &fork.origins)
            .await?;

        // fork restoration
        fork.restore(&alter_host).await?;
        wait_for_replayers(&platform).await?;
        for backend in [Backend::Postgresql, Backend::Cassandra, Backend::Kafka] {
            companion.assert_present(&backend, &fork.removed_swhids).await?;
        }
        companion
            .assert_present(&Backend::Elasticsearch, &fork.origins)
            .await?;

        // initial origin removal, while the fork is back in the archive
        let mut initial = remove(
            &alter_host,
            RemovalOperation::new(
                "integration-test-initial",
                "/tmp/integration-test-initial.swh-recovery-bundle",
                [TINY_GIT_REPO],
            ),
        )
        .await?;
        let sha1s = initial.removed_content_sha1s(&alter_host).await?;
        for url in [PRIMARY_OBJSTORAGE_URL, EXTRA_OBJSTORAGE_URL] {
            companion
                .assert_absent(&Backend::objstorage(url), &sha1s)
                .await?;
        }

        let removed_with_fork = swhid_set(&fork.removed_swhids);
        let removed_with_initial = swhid_set(&initial.removed_swhids);
        let referencing_with_fork = swhid_set(&fork.referencing);
        let referencing_with_initial = swhid_set(&initial.referencing);
        ensure!(
            removed_with_fork.is_disjoint(&removed_with_initial),
            "objects of the restored fork were removed with the initial origin"
        );
        ensure!(
            referencing_with_initial
                .difference(&referencing_with_fork)
                .next()
                .is_some(),
            "the initial removal references nothing the fork removal did not"
        );
        ensure!(
            referencing_with_fork
                .difference(&referencing_with_initial)
                .next()
                .is_some(),
            "the fork removal references nothing the initial removal did not"
        );
        let gplv3: Swhid = GPLV3.parse()?;
        ensure!(!removed_with_fork.contains(&gplv3), "GPLv3 removed with the fork");
        ensure!(
            !removed_with_initial.contains(&gplv3),
            "GPLv3 removed with the initial origin"
        );
        ensure!(
            referencing_with_fork.contains(&gplv3) && referencing_with_initial.contains(&gplv3),
            "GPLv3 is not referenced by both removals"
        );

        // initial origin restoration
        initial.restore(&alter_host).await?;
        wait_for_replayers(&platform).await?;
        let sha1s = initial.removed_content_sha1s(&alter_host).await?;
        for url in [PRIMARY_OBJSTORAGE_URL, EXTRA_OBJSTORAGE_URL] {
            companion
                .assert_present(&Backend::objstorage(url), &sha1s)
                .await?;
        }

        // removing both leaves only never removable objects referenced
        let both = remove(
            &alter_host,
            RemovalOperation::new(
                "integration-test-both",
                "/tmp/integration-test-both.swh-recovery-bundle",
                [TINY_GIT_REPO, FORK_GIT_REPO],
            ),
        )
        .await?;
        let removed_with_both = swhid_set(&both.removed_swhids);
        ensure!(
            removed_with_both.is_superset(&swhid_set(&fork.removed_swhids)),
            "removing both origins kept objects of the fork"
        );
        ensure!(
            removed_with_both.is_superset(&swhid_set(&initial.removed_swhids)),
            "removing both origins kept objects of the initial origin"
        );
        let never_removable = NEVER_REMOVABLE
            .iter()
            .map(|s| s.parse())
            .collect::<Result<HashSet<Swhid>, _>>()?;
        let referencing: HashSet<Swhid> = both.referencing.iter().cloned().collect();
        ensure!(
            referencing == never_removable,
            "unexpected objects referencing the removed ones: {:?}",
            both.referencing
        );
        Ok(())
    })
    .await
}
