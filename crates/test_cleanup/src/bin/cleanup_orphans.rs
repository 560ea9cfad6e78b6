//! Cleanup orphaned integration test environments.
//!
//! Removes the `swh_test_` compose projects whose containers are older than
//! a given age, along with their volumes and networks. Meant to run from a
//! scheduled CI job or manually on a shared runner.
//!
//! Usage:
//!   cleanup-orphans [max_age_hours]
//!
//! The Docker daemon is reached through `DOCKER_HOST_URL` when set, the
//! local socket otherwise.

use std::env;
use test_cleanup::{CleanupConfig, DEFAULT_MAX_AGE_HOURS, ProjectCleanup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    test_cleanup::init_logging();

    let max_age_hours: u64 = env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_MAX_AGE_HOURS);

    println!("Software Heritage integration test cleanup");
    println!("==========================================");
    println!();

    let config = CleanupConfig::from_env(max_age_hours);
    println!("Configuration:");
    println!(
        "   Docker: {}",
        config.docker_host.as_deref().unwrap_or("local socket")
    );
    println!("   Max age: {} hours", config.max_age_hours);
    println!();

    let cleanup = ProjectCleanup::new(config.connect()?);

    println!("Searching for orphaned test projects...");
    let report = cleanup
        .cleanup_orphaned_projects(config.max_age_hours)
        .await?;

    println!();
    println!("Cleanup completed!");
    if report.projects.is_empty() {
        println!(
            "   No test project found older than {} hours",
            config.max_age_hours
        );
        return Ok(());
    }

    println!("   Removed {} projects:", report.projects.len());
    for project in &report.projects {
        println!("   - {}", project);
    }
    println!(
        "   {} containers, {} volumes, {} networks",
        report.containers.len(),
        report.volumes.len(),
        report.networks.len()
    );

    Ok(())
}
