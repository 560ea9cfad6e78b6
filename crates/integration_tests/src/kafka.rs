//! Waiting on journal consumers through the Kafka REST proxy.
//!
//! Replayers and journal clients are done with their backlog once the
//! `total_lag` of their consumer group drops to zero.

use serde_json::Value;
use tracing::{debug, info};

use crate::error::HarnessError;
use crate::http::ApiClient;
use crate::retry::{try_retry_until_success, PollConfig};

#[cfg(test)]
#[path = "kafka_tests.rs"]
mod tests;

/// Consumer groups of the mirror replayers.
pub const MIRROR_STORAGE_REPLAYER: &str = "swh.storage.mirror.replayer";
pub const MIRROR_OBJSTORAGE_REPLAYER: &str = "swh.objstorage.mirror.replayer";

/// Consumer groups feeding the backends checked by removal scenarios.
pub const ALTER_CONSUMERS: [&str; 3] = [
    "swh.alter.storage.replayer",
    "swh.alter.objstorage.replayer",
    "swh.search.journal_client",
];

/// Number of lag checks made per consumer group by default.
pub const CONSUMER_ATTEMPTS: u32 = 30;

/// Client of the Kafka REST proxy (`<nginx>/kafka/v3/clusters`).
#[derive(Debug, Clone)]
pub struct KafkaRest {
    api: ApiClient,
    clusters: String,
    cluster_id: String,
}

impl KafkaRest {
    /// Look up the id of the first cluster known to the proxy.
    pub async fn connect(kafka_api_url: &str) -> Result<Self, HarnessError> {
        let api = ApiClient::new(kafka_api_url.trim_end_matches('/'))?;
        // Paths are joined against the parent of the cluster listing.
        let clusters = api
            .base_url()
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or_default()
            .to_string();

        let listing = api.get_json(&clusters).await?;
        let cluster_id = listing
            .pointer("/data/0/cluster_id")
            .and_then(Value::as_str)
            .ok_or_else(|| HarnessError::UnexpectedResponse {
                source_name: api.base_url().to_string(),
                message: "no data[0].cluster_id in cluster listing".to_string(),
            })?
            .to_string();

        debug!(cluster = %cluster_id, "Connected to the Kafka REST proxy");
        Ok(Self {
            api,
            clusters,
            cluster_id,
        })
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Total lag of `group` across all its partitions.
    pub async fn total_lag(&self, group: &str) -> Result<u64, HarnessError> {
        let path = format!(
            "{}/{}/consumer-groups/{}/lag-summary",
            self.clusters, self.cluster_id, group
        );
        let url = self.api.url(&path)?;
        let summary = self.api.get_json(&path).await?;
        summary
            .get("total_lag")
            .and_then(Value::as_u64)
            .ok_or_else(|| HarnessError::UnexpectedResponse {
                source_name: url.to_string(),
                message: "lag summary without total_lag".to_string(),
            })
    }

    /// Wait until `group` has consumed everything.
    ///
    /// HTTP failures while polling count as "not done yet": the consumer
    /// group does not exist until the consumer first connects.
    pub async fn wait_for_consumer(&self, group: &str, poll: PollConfig) -> Result<(), HarnessError> {
        info!(group = group, "Waiting for consumer to catch up");
        try_retry_until_success(
            poll,
            &format!("Could not detect a condition where the consumer {group} did its job"),
            || async {
                match self.total_lag(group).await {
                    Ok(lag) => {
                        debug!(group = group, lag = lag, "Consumer lag");
                        Ok(lag == 0)
                    }
                    Err(e @ HarnessError::UnexpectedResponse { .. }) => Err(e),
                    Err(e) => {
                        debug!(group = group, error = %e, "Failed to retrieve consumer status");
                        Ok(false)
                    }
                }
            },
        )
        .await
        .map(|_| ())
    }
}

/// Wait until every consumer group in `groups` has a zero lag.
pub async fn wait_for_consumers(
    kafka_api_url: &str,
    groups: &[&str],
    poll: PollConfig,
) -> Result<(), HarnessError> {
    let kafka = KafkaRest::connect(kafka_api_url).await?;
    for group in groups {
        kafka.wait_for_consumer(group, poll).await?;
    }
    Ok(())
}
