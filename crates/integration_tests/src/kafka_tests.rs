use super::*;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast(attempts: u32) -> PollConfig {
    PollConfig::attempts(attempts).with_interval(Duration::from_millis(10))
}

async fn proxy() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/kafka/v3/clusters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "KafkaClusterList",
            "data": [{"cluster_id": "c1", "kind": "KafkaCluster"}]
        })))
        .mount(&server)
        .await;
    server
}

fn lag_path(group: &str) -> String {
    format!("/kafka/v3/clusters/c1/consumer-groups/{group}/lag-summary")
}

#[tokio::test]
async fn test_connect_reads_first_cluster_id() {
    let server = proxy().await;

    let kafka = KafkaRest::connect(&format!("{}/kafka/v3/clusters", server.uri()))
        .await
        .unwrap();

    assert_eq!(kafka.cluster_id(), "c1");
}

#[tokio::test]
async fn test_connect_without_cluster_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/kafka/v3/clusters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let error = KafkaRest::connect(&format!("{}/kafka/v3/clusters", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(error, HarnessError::UnexpectedResponse { .. }));
}

#[tokio::test]
async fn test_waits_until_lag_is_zero() {
    let server = proxy().await;
    let group = MIRROR_STORAGE_REPLAYER;
    Mock::given(method("GET"))
        .and(path(lag_path(group)))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(lag_path(group)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_lag": 12})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(lag_path(group)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_lag": 0})))
        .expect(1)
        .mount(&server)
        .await;

    wait_for_consumers(
        &format!("{}/kafka/v3/clusters", server.uri()),
        &[group],
        fast(5),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_gives_up_with_consumer_name() {
    let server = proxy().await;
    let group = ALTER_CONSUMERS[0];
    Mock::given(method("GET"))
        .and(path(lag_path(group)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_lag": 3})))
        .expect(3)
        .mount(&server)
        .await;

    let error = wait_for_consumers(
        &format!("{}/kafka/v3/clusters", server.uri()),
        &[group],
        fast(3),
    )
    .await
    .unwrap_err();

    match error {
        HarnessError::RetryExhausted { message, attempts } => {
            assert!(message.contains("swh.alter.storage.replayer"));
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_all_groups_are_checked_in_order() {
    let server = proxy().await;
    for group in ALTER_CONSUMERS {
        Mock::given(method("GET"))
            .and(path(lag_path(group)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_lag": 0})))
            .expect(1)
            .mount(&server)
            .await;
    }

    wait_for_consumers(
        &format!("{}/kafka/v3/clusters/", server.uri()),
        &ALTER_CONSUMERS,
        fast(2),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_lag_error_status_is_reported_with_body() {
    let server = proxy().await;
    let group = MIRROR_OBJSTORAGE_REPLAYER;
    Mock::given(method("GET"))
        .and(path(lag_path(group)))
        .respond_with(ResponseTemplate::new(404).set_body_string("consumer group not found"))
        .mount(&server)
        .await;
    let kafka = KafkaRest::connect(&format!("{}/kafka/v3/clusters", server.uri()))
        .await
        .unwrap();

    let error = kafka.total_lag(group).await.unwrap_err();

    match error {
        HarnessError::UnexpectedStatus {
            url,
            expected,
            actual,
            body,
        } => {
            assert!(url.ends_with(&lag_path(group)));
            assert_eq!(expected, 200);
            assert_eq!(actual, 404);
            assert_eq!(body, "consumer group not found");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_connect_fails_on_proxy_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/kafka/v3/clusters"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let error = KafkaRest::connect(&format!("{}/kafka/v3/clusters", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        HarnessError::UnexpectedStatus { actual: 503, .. }
    ));
}
