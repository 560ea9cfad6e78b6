//! Tests for routes module

use super::*;
use crate::ContainerSource;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bollard::service::{ContainerSummary, Ipam, IpamConfig, Network, Port};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

/// Fixed compose project: an nginx published on 5080 and a gateway.
struct FakeDocker {
    gateway: Option<&'static str>,
}

#[async_trait]
impl ContainerSource for FakeDocker {
    async fn containers(&self) -> Result<Vec<ContainerSummary>, HelperError> {
        let service = |name: &str, public_port: u16| ContainerSummary {
            labels: Some(HashMap::from([
                ("com.docker.compose.project".to_string(), "swh_test_local_x".to_string()),
                ("com.docker.compose.service".to_string(), name.to_string()),
            ])),
            ports: Some(vec![Port {
                ip: Some("0.0.0.0".to_string()),
                private_port: 80,
                public_port: Some(public_port),
                ..Default::default()
            }]),
            ..Default::default()
        };
        Ok(vec![service("nginx", 5080), service("keycloak", 5081)])
    }

    async fn network(&self, name: &str) -> Result<Network, HelperError> {
        assert_eq!(name, "swh_test_local_x_default");
        Ok(Network {
            ipam: Some(Ipam {
                config: Some(vec![IpamConfig {
                    gateway: self.gateway.map(str::to_string),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

fn app(gateway: Option<&'static str>) -> Router {
    create_router(AppState::new(
        "swh_test_local_x",
        Arc::new(FakeDocker { gateway }),
    ))
}

async fn fetch(app: Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_root() {
    assert_eq!(fetch(app(None), "/").await, (StatusCode::OK, "OK".to_string()));
}

#[tokio::test]
async fn test_public_port_defaults_to_nginx() {
    assert_eq!(
        fetch(app(None), "/public-port/").await,
        (StatusCode::OK, "5080".to_string())
    );
}

#[tokio::test]
async fn test_public_port_of_service() {
    assert_eq!(
        fetch(app(None), "/public-port/keycloak/").await,
        (StatusCode::OK, "5081".to_string())
    );
}

#[tokio::test]
async fn test_public_port_of_unknown_service() {
    let (status, _) = fetch(app(None), "/public-port/swh-web/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_gateway() {
    assert_eq!(
        fetch(app(Some("172.18.0.1")), "/gateway/").await,
        (StatusCode::OK, "172.18.0.1".to_string())
    );
    let (status, _) = fetch(app(None), "/gateway/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
