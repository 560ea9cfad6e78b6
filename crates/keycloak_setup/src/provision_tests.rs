use super::*;
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REALM_PATH: &str = "/admin/realms/SoftwareHeritage";

async fn mount(server: &MockServer, verb: &str, route: &str, response: ResponseTemplate) {
    Mock::given(method(verb))
        .and(path_regex(format!("^{route}$")))
        .respond_with(response)
        .mount(server)
        .await;
}

#[test]
fn test_skip_existing() {
    let exists = Err(KeycloakError::AlreadyExists {
        kind: "group",
        name: "staff".to_string(),
    });
    assert!(skip_existing(exists).is_ok());

    let missing = Err(KeycloakError::NotFound {
        kind: "group",
        name: "staff".to_string(),
    });
    assert!(skip_existing(missing).is_err());
}

#[test]
fn test_client_payload_mappers() {
    let payload = client_payload("swh-deposit", &["http://localhost:5006/*"]);
    assert_eq!(payload["clientId"], "swh-deposit");
    assert_eq!(payload["publicClient"], true);
    assert_eq!(payload["redirectUris"], json!(["http://localhost:5006/*"]));
    let mappers = payload["protocolMappers"].as_array().unwrap();
    assert_eq!(mappers[0]["config"]["claim.name"], "groups");
    assert_eq!(mappers[1]["config"]["included.client.audience"], "swh-deposit");
}

#[test]
fn test_realm_payload() {
    let payload = realm_payload("http://localhost:5080/keycloak/auth/");
    assert_eq!(payload["realm"], REALM_NAME);
    assert_eq!(
        payload["attributes"]["frontendUrl"],
        "http://localhost:5080/keycloak/auth/"
    );
    assert_eq!(payload["smtpServer"]["host"], "smtp");
    assert_eq!(payload["smtpServer"]["port"], "1025");
}

#[tokio::test]
async fn test_frontend_url_from_helper() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public-port/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("5080"))
        .mount(&server)
        .await;

    let url = frontend_url(
        &Client::new(),
        &format!("{}/public-port/", server.uri()),
        "http://fallback/",
    )
    .await;
    assert_eq!(url, "http://localhost:5080/keycloak/auth/");
}

#[tokio::test]
async fn test_frontend_url_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public-port/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let helper = format!("{}/public-port/", server.uri());
    assert_eq!(
        frontend_url(&Client::new(), &helper, DEFAULT_FALLBACK).await,
        DEFAULT_FALLBACK
    );
}

const DEFAULT_FALLBACK: &str = "http://localhost:8080/keycloak/auth/";

#[tokio::test]
async fn test_provision_realm_tolerates_existing_objects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/realms/SoftwareHeritage/protocol/openid-connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t"})))
        .mount(&server)
        .await;

    // everything but the staff group and the ambassador role already exists
    let conflict = || ResponseTemplate::new(409);
    mount(&server, "POST", &format!("{REALM_PATH}/clients"), conflict()).await;
    mount(&server, "POST", &format!("{REALM_PATH}/users"), conflict()).await;
    mount(&server, "POST", &format!("{REALM_PATH}/clients/c1/roles"), conflict()).await;
    mount(&server, "POST", &format!("{REALM_PATH}/groups"), ResponseTemplate::new(201)).await;
    mount(&server, "POST", &format!("{REALM_PATH}/roles"), ResponseTemplate::new(201)).await;

    let found = |id: &str| ResponseTemplate::new(200).set_body_json(json!([{"id": id}]));
    mount(&server, "GET", &format!("{REALM_PATH}/clients"), found("c1")).await;
    mount(&server, "GET", &format!("{REALM_PATH}/users"), found("u1")).await;
    mount(
        &server,
        "GET",
        &format!("{REALM_PATH}/groups"),
        ResponseTemplate::new(200).set_body_json(json!([
            {"id": "g0", "name": "other"},
            {"id": "g1", "name": "staff"}
        ])),
    )
    .await;
    mount(
        &server,
        "GET",
        &format!("{REALM_PATH}/clients/c1/roles/[^/]+"),
        ResponseTemplate::new(200).set_body_json(json!({"id": "r1", "name": "role"})),
    )
    .await;
    mount(
        &server,
        "GET",
        &format!("{REALM_PATH}/roles/swh.ambassador"),
        ResponseTemplate::new(200).set_body_json(json!({"id": "r2", "name": "swh.ambassador"})),
    )
    .await;
    mount(
        &server,
        "POST",
        &format!("{REALM_PATH}/users/u1/role-mappings/clients/c1"),
        ResponseTemplate::new(204),
    )
    .await;

    Mock::given(method("PUT"))
        .and(path(format!("{REALM_PATH}/users/u1/groups/g1")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{REALM_PATH}/users/u1/role-mappings/realm")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let admin = KeycloakAdmin::login(&server.uri(), REALM_NAME, ADMIN_USERNAME, "admin")
        .await
        .unwrap();
    provision_realm(&admin).await.unwrap();
}
