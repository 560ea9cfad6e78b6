//! Provisioning of the `SoftwareHeritage` realm.
//!
//! Every step can run against an already provisioned Keycloak: objects that
//! exist are logged and left untouched.

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::admin::KeycloakAdmin;
use crate::errors::KeycloakError;
use crate::SetupConfig;

#[cfg(test)]
#[path = "provision_tests.rs"]
mod tests;

pub const REALM_NAME: &str = "SoftwareHeritage";
pub const MASTER_REALM: &str = "master";
pub const ADMIN_USERNAME: &str = "admin";

pub const CLIENT_WEBAPP: &str = "swh-web";
pub const CLIENT_DEPOSIT: &str = "swh-deposit";
pub const CLIENT_COARNOTIFY: &str = "swh-coarnotify";

pub const WEB_API_THROTTLING_EXEMPTED_ROLE: &str = "swh.web.api.throttling_exempted";
pub const WEB_API_GRAPH_ROLE: &str = "swh.web.api.graph";
pub const VAULT_GIT_BARE_UI_ROLE: &str = "swh.vault.git_bare.ui";
pub const WEB_ADMIN_LIST_DEPOSITS_ROLE: &str = "swh.web.admin.list_deposits";
pub const WEB_API_SAVE_BULK_ROLE: &str = "swh.web.api.save_bulk";
pub const DEPOSIT_API_ROLE: &str = "swh.deposit.api";
pub const AMBASSADOR_ROLE: &str = "swh.ambassador";
pub const COARNOTIFY_SERVER_ROLE: &str = "swh.coarnotify.server";

/// Roles of the `realm-management` client granted to the realm admin.
pub const REALM_MANAGEMENT_ROLES: [&str; 18] = [
    "view-users",
    "view-events",
    "view-identity-providers",
    "manage-identity-providers",
    "create-client",
    "query-clients",
    "query-realms",
    "manage-events",
    "view-clients",
    "manage-realm",
    "impersonation",
    "manage-clients",
    "view-authorization",
    "query-users",
    "view-realm",
    "manage-authorization",
    "manage-users",
    "query-groups",
];

/// Public OIDC clients and their redirect URIs.
pub const PUBLIC_CLIENTS: [(&str, &[&str]); 3] = [
    (
        CLIENT_WEBAPP,
        &[
            "http://localhost:5004/*",
            "http://localhost/*",
            "http://localhost:5013/*",
            "http://localhost/graphql",
        ],
    ),
    (CLIENT_DEPOSIT, &["http://localhost:5006/*"]),
    (CLIENT_COARNOTIFY, &["http://localhost:5009/*"]),
];

/// A test user: username, password, email, first and last name.
pub struct TestUser<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

pub const TEST_USERS: [TestUser<'static>; 4] = [
    TestUser {
        username: "johndoe",
        password: "johndoe-swh",
        email: "john.doe@example.org",
        first_name: "John",
        last_name: "Doe",
    },
    TestUser {
        username: "janedoe",
        password: "janedoe-swh",
        email: "jane.doe@example.org",
        first_name: "Jane",
        last_name: "Doe",
    },
    TestUser {
        username: "test",
        password: "test",
        email: "test@swh.org",
        first_name: "Test",
        last_name: "aibot",
    },
    TestUser {
        username: "ambassador",
        password: "ambassador",
        email: "ambassador@swh.org",
        first_name: "ambassador",
        last_name: "ambassador",
    },
];

/// Client roles granted to test users: (client, role, username).
pub const TEST_USER_CLIENT_ROLES: [(&str, &str, &str); 3] = [
    (CLIENT_DEPOSIT, DEPOSIT_API_ROLE, "test"),
    (CLIENT_WEBAPP, WEB_ADMIN_LIST_DEPOSITS_ROLE, "test"),
    (CLIENT_WEBAPP, WEB_API_SAVE_BULK_ROLE, "johndoe"),
];

/// Turn "already exists" into success.
pub fn skip_existing(result: Result<(), KeycloakError>) -> Result<(), KeycloakError> {
    match result {
        Err(e) if e.is_already_exists() => {
            warn!(error = %e, "Already created, skipping");
            Ok(())
        }
        other => other,
    }
}

/// Keycloak URL as seen from a browser on the docker host.
///
/// The edge router port is asked to the docker helper; `fallback` is used
/// when the helper cannot tell.
pub async fn frontend_url(client: &Client, helper_url: &str, fallback: &str) -> String {
    let port = match client.get(helper_url).send().await {
        Ok(response) if response.status().is_success() => response
            .text()
            .await
            .ok()
            .and_then(|body| body.trim().parse::<u16>().ok()),
        Ok(response) => {
            warn!(status = %response.status(), "docker helper does not know the edge port");
            None
        }
        Err(e) => {
            warn!(error = %e, "docker helper is unreachable");
            None
        }
    };
    match port {
        Some(port) => format!("http://localhost:{port}/keycloak/auth/"),
        None => fallback.to_string(),
    }
}

pub fn user_payload(user: &TestUser<'_>) -> Value {
    json!({
        "email": user.email,
        "username": user.username,
        "firstName": user.first_name,
        "lastName": user.last_name,
        "credentials": [
            {"value": user.password, "type": "password", "temporary": false}
        ],
        "enabled": true,
        "emailVerified": true,
    })
}

pub fn realm_payload(frontend_url: &str) -> Value {
    json!({
        "id": REALM_NAME,
        "realm": REALM_NAME,
        "displayName": "Software Heritage",
        "rememberMe": true,
        "attributes": {"frontendUrl": frontend_url},
        "enabled": true,
        "loginTheme": "swh",
        "accountTheme": "swh",
        "adminTheme": "swh",
        "registrationAllowed": true,
        "verifyEmail": true,
        "smtpServer": {
            "port": "1025",
            "host": "smtp",
            "from": "keycloak-swh@docker",
            "fromDisplayName": "Keycloak SWH @ docker",
        },
    })
}

/// Public client exposing group membership and its own audience in tokens.
pub fn client_payload(client_id: &str, redirect_uris: &[&str]) -> Value {
    json!({
        "id": client_id,
        "clientId": client_id,
        "surrogateAuthRequired": false,
        "enabled": true,
        "redirectUris": redirect_uris,
        "bearerOnly": false,
        "consentRequired": false,
        "standardFlowEnabled": true,
        "implicitFlowEnabled": false,
        "directAccessGrantsEnabled": true,
        "serviceAccountsEnabled": false,
        "publicClient": true,
        "frontchannelLogout": false,
        "protocol": "openid-connect",
        "fullScopeAllowed": true,
        "protocolMappers": [
            {
                "name": "user groups",
                "protocol": "openid-connect",
                "protocolMapper": "oidc-group-membership-mapper",
                "consentRequired": false,
                "config": {
                    "full.path": true,
                    "userinfo.token.claim": true,
                    "id.token.claim": true,
                    "access.token.claim": true,
                    "claim.name": "groups",
                    "jsonType.label": "String",
                },
            },
            {
                "name": "audience",
                "protocol": "openid-connect",
                "protocolMapper": "oidc-audience-mapper",
                "consentRequired": false,
                "config": {
                    "included.client.audience": client_id,
                    "id.token.claim": true,
                    "access.token.claim": true,
                },
            },
        ],
    })
}

/// Point the `account` and `security-admin-console` clients of the targeted
/// realm below the reverse proxy prefix.
pub async fn fix_console_base_urls(admin: &KeycloakAdmin) -> Result<(), KeycloakError> {
    let realm = admin.realm().to_string();
    let base_urls = [
        ("account", format!("/keycloak/auth/realms/{realm}/account")),
        (
            "security-admin-console",
            format!("/keycloak/auth/admin/{realm}/console/index.html"),
        ),
    ];
    for (client_name, base_url) in base_urls {
        let id = admin.client_id(client_name).await?;
        admin
            .update_client(&id, &json!({"baseUrl": base_url, "clientId": client_name}))
            .await?;
    }
    Ok(())
}

async fn assign_client_roles(
    admin: &KeycloakAdmin,
    client_name: &str,
    roles: &[&str],
    username: &str,
) -> Result<(), KeycloakError> {
    let client = admin.client_id(client_name).await?;
    let user = admin.user_id(username).await?;
    for role in roles {
        let role = admin.client_role(&client, role).await?;
        admin
            .assign_client_roles(&user, &client, std::slice::from_ref(&role))
            .await?;
    }
    Ok(())
}

async fn create_client_roles(
    admin: &KeycloakAdmin,
    client_name: &str,
    roles: &[&str],
) -> Result<(), KeycloakError> {
    let client = admin.client_id(client_name).await?;
    for role in roles {
        skip_existing(admin.create_client_role(&client, role).await)?;
    }
    Ok(())
}

/// Master realm setup and creation of the realm with its admin user.
pub async fn provision_master(
    master: &KeycloakAdmin,
    frontend_url: &str,
    admin_password: &str,
) -> Result<(), KeycloakError> {
    info!("Configuring master realm");
    fix_console_base_urls(master).await?;
    master
        .update_realm(&json!({
            "loginTheme": "swh",
            "accountTheme": "swh",
            "adminTheme": "swh",
        }))
        .await?;

    info!(realm = REALM_NAME, frontend_url, "Creating realm");
    skip_existing(master.create_realm(&realm_payload(frontend_url)).await)?;

    let realm = master.clone().with_realm(REALM_NAME);
    fix_console_base_urls(&realm).await?;

    let admin_user = TestUser {
        username: ADMIN_USERNAME,
        password: admin_password,
        email: "admin@example.org",
        first_name: ADMIN_USERNAME,
        last_name: ADMIN_USERNAME,
    };
    skip_existing(realm.create_user(&user_payload(&admin_user)).await)?;
    assign_client_roles(
        &realm,
        "realm-management",
        &REALM_MANAGEMENT_ROLES,
        ADMIN_USERNAME,
    )
    .await
}

/// Clients, groups, roles and test users of the realm, as its admin.
pub async fn provision_realm(admin: &KeycloakAdmin) -> Result<(), KeycloakError> {
    for (client_id, redirect_uris) in PUBLIC_CLIENTS {
        info!(client = client_id, "Creating public client");
        skip_existing(admin.create_client(&client_payload(client_id, redirect_uris)).await)?;
    }

    skip_existing(admin.create_group("staff").await)?;
    let admin_id = admin.user_id(ADMIN_USERNAME).await?;
    if let Some(staff) = admin
        .groups()
        .await?
        .into_iter()
        .find(|group| group.name == "staff")
    {
        admin.add_user_to_group(&admin_id, &staff.id).await?;
    }

    create_client_roles(
        admin,
        CLIENT_WEBAPP,
        &[
            WEB_API_THROTTLING_EXEMPTED_ROLE,
            WEB_API_GRAPH_ROLE,
            VAULT_GIT_BARE_UI_ROLE,
            WEB_ADMIN_LIST_DEPOSITS_ROLE,
            WEB_API_SAVE_BULK_ROLE,
        ],
    )
    .await?;
    create_client_roles(admin, CLIENT_DEPOSIT, &[DEPOSIT_API_ROLE]).await?;

    for user in &TEST_USERS {
        info!(username = user.username, "Creating test user");
        skip_existing(admin.create_user(&user_payload(user)).await)?;
    }
    for (client, role, username) in TEST_USER_CLIENT_ROLES {
        assign_client_roles(admin, client, &[role], username).await?;
    }

    skip_existing(admin.create_realm_role(AMBASSADOR_ROLE).await)?;
    let ambassador = admin.realm_role(AMBASSADOR_ROLE).await?;
    let ambassador_id = admin.user_id("ambassador").await?;
    admin
        .assign_realm_roles(&ambassador_id, std::slice::from_ref(&ambassador))
        .await?;

    create_client_roles(admin, CLIENT_COARNOTIFY, &[COARNOTIFY_SERVER_ROLE]).await
}

/// Run the whole provisioning against `config.server_url`.
pub async fn provision(config: &SetupConfig) -> Result<(), KeycloakError> {
    let frontend = frontend_url(&Client::new(), &config.helper_url, &config.server_url).await;

    let master = KeycloakAdmin::login(
        &config.server_url,
        MASTER_REALM,
        ADMIN_USERNAME,
        &config.admin_password,
    )
    .await?;
    provision_master(&master, &frontend, &config.admin_password).await?;

    let admin = KeycloakAdmin::login(
        &config.server_url,
        REALM_NAME,
        ADMIN_USERNAME,
        &config.admin_password,
    )
    .await?;
    provision_realm(&admin).await?;

    info!(realm = REALM_NAME, "Keycloak provisioning complete");
    Ok(())
}
