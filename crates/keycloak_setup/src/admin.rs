//! Minimal client of the Keycloak admin REST API.
//!
//! Only the calls needed to provision a realm are covered. Every call is
//! scoped to the realm the client currently targets, see
//! [`KeycloakAdmin::with_realm`].

use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::errors::KeycloakError;

#[cfg(test)]
#[path = "admin_tests.rs"]
mod tests;

/// Client used to obtain admin tokens with the password grant.
pub const ADMIN_CLIENT_ID: &str = "admin-cli";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Identified {
    id: String,
}

/// A group of the realm.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
}

/// Authenticated admin API client.
#[derive(Debug, Clone)]
pub struct KeycloakAdmin {
    client: Client,
    server_url: Url,
    realm: String,
    token: String,
}

impl KeycloakAdmin {
    /// Log in as `username` in `realm` and target that realm.
    ///
    /// `server_url` is the Keycloak base URL, e.g.
    /// `http://localhost:8080/keycloak/auth/`.
    pub async fn login(
        server_url: &str,
        realm: &str,
        username: &str,
        password: &str,
    ) -> Result<Self, KeycloakError> {
        let server_url = base_url(server_url)?;
        let token_url =
            server_url.join(&format!("realms/{realm}/protocol/openid-connect/token"))?;
        let client = Client::new();

        debug!(url = %token_url, username, "Requesting admin token");
        let response = client
            .post(token_url.clone())
            .form(&[
                ("grant_type", "password"),
                ("client_id", ADMIN_CLIENT_ID),
                ("username", username),
                ("password", password),
            ])
            .send()
            .await
            .map_err(|source| KeycloakError::Http {
                url: token_url.to_string(),
                source,
            })?;
        let status = response.status();
        let reply: TokenResponse = response.json().await.map_err(|source| KeycloakError::Http {
            url: token_url.to_string(),
            source,
        })?;

        match reply.access_token {
            Some(token) if status.is_success() => Ok(Self {
                client,
                server_url,
                realm: realm.to_string(),
                token,
            }),
            _ => Err(KeycloakError::Authentication {
                username: username.to_string(),
                message: reply
                    .error_description
                    .unwrap_or_else(|| format!("token endpoint returned {status}")),
            }),
        }
    }

    /// The same client, targeting `realm`.
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    fn admin_url(&self, path: &str) -> Result<Url, KeycloakError> {
        let path = path.trim_start_matches('/');
        let realm_path = if path.is_empty() {
            format!("admin/realms/{}", self.realm)
        } else {
            format!("admin/realms/{}/{path}", self.realm)
        };
        Ok(self.server_url.join(&realm_path)?)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response, KeycloakError> {
        debug!(method = %method, url = %url, "Keycloak admin request");
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|source| KeycloakError::Http {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(KeycloakError::Status {
            method: method.to_string(),
            url: url.to_string(),
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, KeycloakError> {
        let response = self.send(Method::GET, url.clone(), None).await?;
        response.json().await.map_err(|source| KeycloakError::Http {
            url: url.to_string(),
            source,
        })
    }

    /// POST a new object, reporting `409 Conflict` as
    /// [`KeycloakError::AlreadyExists`].
    async fn create(
        &self,
        kind: &'static str,
        name: &str,
        url: Url,
        payload: &Value,
    ) -> Result<(), KeycloakError> {
        match self.send(Method::POST, url, Some(payload)).await {
            Ok(_) => Ok(()),
            Err(KeycloakError::Status { status, .. }) if status == StatusCode::CONFLICT.as_u16() => {
                Err(KeycloakError::AlreadyExists {
                    kind,
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn single_id(
        &self,
        kind: &'static str,
        name: &str,
        url: Url,
    ) -> Result<String, KeycloakError> {
        let found: Vec<Identified> = self.get(url).await?;
        found
            .into_iter()
            .next()
            .map(|object| object.id)
            .ok_or_else(|| KeycloakError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    /// Create a realm; the realm name is read from the payload.
    pub async fn create_realm(&self, payload: &Value) -> Result<(), KeycloakError> {
        let name = payload["realm"].as_str().unwrap_or_default().to_string();
        let url = self.server_url.join("admin/realms")?;
        self.create("realm", &name, url, payload).await
    }

    /// Update the targeted realm.
    pub async fn update_realm(&self, payload: &Value) -> Result<(), KeycloakError> {
        self.send(Method::PUT, self.admin_url("")?, Some(payload))
            .await?;
        Ok(())
    }

    /// Internal id of the client called `client_id`.
    pub async fn client_id(&self, client_id: &str) -> Result<String, KeycloakError> {
        let mut url = self.admin_url("clients")?;
        url.query_pairs_mut().append_pair("clientId", client_id);
        self.single_id("client", client_id, url).await
    }

    pub async fn create_client(&self, payload: &Value) -> Result<(), KeycloakError> {
        let name = payload["clientId"].as_str().unwrap_or_default().to_string();
        self.create("client", &name, self.admin_url("clients")?, payload)
            .await
    }

    pub async fn update_client(&self, id: &str, payload: &Value) -> Result<(), KeycloakError> {
        self.send(
            Method::PUT,
            self.admin_url(&format!("clients/{id}"))?,
            Some(payload),
        )
        .await?;
        Ok(())
    }

    pub async fn create_client_role(&self, client: &str, role: &str) -> Result<(), KeycloakError> {
        let url = self.admin_url(&format!("clients/{client}/roles"))?;
        self.create("client role", role, url, &serde_json::json!({ "name": role }))
            .await
    }

    /// Representation of a client role, as expected by role mappings.
    pub async fn client_role(&self, client: &str, role: &str) -> Result<Value, KeycloakError> {
        self.get(self.admin_url(&format!("clients/{client}/roles/{role}"))?)
            .await
    }

    pub async fn create_realm_role(&self, role: &str) -> Result<(), KeycloakError> {
        let url = self.admin_url("roles")?;
        self.create("realm role", role, url, &serde_json::json!({ "name": role }))
            .await
    }

    pub async fn realm_role(&self, role: &str) -> Result<Value, KeycloakError> {
        self.get(self.admin_url(&format!("roles/{role}"))?).await
    }

    pub async fn create_user(&self, payload: &Value) -> Result<(), KeycloakError> {
        let name = payload["username"].as_str().unwrap_or_default().to_string();
        self.create("user", &name, self.admin_url("users")?, payload)
            .await
    }

    pub async fn user_id(&self, username: &str) -> Result<String, KeycloakError> {
        let mut url = self.admin_url("users")?;
        url.query_pairs_mut()
            .append_pair("username", username)
            .append_pair("exact", "true");
        self.single_id("user", username, url).await
    }

    pub async fn assign_client_roles(
        &self,
        user: &str,
        client: &str,
        roles: &[Value],
    ) -> Result<(), KeycloakError> {
        let url = self.admin_url(&format!("users/{user}/role-mappings/clients/{client}"))?;
        self.send(Method::POST, url, Some(&Value::from(roles.to_vec())))
            .await?;
        Ok(())
    }

    pub async fn assign_realm_roles(&self, user: &str, roles: &[Value]) -> Result<(), KeycloakError> {
        let url = self.admin_url(&format!("users/{user}/role-mappings/realm"))?;
        self.send(Method::POST, url, Some(&Value::from(roles.to_vec())))
            .await?;
        Ok(())
    }

    pub async fn create_group(&self, name: &str) -> Result<(), KeycloakError> {
        let url = self.admin_url("groups")?;
        self.create("group", name, url, &serde_json::json!({ "name": name }))
            .await
    }

    pub async fn groups(&self) -> Result<Vec<Group>, KeycloakError> {
        self.get(self.admin_url("groups")?).await
    }

    pub async fn add_user_to_group(&self, user: &str, group: &str) -> Result<(), KeycloakError> {
        let url = self.admin_url(&format!("users/{user}/groups/{group}"))?;
        self.send(Method::PUT, url, None).await?;
        Ok(())
    }
}

/// Parse `server_url`, making sure relative joins stay below it.
pub fn base_url(server_url: &str) -> Result<Url, KeycloakError> {
    if server_url.ends_with('/') {
        Ok(Url::parse(server_url)?)
    } else {
        Ok(Url::parse(&format!("{server_url}/"))?)
    }
}
