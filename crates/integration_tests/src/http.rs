//! Minimal HTTP client for the archive's public APIs.
//!
//! [`ApiClient`] wraps a base URL (typically `<nginx>/api/1/`) and resolves
//! relative paths against it. A call fails exactly when the response status
//! differs from the expected one; the body is decoded as JSON when possible
//! and never causes a failure by itself.

use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

use crate::error::HarnessError;
use crate::retry::PollConfig;

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

/// Number of attempts made by [`ApiClient::poll`].
pub const POLL_ATTEMPTS: u32 = 60;

/// HTTP client bound to a base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    client: reqwest::Client,
    no_redirect: reqwest::Client,
    default_headers: Vec<(String, String)>,
    poll_config: PollConfig,
}

impl ApiClient {
    /// Create a client for `base_url`.
    ///
    /// The base URL should end with `/`, otherwise its last segment is
    /// replaced when joining paths.
    pub fn new(base_url: &str) -> Result<Self, HarnessError> {
        let base_url = Url::parse(base_url).map_err(|source| HarnessError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|source| HarnessError::Http {
                url: base_url.to_string(),
                source,
            })?;
        let no_redirect = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|source| HarnessError::Http {
                url: base_url.to_string(),
                source,
            })?;

        Ok(Self {
            base_url,
            client,
            no_redirect,
            default_headers: Vec::new(),
            poll_config: PollConfig::attempts(POLL_ATTEMPTS),
        })
    }

    /// Send `name: value` with every request made by this client.
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Replace the polling parameters used by [`ApiClient::poll`].
    pub fn with_poll_config(mut self, poll_config: PollConfig) -> Self {
        self.poll_config = poll_config;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the base URL.
    ///
    /// Absolute paths are rejected: they would silently drop the `/api/1/`
    /// prefix of the base URL.
    pub fn url(&self, path: &str) -> Result<Url, HarnessError> {
        if path.starts_with('/') {
            return Err(HarnessError::AbsolutePath(path.to_string()));
        }
        self.base_url
            .join(path)
            .map_err(|source| HarnessError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                source,
            })
    }

    /// Start building a request to `path`.
    pub fn call(&self, path: &str) -> ApiCall<'_> {
        ApiCall {
            client: self,
            path: path.to_string(),
            method: Method::GET,
            expected: 200,
            headers: Vec::new(),
            query: Vec::new(),
            json: None,
            raw: None,
        }
    }

    /// `GET path`, expecting a 200, and return the decoded body.
    pub async fn get_json(&self, path: &str) -> Result<Value, HarnessError> {
        self.call(path).send_json().await
    }

    /// `GET path`, expecting a 200, and deserialize the body into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<T, HarnessError> {
        let value = self.get_json(path).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `POST path` without a body, expecting a 200.
    pub async fn post(&self, path: &str) -> Result<Value, HarnessError> {
        self.call(path).method(Method::POST).send_json().await
    }

    /// `POST path` with a JSON body, expecting a 200.
    pub async fn post_json(&self, path: &str, body: Value) -> Result<Value, HarnessError> {
        self.call(path)
            .method(Method::POST)
            .json(body)
            .send_json()
            .await
    }

    /// `HEAD path`, expecting a 200.
    pub async fn head(&self, path: &str) -> Result<Response, HarnessError> {
        self.call(path).method(Method::HEAD).send_raw().await
    }

    /// Poll `GET path` until it answers with a status below 400.
    ///
    /// With `rewrite_redirect = Some((from, to))`, redirects are not followed
    /// automatically: a 302 answer has `from` replaced by `to` in its
    /// `Location` header and polling continues on the rewritten URL. This is
    /// how tests reach storage backends whose advertised host name is only
    /// resolvable inside the compose network.
    pub async fn poll(
        &self,
        path: &str,
        rewrite_redirect: Option<(&str, &str)>,
    ) -> Result<Response, HarnessError> {
        self.poll_with(Method::GET, path, rewrite_redirect).await
    }

    /// Same as [`ApiClient::poll`] with another HTTP method.
    pub async fn poll_with(
        &self,
        method: Method,
        path: &str,
        rewrite_redirect: Option<(&str, &str)>,
    ) -> Result<Response, HarnessError> {
        let mut url = self.url(path)?;
        let client = if rewrite_redirect.is_some() {
            &self.no_redirect
        } else {
            &self.client
        };
        let max_attempts = self.poll_config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let request =
                self.apply_default_headers(client.request(method.clone(), url.clone()));
            let response = request.send().await.map_err(|source| HarnessError::Http {
                url: url.to_string(),
                source,
            })?;
            let status = response.status();

            if status.as_u16() < 400 {
                match rewrite_redirect {
                    Some((from, to)) if status == StatusCode::FOUND => {
                        url = rewrite_location(&url, &response, from, to)?;
                        debug!(url = %url, "Following rewritten redirect");
                    }
                    _ => {
                        if attempt > 1 {
                            info!(url = %url, attempt = attempt, "Polled URL is ready");
                        }
                        return Ok(response);
                    }
                }
            } else {
                debug!(
                    method = %method,
                    url = %url,
                    status = status.as_u16(),
                    attempt = attempt,
                    "Polled URL not ready yet"
                );
            }

            if attempt < max_attempts {
                sleep(self.poll_config.interval).await;
            }
        }

        Err(HarnessError::PollExhausted {
            url: url.to_string(),
            attempts: max_attempts,
        })
    }

    /// Recursively list the directory `dir_id`.
    ///
    /// Entries are returned depth-first in listing order, as
    /// `(path relative to the root, entry)`. Sub-directories are walked and
    /// not returned themselves.
    pub async fn directory_tree(
        &self,
        dir_id: &str,
    ) -> Result<Vec<(String, DirectoryEntry)>, HarnessError> {
        let root: Vec<DirectoryEntry> = self.get_as(&format!("directory/{dir_id}/")).await?;
        let mut tree = Vec::new();
        let mut stack = vec![(String::new(), root.into_iter())];

        while let Some((prefix, entries)) = stack.last_mut() {
            let Some(entry) = entries.next() else {
                stack.pop();
                continue;
            };
            let path = join_path(prefix, &entry.name);
            if entry.kind == EntryKind::Dir {
                let listing: Vec<DirectoryEntry> =
                    self.get_as(&format!("directory/{}/", entry.target)).await?;
                stack.push((path, listing.into_iter()));
            } else {
                tree.push((path, entry));
            }
        }

        Ok(tree)
    }

    fn apply_default_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        for (name, value) in &self.default_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

/// A request being built by [`ApiClient::call`].
#[derive(Debug)]
#[must_use = "an ApiCall does nothing until sent"]
pub struct ApiCall<'a> {
    client: &'a ApiClient,
    path: String,
    method: Method,
    expected: u16,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    json: Option<Value>,
    raw: Option<bool>,
}

/// What a successful [`ApiCall`] returns.
#[derive(Debug)]
pub enum ApiReply {
    /// The decoded body (see [`decode_body`]).
    Json(Value),
    /// The untouched response, for HEAD requests and binary payloads.
    Raw(Response),
}

impl ApiReply {
    /// The decoded body, or [`Value::Null`] for raw replies.
    pub fn into_json(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Raw(_) => Value::Null,
        }
    }
}

impl ApiCall<'_> {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Status code the response must have (200 by default).
    pub fn expect(mut self, status: u16) -> Self {
        self.expected = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    /// Return the raw response instead of decoding its body.
    ///
    /// Defaults to `true` for HEAD requests and `false` otherwise.
    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Send the request and check its status.
    pub async fn send(self) -> Result<ApiReply, HarnessError> {
        let raw = self.raw.unwrap_or(self.method == Method::HEAD);
        let (url, response) = self.execute().await?;
        if raw {
            return Ok(ApiReply::Raw(response));
        }
        Ok(ApiReply::Json(read_body(&url, response).await?))
    }

    /// Send the request and return the decoded body.
    pub async fn send_json(self) -> Result<Value, HarnessError> {
        let (url, response) = self.execute().await?;
        read_body(&url, response).await
    }

    /// Send the request and return the untouched response.
    pub async fn send_raw(self) -> Result<Response, HarnessError> {
        let (_, response) = self.execute().await?;
        Ok(response)
    }

    async fn execute(self) -> Result<(Url, Response), HarnessError> {
        let url = self.client.url(&self.path)?;

        let mut request = self
            .client
            .apply_default_headers(self.client.client.request(self.method.clone(), url.clone()));
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !self.query.is_empty() {
            request = request.query(&self.query);
        }
        if let Some(body) = &self.json {
            request = request.json(body);
        }

        debug!(method = %self.method, url = %url, "Sending API request");
        let response = request.send().await.map_err(|source| HarnessError::Http {
            url: url.to_string(),
            source,
        })?;

        let status = response.status().as_u16();
        if status != self.expected {
            let body = response.text().await.unwrap_or_default();
            return Err(HarnessError::UnexpectedStatus {
                url: url.to_string(),
                expected: self.expected,
                actual: status,
                body,
            });
        }

        Ok((url, response))
    }
}

async fn read_body(url: &Url, response: Response) -> Result<Value, HarnessError> {
    let bytes = response.bytes().await.map_err(|source| HarnessError::Http {
        url: url.to_string(),
        source,
    })?;
    Ok(decode_body(&bytes))
}

/// Decode a response body.
///
/// An empty body is [`Value::Null`] and a body that is not JSON is returned
/// as a [`Value::String`].
pub fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Percent-encode `value` for use as a single path segment, spaces as `+`.
///
/// Origin URLs are embedded this way in API paths such as
/// `origin/<url>/visit/latest/`.
pub fn quote_plus(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn rewrite_location(
    current: &Url,
    response: &Response,
    from: &str,
    to: &str,
) -> Result<Url, HarnessError> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| HarnessError::UnexpectedResponse {
            source_name: current.to_string(),
            message: "302 response without a usable Location header".to_string(),
        })?;
    let rewritten = location.replace(from, to);
    current
        .join(&rewritten)
        .map_err(|source| HarnessError::InvalidUrl {
            url: rewritten,
            source,
        })
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Type of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Rev,
}

/// One entry of a `directory/<id>/` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub target: String,
    /// Remaining fields (`length`, `checksums`, `perms`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl DirectoryEntry {
    /// Length in bytes, for file entries.
    pub fn length(&self) -> Option<u64> {
        self.extra.get("length").and_then(Value::as_u64)
    }

    /// Hex checksum `algo` (`sha1`, `sha256`, ...) of a file entry.
    pub fn checksum(&self, algo: &str) -> Option<&str> {
        self.extra
            .get("checksums")
            .and_then(|checksums| checksums.get(algo))
            .and_then(Value::as_str)
    }
}
