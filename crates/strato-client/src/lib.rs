#![warn(missing_docs)]

//! # strato-client
//!
//! HTTP client for the one credentialed upstream API behind the Strato
//! gateway.
//!
//! Provides [`UpstreamApiClient`] — the Rust side of the sandbox's
//! `request()` capability. The access token is captured here at construction
//! time and never crosses into agent-visible code. Every outbound URL passes
//! the [`EgressPolicy`] before a connection is made, and every response is
//! normalized into the single `{success, status?, result, errors, messages}`
//! envelope regardless of whether the call was REST or GraphQL.

pub mod egress;
pub mod response;
pub mod timeout;

pub use egress::EgressPolicy;
pub use timeout::TimeoutDispatcher;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strato_error::UpstreamError;
use url::Url;

/// Maximum bytes of a non-JSON error body echoed into an error message.
const ERROR_BODY_PREVIEW: usize = 512;

/// A single upstream API request as submitted by sandbox code.
///
/// Field names are camelCase on the wire because the shape is authored in
/// JavaScript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApiRequest {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS).
    pub method: String,
    /// Path relative to the API base, e.g. `/accounts/{id}/workers/scripts`.
    pub path: String,
    /// Query parameters. `null` values are skipped.
    #[serde(default)]
    pub query: Option<Map<String, Value>>,
    /// JSON body, serialized unless `raw_body` is set.
    #[serde(default)]
    pub body: Option<Value>,
    /// Explicit Content-Type override.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Pre-serialized body sent verbatim.
    #[serde(default)]
    pub raw_body: Option<String>,
}

/// The capability surface the sandbox dispatches `request()` calls through.
///
/// Implementations hold the credential and the egress policy; sandbox code
/// never sees either.
#[async_trait::async_trait]
pub trait ApiDispatcher: Send + Sync {
    /// Perform one upstream API request and return the normalized envelope.
    async fn request(&self, req: ApiRequest) -> Result<Value, UpstreamError>;
}

/// Credential attached to outbound upstream requests.
#[derive(Debug, Clone)]
pub enum Credential {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// Legacy global key pair: `X-Auth-Email` + `X-Auth-Key`.
    GlobalKey {
        /// Account email.
        email: String,
        /// Global API key.
        key: String,
    },
}

/// A user identity resolved from the upstream `who am I` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Stable user id.
    pub id: String,
    /// Account email.
    pub email: String,
}

/// An account visible to a credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Stable account id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// HTTP client for the upstream API.
#[derive(Clone)]
pub struct UpstreamApiClient {
    http: reqwest::Client,
    base_url: String,
    graphql_path: String,
    credential: Credential,
    egress: EgressPolicy,
}

impl UpstreamApiClient {
    /// Create a client for the given API base with a captured credential.
    pub fn new(
        base_url: impl Into<String>,
        graphql_path: impl Into<String>,
        credential: Credential,
        egress: EgressPolicy,
    ) -> Result<Self, UpstreamError> {
        let base_url = base_url.into();
        Url::parse(&base_url)
            .map_err(|e| UpstreamError::InvalidRequest(format!("invalid API base URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| UpstreamError::Internal(anyhow::anyhow!(e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            graphql_path: graphql_path.into(),
            credential,
            egress,
        })
    }

    fn apply_credential(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Credential::Bearer(token) => req.bearer_auth(token),
            Credential::GlobalKey { email, key } => {
                req.header("X-Auth-Email", email).header("X-Auth-Key", key)
            }
        }
    }

    /// Issue the `who am I` and `list accounts` lookups concurrently and
    /// return both outcomes.
    ///
    /// Neither failure short-circuits the other: the caller inspects both to
    /// decide between user-scoped, account-scoped, and invalid credentials,
    /// so a partial upstream outage can still yield an account-scoped bundle.
    pub async fn identity(
        &self,
    ) -> (
        Result<Option<User>, UpstreamError>,
        Result<Vec<Account>, UpstreamError>,
    ) {
        tokio::join!(self.who_am_i(), self.list_accounts())
    }

    /// Resolve the credential to a user identity, if it has one.
    ///
    /// An upstream rejection (envelope failure or auth status) resolves to
    /// `Ok(None)` — the credential may still be account-scoped.
    pub async fn who_am_i(&self) -> Result<Option<User>, UpstreamError> {
        let envelope = match self
            .request(ApiRequest {
                method: "GET".into(),
                path: "/user".into(),
                query: None,
                body: None,
                content_type: None,
                raw_body: None,
            })
            .await
        {
            Ok(envelope) => envelope,
            Err(UpstreamError::Api { .. }) | Err(UpstreamError::Http { .. }) => return Ok(None),
            Err(other) => return Err(other),
        };

        let result = &envelope["result"];
        match (
            result.get("id").and_then(Value::as_str),
            result.get("email").and_then(Value::as_str),
        ) {
            (Some(id), Some(email)) => Ok(Some(User {
                id: id.to_string(),
                email: email.to_string(),
            })),
            _ => Ok(None),
        }
    }

    /// List accounts accessible to the credential.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, UpstreamError> {
        let envelope = self
            .request(ApiRequest {
                method: "GET".into(),
                path: "/accounts".into(),
                query: None,
                body: None,
                content_type: None,
                raw_body: None,
            })
            .await?;

        let accounts = envelope["result"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|a| {
                        Some(Account {
                            id: a.get("id")?.as_str()?.to_string(),
                            name: a
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(accounts)
    }
}

/// Build the final request URL: base joined with the path, query parameters
/// appended with `null` values skipped.
pub fn build_url(
    base_url: &str,
    path: &str,
    query: Option<&Map<String, Value>>,
) -> Result<Url, UpstreamError> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let mut url = Url::parse(&format!("{base_url}{path}"))
        .map_err(|e| UpstreamError::InvalidRequest(format!("invalid request path: {e}")))?;

    if let Some(query) = query {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            match value {
                Value::Null => continue,
                Value::String(s) => {
                    pairs.append_pair(key, s);
                }
                other => {
                    pairs.append_pair(key, &other.to_string());
                }
            }
        }
    }

    Ok(url)
}

#[async_trait::async_trait]
impl ApiDispatcher for UpstreamApiClient {
    async fn request(&self, req: ApiRequest) -> Result<Value, UpstreamError> {
        let method: reqwest::Method = req
            .method
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| UpstreamError::InvalidRequest(format!("bad method '{}'", req.method)))?;

        let url = build_url(&self.base_url, &req.path, req.query.as_ref())?;
        self.egress.check(&url)?;

        tracing::debug!(
            method = %method,
            path = %req.path,
            "upstream request dispatched"
        );

        let mut builder = self.apply_credential(self.http.request(method, url));

        if let Some(raw) = &req.raw_body {
            builder = builder.body(raw.clone());
            if let Some(ct) = &req.content_type {
                builder = builder.header(reqwest::header::CONTENT_TYPE, ct);
            }
        } else if let Some(body) = &req.body {
            match &req.content_type {
                Some(ct) => {
                    let rendered = match body {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    builder = builder
                        .header(reqwest::header::CONTENT_TYPE, ct)
                        .body(rendered);
                }
                None => {
                    builder = builder.json(body);
                }
            }
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| UpstreamError::Internal(anyhow::anyhow!("upstream request failed: {e}")))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if !content_type.contains("json") {
            let text = resp
                .text()
                .await
                .map_err(|e| UpstreamError::Internal(anyhow::anyhow!(e)))?;
            if (200..300).contains(&status) {
                return Ok(json!({
                    "success": true,
                    "status": status,
                    "result": text,
                }));
            }
            let mut preview = text;
            preview.truncate(ERROR_BODY_PREVIEW);
            return Err(UpstreamError::Http {
                status,
                body: preview,
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Internal(anyhow::anyhow!("invalid JSON response: {e}")))?;

        if response::is_graphql_path(&req.path, &self.graphql_path) {
            response::normalize_graphql(status, &body)
        } else {
            response::normalize_rest(status, &body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_joins_base_and_path() {
        let url = build_url("https://api.cloud.example/client/v4", "/zones", None).unwrap();
        assert_eq!(url.as_str(), "https://api.cloud.example/client/v4/zones");
    }

    #[test]
    fn build_url_adds_missing_leading_slash() {
        let url = build_url("https://api.cloud.example/client/v4", "zones", None).unwrap();
        assert_eq!(url.path(), "/client/v4/zones");
    }

    #[test]
    fn build_url_appends_query_and_skips_null() {
        let mut query = Map::new();
        query.insert("page".into(), json!(2));
        query.insert("name".into(), json!("my zone"));
        query.insert("absent".into(), Value::Null);

        let url = build_url("https://api.cloud.example/client/v4", "/zones", Some(&query)).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("page".into(), "2".into())));
        assert!(pairs.contains(&("name".into(), "my zone".into())));
        assert!(!pairs.iter().any(|(k, _)| k == "absent"));
    }

    #[test]
    fn api_request_deserializes_camel_case() {
        let req: ApiRequest = serde_json::from_value(json!({
            "method": "POST",
            "path": "/zones",
            "rawBody": "a=1",
            "contentType": "application/x-www-form-urlencoded"
        }))
        .unwrap();
        assert_eq!(req.raw_body.as_deref(), Some("a=1"));
        assert_eq!(
            req.content_type.as_deref(),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn api_request_rejects_unknown_fields() {
        let result: Result<ApiRequest, _> = serde_json::from_value(json!({
            "method": "GET",
            "path": "/zones",
            "headers": { "X-Sneaky": "1" }
        }));
        assert!(result.is_err());
    }
}
