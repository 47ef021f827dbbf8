//! The OAuth authorization-code flow against the upstream provider.
//!
//! State machine per authorization attempt:
//!
//! `START → (client previously approved?) → AUTO_REDIRECT or CONSENT_SHOWN →
//! CONSENTED → UPSTREAM_REDIRECT → CALLBACK_RECEIVED → TOKEN_EXCHANGED →
//! COMPLETE`
//!
//! The upstream redirect carries a base64-JSON `state` parameter whose
//! payload's `state` field is the random correlation token; the caller's own
//! `state` value is preserved untouched inside the persisted
//! [`AuthorizationRequest`] and echoed on the final redirect.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use strato_config::UpstreamConfig;
use url::Url;

use crate::cookies;
use crate::error::OAuthError;
use crate::pkce::{generate_pkce, PkcePair};
use crate::state::{new_state_token, PendingAuthorization, StateStore};

/// A parsed OAuth authorization request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationRequest {
    /// Always `code` for this gateway.
    #[serde(default = "default_response_type")]
    pub response_type: String,
    /// The requesting OAuth client.
    pub client_id: String,
    /// Where the client wants the authorization code delivered.
    pub redirect_uri: String,
    /// Requested scopes; overwritten to the consented set before redirect.
    #[serde(default)]
    pub scope: Vec<String>,
    /// The caller's opaque state, echoed verbatim on the final redirect.
    #[serde(default)]
    pub state: String,
}

fn default_response_type() -> String {
    "code".to_string()
}

/// Parse an inbound `GET /authorize` query into an [`AuthorizationRequest`].
///
/// A missing client id is a terminal `invalid_request`. The requested scope
/// list is recorded but the consent flow overwrites it with the default
/// template until the user decides.
pub fn parse_authorization_request(
    query: &HashMap<String, String>,
) -> Result<AuthorizationRequest, OAuthError> {
    let client_id = query
        .get("client_id")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OAuthError::invalid_request("missing client_id"))?
        .to_string();

    let redirect_uri = query
        .get("redirect_uri")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OAuthError::invalid_request("missing redirect_uri"))?
        .to_string();
    Url::parse(&redirect_uri)
        .map_err(|_| OAuthError::invalid_request("redirect_uri is not a valid URL"))?;

    let scope: Vec<String> = query
        .get("scope")
        .map(|s| s.split_whitespace().map(|x| x.to_string()).collect())
        .unwrap_or_default();

    for name in &scope {
        if strato_scopes::find_scope(name).is_none() {
            match strato_scopes::suggest_scope(name) {
                Some(similar) => {
                    tracing::warn!(scope = %name, similar, "client requested unknown scope")
                }
                None => tracing::warn!(scope = %name, "client requested unknown scope"),
            }
        }
    }

    Ok(AuthorizationRequest {
        response_type: query
            .get("response_type")
            .cloned()
            .unwrap_or_else(default_response_type),
        client_id,
        redirect_uri,
        scope,
        state: query.get("state").cloned().unwrap_or_default(),
    })
}

/// Payload of the upstream `state` query parameter, base64-JSON encoded.
///
/// The `state` field is the random correlation token keying the pending
/// authorization — not the caller's state, which stays inside the persisted
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamStateBlob {
    /// Correlation token for the pending-state store.
    pub state: String,
    /// The downstream client that started the flow.
    pub client_id: String,
    /// The downstream redirect URI.
    pub redirect_uri: String,
}

impl UpstreamStateBlob {
    /// Encode as base64 JSON for the upstream redirect.
    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        BASE64_STD.encode(json.as_bytes())
    }

    /// Decode the `state` query parameter from the upstream callback.
    pub fn decode(raw: &str) -> Result<Self, OAuthError> {
        let bytes = BASE64_STD
            .decode(raw.trim())
            .map_err(|_| OAuthError::invalid_request("state parameter is not valid base64"))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| OAuthError::invalid_request("state parameter is not valid JSON"))
    }
}

/// Everything the server layer needs to send the browser upstream.
pub struct UpstreamRedirect {
    /// The authorization URL to redirect to.
    pub url: Url,
    /// Value for the session-binding cookie (SHA-256 of the state token).
    pub session_cookie_value: String,
}

/// Begin the upstream leg of an authorization: generate a PKCE pair, persist
/// the pending state under a fresh correlation token, and build the
/// redirect URL.
///
/// The caller must set the session-binding cookie from the returned value —
/// that cookie is what makes a guessed state token useless to an attacker.
pub fn start_upstream_redirect(
    upstream: &UpstreamConfig,
    store: &dyn StateStore,
    mut request: AuthorizationRequest,
    granted_scopes: Vec<String>,
) -> Result<UpstreamRedirect, OAuthError> {
    let pkce: PkcePair = generate_pkce();
    let token = new_state_token();

    request.scope = granted_scopes.clone();
    store.put(
        &token,
        PendingAuthorization {
            oauth_req_info: request.clone(),
            code_verifier: pkce.verifier,
        },
    );

    let blob = UpstreamStateBlob {
        state: token.clone(),
        client_id: request.client_id,
        redirect_uri: request.redirect_uri,
    };

    let mut url = Url::parse(&upstream.oauth_authorize_url)
        .map_err(|e| OAuthError::server_error(format!("bad authorize URL in config: {e}")))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &upstream.oauth_client_id)
        .append_pair("redirect_uri", &upstream.oauth_redirect_uri)
        .append_pair("state", &blob.encode())
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("scope", &granted_scopes.join(" "));

    Ok(UpstreamRedirect {
        url,
        session_cookie_value: cookies::hash_state_token(&token),
    })
}

/// Validate the callback leg: recover the pending authorization, enforce the
/// session binding, and schema-check the stored payload.
///
/// Failure classification follows the trust boundary: a missing/expired
/// state or a cookie mismatch is caller/attacker input (`invalid_request`,
/// logged as a potential attack); a malformed *stored* payload indicates
/// server-side corruption (`server_error`).
pub fn validate_callback_state(
    store: &dyn StateStore,
    state_param: &str,
    session_cookie: Option<&str>,
) -> Result<PendingAuthorization, OAuthError> {
    let blob = UpstreamStateBlob::decode(state_param)?;

    let Some(pending) = store.take(&blob.state) else {
        strato_audit::AuditEvent::security_rejection(
            strato_audit::SecurityRejection::StateUnknown,
            "authorization state absent, expired, or already used",
        );
        return Err(OAuthError::invalid_request(
            "authorization state is unknown or expired",
        ));
    };

    let expected_hash = cookies::hash_state_token(&blob.state);
    if session_cookie != Some(expected_hash.as_str()) {
        strato_audit::AuditEvent::security_rejection(
            strato_audit::SecurityRejection::StateBindingMismatch,
            "session cookie hash does not match the state token",
        );
        return Err(OAuthError::invalid_request(
            "this browser did not start the authorization",
        ));
    }

    // Schema check on the stored payload. Defects here are ours, not the
    // caller's.
    if pending.oauth_req_info.client_id.trim().is_empty() {
        return Err(OAuthError::server_error(
            "stored authorization state has no client_id",
        ));
    }
    if pending.code_verifier.trim().is_empty() {
        return Err(OAuthError::server_error(
            "stored authorization state has no code verifier",
        ));
    }

    Ok(pending)
}

/// Tokens returned by the upstream token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamTokens {
    /// The upstream access token.
    pub access_token: String,
    /// Optional refresh token (`offline_access` grants).
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Exchange an authorization code (plus PKCE verifier) for upstream tokens.
pub async fn exchange_code(
    upstream: &UpstreamConfig,
    code: &str,
    code_verifier: &str,
) -> Result<UpstreamTokens, OAuthError> {
    let mut form = vec![
        ("grant_type", "authorization_code".to_string()),
        ("code", code.to_string()),
        ("redirect_uri", upstream.oauth_redirect_uri.clone()),
        ("client_id", upstream.oauth_client_id.clone()),
        ("code_verifier", code_verifier.to_string()),
    ];
    if !upstream.oauth_client_secret.is_empty() {
        form.push(("client_secret", upstream.oauth_client_secret.clone()));
    }
    post_token_endpoint(upstream, &form).await
}

/// Refresh an upstream access token.
pub async fn refresh_token(
    upstream: &UpstreamConfig,
    refresh_token: &str,
) -> Result<UpstreamTokens, OAuthError> {
    let mut form = vec![
        ("grant_type", "refresh_token".to_string()),
        ("refresh_token", refresh_token.to_string()),
        ("client_id", upstream.oauth_client_id.clone()),
    ];
    if !upstream.oauth_client_secret.is_empty() {
        form.push(("client_secret", upstream.oauth_client_secret.clone()));
    }
    post_token_endpoint(upstream, &form).await
}

async fn post_token_endpoint(
    upstream: &UpstreamConfig,
    form: &[(&str, String)],
) -> Result<UpstreamTokens, OAuthError> {
    let client = reqwest::Client::new();
    let resp = client
        .post(&upstream.oauth_token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| OAuthError::server_error(format!("token endpoint unreachable: {e}")))?;

    let status = resp.status();
    let body: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| OAuthError::server_error(format!("token endpoint returned non-JSON: {e}")))?;

    if !status.is_success() {
        let description = body
            .get("error_description")
            .or_else(|| body.get("error"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("token exchange rejected");
        return Err(OAuthError::invalid_grant(description.to_string()));
    }

    serde_json::from_value(body)
        .map_err(|e| OAuthError::server_error(format!("token endpoint payload malformed: {e}")))
}

/// Refresh the upstream access token bound to a stored credential bundle.
///
/// Triggered by the authorization helper on grant expiry. Only `user_token`
/// bundles carrying a refresh token are refreshable; the stored value is
/// re-validated against the discriminated schema first so tampered or stale
/// prop shapes are rejected before any upstream call. All identity fields
/// are left untouched.
///
/// Returns the updated bundle and the new TTL in seconds.
pub async fn refresh_user_props(
    upstream: &UpstreamConfig,
    stored: serde_json::Value,
) -> Result<(crate::dispatcher::AuthProps, u64), OAuthError> {
    use crate::dispatcher::AuthProps;

    let props: AuthProps = serde_json::from_value(stored)
        .map_err(|_| OAuthError::invalid_grant("stored grant props failed schema validation"))?;
    props
        .validate()
        .map_err(|_| OAuthError::invalid_grant("stored grant props failed shape validation"))?;

    let AuthProps::UserToken {
        user,
        accounts,
        refresh_token: Some(current_refresh),
        ..
    } = props
    else {
        return Err(OAuthError::invalid_grant(
            "grant is not refreshable (no refresh token or not user-scoped)",
        ));
    };

    let tokens = refresh_token(upstream, &current_refresh).await?;
    let UpstreamTokens {
        access_token,
        refresh_token: new_refresh,
        expires_in,
    } = tokens;

    Ok((
        AuthProps::UserToken {
            access_token,
            user,
            accounts,
            refresh_token: new_refresh.or(Some(current_refresh)),
        },
        expires_in,
    ))
}

/// Resolve the consented scope set from the submitted form.
///
/// Policy (deterministic, no merging): submitted checkboxes are
/// unconditionally authoritative when at least one is present; otherwise the
/// named template's scopes apply; an unknown or missing template name falls
/// back to the default template. The result is filtered to catalog scopes,
/// capped at [`strato_scopes::MAX_SCOPES`], and always carries
/// `offline_access` so refresh tokens are issued.
pub fn resolve_granted_scopes(checkboxes: &[String], template_name: Option<&str>) -> Vec<String> {
    let selected: Vec<String> = if !checkboxes.is_empty() {
        checkboxes.to_vec()
    } else {
        let template = template_name
            .and_then(strato_scopes::template_by_name)
            .unwrap_or_else(strato_scopes::default_template);
        template.scopes.iter().map(|s| s.to_string()).collect()
    };

    let mut scopes = strato_scopes::sanitize_scopes(&selected);
    if !scopes.iter().any(|s| s == "offline_access") {
        if scopes.len() == strato_scopes::MAX_SCOPES {
            scopes.pop();
        }
        scopes.insert(0, "offline_access".to_string());
    }
    scopes
}
