//! HTTP surface: the `/mcp` streamable endpoint behind the authentication
//! dispatcher, and the OAuth consent flow routes around it.
//!
//! `/token` and `/register` are thin delegations to the configured
//! [`AuthorizationHelper`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};

use strato_audit::{AuditEvent, SecurityRejection};
use strato_auth::consent::{decode_consent_state, render_consent_page, render_error_page};
use strato_auth::cookies::{
    add_approved_client, clear_cookie, cookie_value, csrf_matches, mint_csrf_token, set_cookie,
    sign_approved_clients, verify_approved_clients, APPROVED_CLIENTS_COOKIE,
    APPROVED_CLIENTS_MAX_AGE, CSRF_COOKIE, SESSION_BINDING_COOKIE, SHORT_COOKIE_MAX_AGE,
};
use strato_auth::oauth::{
    exchange_code, parse_authorization_request, resolve_granted_scopes, start_upstream_redirect,
    validate_callback_state,
};
use strato_auth::{
    AuthDispatcher, AuthProps, AuthorizationHelper, OAuthError, OAuthErrorKind,
    RequestCredentials, StateStore,
};
use strato_client::{Credential, EgressPolicy, UpstreamApiClient};
use strato_config::GatewayConfig;

use crate::GatewayServer;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// The loaded gateway configuration.
    pub config: Arc<GatewayConfig>,
    /// Header-to-credential resolver for `/mcp`.
    pub auth: Arc<AuthDispatcher>,
    /// Grant bookkeeping behind `/token` and `/register`.
    pub helper: Arc<dyn AuthorizationHelper>,
    /// Pending-authorization state store.
    pub state_store: Arc<dyn StateStore>,
    /// Outbound egress policy.
    pub egress: EgressPolicy,
}

/// Build the gateway's axum router.
///
/// `/mcp` serves the MCP streamable HTTP transport; every request through it
/// passes the authentication middleware, which stores the resolved
/// [`AuthProps`] in the request extensions for the tool handlers.
pub fn gateway_router(state: AppState, server: GatewayServer, ct: CancellationToken) -> Router {
    let service: StreamableHttpService<GatewayServer, LocalSessionManager> =
        StreamableHttpService::new(
            move || Ok(server.clone()),
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig {
                stateful_mode: true,
                cancellation_token: ct,
                ..Default::default()
            },
        );

    let mcp: Router<AppState> = Router::new()
        .nest_service("/mcp", service)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            mcp_auth_middleware,
        ));

    Router::new()
        .route("/authorize", get(authorize_get).post(authorize_post))
        .route("/oauth/callback", get(oauth_callback))
        .route("/token", get(token_endpoint).post(token_endpoint))
        .route("/register", post(register_client))
        .merge(mcp)
        .with_state(state)
}

/// Axum middleware: resolve inbound credentials to an [`AuthProps`] bundle.
///
/// 401/400 JSON on failure; on success the bundle rides in the request
/// extensions into the MCP tool handlers.
pub(crate) async fn mcp_auth_middleware(
    State(state): State<AppState>,
    mut request: axum::extract::Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let creds = RequestCredentials {
        email: header_string(headers, "x-auth-email"),
        api_key: header_string(headers, "x-auth-key"),
        bearer: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|s| s.to_string()),
        account_id: header_string(headers, "x-account-id"),
    };

    match state.auth.resolve(&creds).await {
        Ok(props) => {
            request.extensions_mut().insert(props);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "mcp auth rejected");
            (
                StatusCode::from_u16(e.status()).unwrap_or(StatusCode::UNAUTHORIZED),
                Json(e.to_json()),
            )
                .into_response()
        }
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn cookie_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::COOKIE).and_then(|v| v.to_str().ok())
}

fn append_cookie(response: &mut Response, cookie: String) {
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

/// Previously-approved client ids from the signed cookie, fail closed.
fn approved_clients_from(headers: &HeaderMap, secret: &[u8]) -> Vec<String> {
    let Some(raw) = cookie_header(headers)
        .and_then(|h| cookie_value(h, APPROVED_CLIENTS_COOKIE))
        .filter(|v| !v.is_empty())
    else {
        return Vec::new();
    };
    match verify_approved_clients(secret, raw) {
        Some(clients) => clients,
        None => {
            AuditEvent::security_rejection(
                SecurityRejection::CookieTampered,
                "approved-clients cookie failed signature verification",
            );
            Vec::new()
        }
    }
}

fn oauth_error_page(error: &OAuthError) -> Response {
    if error.kind == OAuthErrorKind::ServerError {
        tracing::error!(detail = %error.description, "oauth server error");
    } else {
        tracing::warn!(code = error.kind.code(), detail = %error.description, "oauth error");
    }
    (
        StatusCode::from_u16(error.kind.status()).unwrap_or(StatusCode::BAD_REQUEST),
        Html(render_error_page(error)),
    )
        .into_response()
}

fn oauth_error_json(error: &OAuthError) -> Response {
    if error.kind == OAuthErrorKind::ServerError {
        tracing::error!(detail = %error.description, "oauth server error");
    }
    (
        StatusCode::from_u16(error.kind.status()).unwrap_or(StatusCode::BAD_REQUEST),
        Json(error.to_json()),
    )
        .into_response()
}

/// `GET /authorize` — consent flow entry.
pub(crate) async fn authorize_get(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let request = match parse_authorization_request(&params) {
        Ok(request) => request,
        Err(e) => return oauth_error_page(&e),
    };

    let secret = state.config.cookies.signing_secret.as_bytes();
    let approved = approved_clients_from(&headers, secret);

    if approved.iter().any(|c| c == &request.client_id) {
        // Previously approved: skip consent and go straight upstream with
        // the default template.
        let scopes = resolve_granted_scopes(&[], None);
        return match start_upstream_redirect(
            &state.config.upstream,
            state.state_store.as_ref(),
            request,
            scopes,
        ) {
            Ok(redirect) => {
                let mut response = Redirect::to(redirect.url.as_str()).into_response();
                append_cookie(
                    &mut response,
                    set_cookie(
                        SESSION_BINDING_COOKIE,
                        &redirect.session_cookie_value,
                        SHORT_COOKIE_MAX_AGE,
                    ),
                );
                response
            }
            Err(e) => oauth_error_page(&e),
        };
    }

    let csrf = mint_csrf_token();
    let mut response = Html(render_consent_page(&request, &csrf)).into_response();
    append_cookie(
        &mut response,
        set_cookie(CSRF_COOKIE, &csrf, SHORT_COOKIE_MAX_AGE),
    );
    response
}

/// The consent form fields, parsed from the urlencoded body.
///
/// `scopes` repeats per checked checkbox, which `serde_urlencoded` cannot
/// collect — parsed by hand instead.
#[derive(Debug, Default)]
struct ConsentForm {
    csrf_token: String,
    state: String,
    template: Option<String>,
    decision: Option<String>,
    scopes: Vec<String>,
}

impl ConsentForm {
    fn parse(body: &[u8]) -> Self {
        let mut form = Self::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "csrf_token" => form.csrf_token = value.into_owned(),
                "state" => form.state = value.into_owned(),
                "template" => form.template = Some(value.into_owned()),
                "decision" => form.decision = Some(value.into_owned()),
                "scopes" => form.scopes.push(value.into_owned()),
                _ => {}
            }
        }
        form
    }
}

/// `POST /authorize` — consent form submission.
pub(crate) async fn authorize_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let form = ConsentForm::parse(&body);

    // CSRF double-submit: form value must equal the cookie value. Both are
    // server-issued randoms over TLS, so byte equality suffices.
    let cookie_csrf = cookie_header(&headers)
        .and_then(|h| cookie_value(h, CSRF_COOKIE))
        .unwrap_or("");
    if !csrf_matches(&form.csrf_token, cookie_csrf) {
        AuditEvent::security_rejection(
            SecurityRejection::CsrfMismatch,
            "consent form CSRF token did not match the cookie",
        );
        return oauth_error_page(&OAuthError::invalid_request("CSRF token mismatch"));
    }

    let request = match decode_consent_state(&form.state) {
        Ok(request) => request,
        Err(e) => return oauth_error_page(&e),
    };

    if form.decision.as_deref() == Some("deny") {
        return oauth_error_page(&OAuthError::access_denied("the user denied the request"));
    }

    // Checkboxes are authoritative when present; otherwise the selected
    // template. Capped server-side regardless of what the UI allowed.
    let scopes = resolve_granted_scopes(&form.scopes, form.template.as_deref());

    let secret = state.config.cookies.signing_secret.as_bytes();
    let approved = add_approved_client(approved_clients_from(&headers, secret), &request.client_id);
    let approved_cookie = sign_approved_clients(secret, &approved);

    match start_upstream_redirect(
        &state.config.upstream,
        state.state_store.as_ref(),
        request,
        scopes,
    ) {
        Ok(redirect) => {
            let mut response = Redirect::to(redirect.url.as_str()).into_response();
            append_cookie(
                &mut response,
                set_cookie(
                    APPROVED_CLIENTS_COOKIE,
                    &approved_cookie,
                    APPROVED_CLIENTS_MAX_AGE,
                ),
            );
            append_cookie(
                &mut response,
                set_cookie(
                    SESSION_BINDING_COOKIE,
                    &redirect.session_cookie_value,
                    SHORT_COOKIE_MAX_AGE,
                ),
            );
            append_cookie(&mut response, clear_cookie(CSRF_COOKIE));
            response
        }
        Err(e) => oauth_error_page(&e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// `GET /oauth/callback` — upstream redirect target.
pub(crate) async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    if let Some(error) = query.error {
        let description = query
            .error_description
            .unwrap_or_else(|| "the authorization server reported an error".into());
        return oauth_error_page(&OAuthError::access_denied(format!("{error}: {description}")));
    }

    let (Some(code), Some(state_param)) = (query.code, query.state) else {
        return oauth_error_page(&OAuthError::invalid_request("missing code or state"));
    };

    let session_cookie = cookie_header(&headers).and_then(|h| cookie_value(h, SESSION_BINDING_COOKIE));
    let pending =
        match validate_callback_state(state.state_store.as_ref(), &state_param, session_cookie) {
            Ok(pending) => pending,
            Err(e) => return oauth_error_page(&e),
        };

    let tokens = match exchange_code(&state.config.upstream, &code, &pending.code_verifier).await {
        Ok(tokens) => tokens,
        Err(e) => return oauth_error_page(&e),
    };

    // Idempotent client registration: this gateway never holds a per-client
    // secret, so the client is registered with a no-auth token endpoint
    // method.
    if let Err(e) = state
        .helper
        .create_client(
            &pending.oauth_req_info.client_id,
            &pending.oauth_req_info.redirect_uri,
        )
        .await
    {
        return oauth_error_page(&e);
    }

    // Resolve the identity behind the fresh token.
    let client = match UpstreamApiClient::new(
        &state.config.upstream.api_base_url,
        &state.config.upstream.graphql_path,
        Credential::Bearer(tokens.access_token.clone()),
        state.egress.clone(),
    ) {
        Ok(client) => client,
        Err(e) => return oauth_error_page(&OAuthError::server_error(e.to_string())),
    };
    let (user, accounts) = client.identity().await;
    let user = match user {
        Ok(Some(user)) => user,
        Ok(None) | Err(_) => {
            return oauth_error_page(&OAuthError::server_error(
                "freshly exchanged token resolves to no user",
            ))
        }
    };
    let accounts = accounts.unwrap_or_default();

    let props = AuthProps::UserToken {
        access_token: tokens.access_token,
        user,
        accounts,
        refresh_token: tokens.refresh_token,
    };

    let completed = match state
        .helper
        .complete_authorization(&pending.oauth_req_info, &pending.oauth_req_info.scope, props)
        .await
    {
        Ok(completed) => completed,
        Err(e) => return oauth_error_page(&e),
    };

    let mut response = Redirect::to(&completed.redirect_to).into_response();
    append_cookie(&mut response, clear_cookie(SESSION_BINDING_COOKIE));
    response
}

/// `GET|POST /token` — delegated token endpoint.
pub(crate) async fn token_endpoint(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let mut params = query;
    for (key, value) in url::form_urlencoded::parse(&body) {
        params.insert(key.into_owned(), value.into_owned());
    }

    match params.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            let (Some(code), Some(client_id)) = (params.get("code"), params.get("client_id"))
            else {
                return oauth_error_json(&OAuthError::invalid_request(
                    "missing code or client_id",
                ));
            };
            match state.helper.exchange_code(code, client_id).await {
                Ok(tokens) => Json(serde_json::to_value(&tokens).unwrap_or_default())
                    .into_response(),
                Err(e) => oauth_error_json(&e),
            }
        }
        Some(other) => oauth_error_json(&OAuthError::invalid_request(format!(
            "unsupported grant_type '{other}'"
        ))),
        None => oauth_error_json(&OAuthError::invalid_request("missing grant_type")),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterRequest {
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// `POST /register` — delegated dynamic client registration.
pub(crate) async fn register_client(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let client_id = request
        .client_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let redirect_uri = request.redirect_uris.first().cloned().unwrap_or_default();

    match state.helper.create_client(&client_id, &redirect_uri).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(json!({
                "client_id": client_id,
                "redirect_uris": request.redirect_uris,
                "token_endpoint_auth_method": "none",
            })),
        )
            .into_response(),
        Err(e) => oauth_error_json(&e),
    }
}
