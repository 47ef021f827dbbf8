//! Minimal mock of the upstream cloud API for integration testing.
//!
//! Serves the conventional `{success, result, errors, messages}` REST
//! envelope, a GraphQL endpoint with a deliberately partial response, the
//! identity/accounts lookups, and an OAuth token endpoint. Point a locally
//! running gateway at it to exercise every normalization branch without a
//! real account.

use axum::extract::Query;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;

fn ok_envelope(result: Value) -> Json<Value> {
    Json(json!({
        "success": true,
        "result": result,
        "errors": [],
        "messages": []
    }))
}

fn auth_error() -> Json<Value> {
    Json(json!({
        "success": false,
        "result": null,
        "errors": [{ "code": 10000, "message": "Authentication error" }],
        "messages": []
    }))
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer "))
}

async fn user(headers: HeaderMap) -> Json<Value> {
    if bearer_ok(&headers) || headers.contains_key("x-auth-key") {
        ok_envelope(json!({ "id": "user-0001", "email": "tester@example.com" }))
    } else {
        auth_error()
    }
}

async fn accounts(headers: HeaderMap) -> Json<Value> {
    if bearer_ok(&headers) || headers.contains_key("x-auth-key") {
        ok_envelope(json!([
            { "id": "acc-0001", "name": "Test Account" },
            { "id": "acc-0002", "name": "Second Account" }
        ]))
    } else {
        auth_error()
    }
}

async fn zones(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let page: usize = params
        .get("page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(1);
    ok_envelope(json!([
        { "id": format!("zone-{page}a"), "name": "example.com", "status": "active" },
        { "id": format!("zone-{page}b"), "name": "example.org", "status": "pending" }
    ]))
}

async fn workers_scripts() -> Json<Value> {
    ok_envelope(json!([
        { "id": "worker-hello", "created_on": "2025-11-02T10:00:00Z" }
    ]))
}

/// GraphQL endpoint returning partial data plus one field error, which a
/// correct normalizer must surface side by side.
async fn graphql() -> Json<Value> {
    Json(json!({
        "data": {
            "viewer": { "accounts": [{ "accountTag": "acc-0001" }] },
            "httpRequests": null
        },
        "errors": [
            {
                "message": "dataset not available for this account",
                "path": ["viewer", "httpRequests"],
                "extensions": { "code": 2004 }
            }
        ]
    }))
}

async fn export_csv() -> &'static str {
    "zone,requests\nexample.com,120\nexample.org,7\n"
}

async fn oauth_token() -> Json<Value> {
    Json(json!({
        "access_token": "mock-upstream-access-token",
        "refresh_token": "mock-upstream-refresh-token",
        "token_type": "bearer",
        "expires_in": 3600
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let bind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8788".to_string());

    let app = Router::new()
        .route("/client/v4/user", get(user))
        .route("/client/v4/accounts", get(accounts))
        .route("/client/v4/zones", get(zones))
        .route(
            "/client/v4/accounts/{account_id}/workers/scripts",
            get(workers_scripts),
        )
        .route("/client/v4/graphql", post(graphql))
        .route("/client/v4/zones/export", get(export_csv))
        .route("/oauth2/token", post(oauth_token));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, "mock upstream API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
