//! Response normalization across the upstream's REST and GraphQL surfaces.
//!
//! Every API call, regardless of shape, resolves to one envelope:
//! `{success, status?, result, errors[], messages[]}`. Partial GraphQL data
//! is preserved alongside its errors rather than discarded.

use serde::Serialize;
use serde_json::{json, Value};
use strato_error::UpstreamError;

/// A single code/message pair in the normalized envelope.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApiMessage {
    /// Upstream error code, 0 when the upstream supplied none.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// Classify a request path as GraphQL or REST.
///
/// The query string is stripped and trailing slashes trimmed before the
/// comparison; a path is GraphQL when it equals the fixed GraphQL path or
/// ends with `/graphql`.
pub fn is_graphql_path(path: &str, graphql_path: &str) -> bool {
    let bare = path.split('?').next().unwrap_or("");
    let bare = bare.trim_end_matches('/');
    bare == graphql_path.trim_end_matches('/') || bare.ends_with("/graphql")
}

/// Normalize a GraphQL response body.
///
/// - `errors` is read defensively: anything that is not an array counts as
///   no errors.
/// - Errors with no `data` payload at all are a complete failure and become
///   an [`UpstreamError::GraphQl`].
/// - Otherwise the envelope carries `success = errors.is_empty()`, `result`
///   = `data` (partial data preserved), mapped errors, and one synthetic
///   `messages` entry summarizing the error count when errors are present.
pub fn normalize_graphql(status: u16, body: &Value) -> Result<Value, UpstreamError> {
    let errors: Vec<&Value> = match body.get("errors") {
        Some(Value::Array(items)) => items.iter().collect(),
        _ => Vec::new(),
    };

    let data = body.get("data").filter(|d| !d.is_null());

    if !errors.is_empty() && data.is_none() {
        let message = errors
            .iter()
            .map(|e| graphql_error_message(e))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(UpstreamError::GraphQl { message });
    }

    let mapped: Vec<ApiMessage> = errors
        .iter()
        .map(|e| ApiMessage {
            code: e
                .get("extensions")
                .and_then(|x| x.get("code"))
                .and_then(Value::as_i64)
                .unwrap_or(0),
            message: graphql_error_message(e),
        })
        .collect();

    let messages: Vec<ApiMessage> = if mapped.is_empty() {
        Vec::new()
    } else {
        vec![ApiMessage {
            code: 0,
            message: format!("{} GraphQL error(s) occurred", mapped.len()),
        }]
    };

    Ok(json!({
        "success": mapped.is_empty(),
        "status": status,
        "result": data.cloned().unwrap_or(Value::Null),
        "errors": mapped,
        "messages": messages,
    }))
}

/// Render one GraphQL error as `message (at a.b.c)`.
fn graphql_error_message(error: &Value) -> String {
    let base = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown GraphQL error");
    match error.get("path").and_then(Value::as_array) {
        Some(path) if !path.is_empty() => {
            let dotted = path
                .iter()
                .map(|seg| match seg {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(".");
            format!("{base} (at {dotted})")
        }
        _ => base.to_string(),
    }
}

/// Normalize a REST response body.
///
/// The upstream's conventional envelope is `{success, result, errors,
/// messages}`. `success: false` becomes an [`UpstreamError::Api`] whose
/// message concatenates every `code: message` pair. Non-envelope JSON is
/// wrapped with `success` derived from the HTTP status.
pub fn normalize_rest(status: u16, body: &Value) -> Result<Value, UpstreamError> {
    let Some(success) = body.get("success").and_then(Value::as_bool) else {
        // Not the conventional envelope; wrap it
        return Ok(json!({
            "success": (200..300).contains(&status),
            "status": status,
            "result": body,
            "errors": [],
            "messages": [],
        }));
    };

    if !success {
        let message = collect_messages(body.get("errors"))
            .iter()
            .map(|m| format!("{}: {}", m.code, m.message))
            .collect::<Vec<_>>()
            .join("; ");
        let message = if message.is_empty() {
            format!("request failed with HTTP {status}")
        } else {
            message
        };
        return Err(UpstreamError::Api { message });
    }

    Ok(json!({
        "success": true,
        "status": status,
        "result": body.get("result").cloned().unwrap_or(Value::Null),
        "errors": collect_messages(body.get("errors")),
        "messages": collect_messages(body.get("messages")),
    }))
}

/// Read an upstream `errors`/`messages` array defensively.
fn collect_messages(node: Option<&Value>) -> Vec<ApiMessage> {
    match node {
        Some(Value::Array(items)) => items
            .iter()
            .map(|e| ApiMessage {
                code: e.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: e
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}
