//! Security integration tests for the Strato sandbox.
//!
//! These verify the security properties through the full execution
//! pipeline, not just at the unit level: capability surface, credential
//! opacity, egress denial, and result-shaping.

use std::sync::Arc;

use strato_client::{ApiDispatcher, ApiRequest};
use strato_error::UpstreamError;
use strato_sandbox::{SandboxConfig, SandboxExecutor};

/// Stub dispatcher standing in for the credentialed client.
struct StubDispatcher;

#[async_trait::async_trait]
impl ApiDispatcher for StubDispatcher {
    async fn request(&self, _req: ApiRequest) -> Result<serde_json::Value, UpstreamError> {
        Ok(serde_json::json!({
            "success": true, "status": 200, "result": {}, "errors": [], "messages": []
        }))
    }
}

/// Dispatcher that refuses everything with an egress error, as the real
/// client does for non-allow-listed hosts.
struct DenyingDispatcher;

#[async_trait::async_trait]
impl ApiDispatcher for DenyingDispatcher {
    async fn request(&self, _req: ApiRequest) -> Result<serde_json::Value, UpstreamError> {
        Err(UpstreamError::EgressDenied {
            host: "attacker.example".into(),
        })
    }
}

fn test_executor() -> SandboxExecutor {
    SandboxExecutor::new(SandboxConfig::default())
}

#[tokio::test]
async fn token_is_not_reachable_from_sandbox_code() {
    // The credential lives in the dispatcher's closure on the Rust side.
    // Enumerate every global: nothing token-shaped may exist.
    let executor = test_executor();
    let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(StubDispatcher);

    let code = r#"async () => {
        const names = Object.getOwnPropertyNames(globalThis);
        return names.filter(n =>
            n.toLowerCase().includes("token") ||
            n.toLowerCase().includes("auth") ||
            n.toLowerCase().includes("key"));
    }"#;

    let result = executor
        .execute_code(code, dispatcher, None)
        .await
        .unwrap();
    assert_eq!(result, serde_json::json!([]));
}

#[tokio::test]
async fn request_rejection_reads_as_forbidden_not_as_secret() {
    let executor = test_executor();
    let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(DenyingDispatcher);

    let code = r#"async () => {
        try {
            await request({ method: "GET", path: "/anything" });
            return "allowed";
        } catch (e) {
            return e.message;
        }
    }"#;

    let result = executor
        .execute_code(code, dispatcher, None)
        .await
        .unwrap();
    let msg = result.as_str().unwrap();
    assert!(msg.contains("egress denied"), "got: {msg}");
}

#[tokio::test]
async fn search_isolate_cannot_mutate_future_executions() {
    // Fresh isolate per call: globals written by one execution are gone in
    // the next.
    let executor = test_executor();
    let spec = serde_json::json!({ "paths": {} });

    let write = r#"async () => { globalThis.leaked = "from-previous-call"; return 1; }"#;
    executor.execute_search(write, &spec).await.unwrap();

    let read = r#"async () => typeof globalThis.leaked"#;
    let result = executor.execute_search(read, &spec).await.unwrap();
    assert_eq!(result, "undefined");
}

#[tokio::test]
async fn spec_mutation_does_not_leak_between_calls() {
    let executor = test_executor();
    let spec = serde_json::json!({ "paths": { "/zones": {} } });

    let mutate = r#"async () => { delete spec.paths["/zones"]; return Object.keys(spec.paths).length; }"#;
    let result = executor.execute_search(mutate, &spec).await.unwrap();
    assert_eq!(result, 0);

    // A later call sees the pristine document
    let read = r#"async () => Object.keys(spec.paths).length"#;
    let result = executor.execute_search(read, &spec).await.unwrap();
    assert_eq!(result, 1);
}

#[tokio::test]
async fn thrown_values_cross_the_boundary_as_records_not_exceptions() {
    let executor = test_executor();
    let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(StubDispatcher);

    // Throwing a non-Error value must still produce a contained JsError
    let code = r#"async () => { throw "raw string throw"; }"#;
    let err = executor
        .execute_code(code, dispatcher, None)
        .await
        .unwrap_err();
    match err {
        strato_sandbox::SandboxError::JsError { message, .. } => {
            assert!(message.contains("raw string throw"));
        }
        other => panic!("expected contained JsError, got: {other:?}"),
    }
}

#[tokio::test]
async fn oversized_results_hit_the_hard_backstop() {
    let executor = SandboxExecutor::new(SandboxConfig {
        max_output_size: 1024,
        ..Default::default()
    });
    let spec = serde_json::json!({});

    let code = r#"async () => "x".repeat(10_000)"#;
    let err = executor.execute_search(code, &spec).await.unwrap_err();
    assert!(matches!(
        err,
        strato_sandbox::SandboxError::OutputTooLarge { .. }
    ));
}
