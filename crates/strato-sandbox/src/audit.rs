//! Audit logging for sandbox executions.
//!
//! Every sandbox execution emits an [`AuditEntry`] containing:
//! - the execution's unique id (`exec-<uuid>`)
//! - SHA-256 hash of the code (never raw code in logs)
//! - a preview of the first 500 chars of code
//! - upstream requests made (with hashed bodies, not raw)
//! - duration and outcome
//!
//! The [`AuditLogger`] trait allows pluggable backends.
//! [`JsonLinesAuditLogger`] writes newline-delimited JSON to any `AsyncWrite`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::SandboxError;
use strato_client::{ApiDispatcher, ApiRequest};
use strato_error::UpstreamError;

/// Maximum length of the code preview in audit entries.
const CODE_PREVIEW_MAX: usize = 500;

/// A complete audit record for a single sandbox execution.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Unique execution identifier (`exec-<uuid>`).
    pub execution_id: String,
    /// ISO-8601 timestamp of when execution started.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hash of the submitted code.
    pub code_hash: String,
    /// First N characters of the code (for human review).
    pub code_preview: String,
    /// Whether this was a search or execute call.
    pub operation: AuditOperation,
    /// Upstream requests made during execution.
    pub requests: Vec<RequestAudit>,
    /// Total execution duration in milliseconds.
    pub duration_ms: u64,
    /// Size of the result in bytes.
    pub result_size_bytes: usize,
    /// Final outcome.
    pub outcome: AuditOutcome,
}

/// The type of sandbox operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuditOperation {
    /// A spec search operation.
    Search,
    /// A code execution operation with API access.
    Execute,
}

/// Audit record for a single upstream request within an execution.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAudit {
    /// HTTP method.
    pub method: String,
    /// Request path (bodies are hashed, paths are kept for review).
    pub path: String,
    /// SHA-256 hash of the serialized body, empty for body-less requests.
    pub body_hash: String,
    /// Duration of this request in milliseconds.
    pub duration_ms: u64,
    /// Whether the request succeeded.
    pub success: bool,
}

/// The outcome of an execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
#[non_exhaustive]
pub enum AuditOutcome {
    /// The execution returned a result.
    Success,
    /// The execution failed.
    Error {
        /// The error kind (timeout, js_error, heap_limit, ...).
        error_kind: String,
    },
}

/// Pluggable backend for audit entries.
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    /// Record one audit entry.
    async fn log(&self, entry: &AuditEntry);
}

/// Discards all audit entries.
pub struct NoopAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _entry: &AuditEntry) {}
}

/// Emits audit entries as structured tracing events.
pub struct TracingAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: &AuditEntry) {
        tracing::info!(
            target: "strato::audit",
            execution_id = %entry.execution_id,
            code_hash = %entry.code_hash,
            operation = ?entry.operation,
            requests = entry.requests.len(),
            duration_ms = entry.duration_ms,
            outcome = ?entry.outcome,
            "sandbox execution"
        );
    }
}

/// Writes newline-delimited JSON audit entries to an async writer.
pub struct JsonLinesAuditLogger<W: AsyncWrite + Unpin + Send> {
    writer: Arc<Mutex<W>>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesAuditLogger<W> {
    /// Create a logger writing to the given sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> AuditLogger for JsonLinesAuditLogger<W> {
    async fn log(&self, entry: &AuditEntry) {
        let Ok(mut line) = serde_json::to_vec(entry) else {
            return;
        };
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        if writer.write_all(&line).await.is_err() {
            tracing::warn!("audit sink write failed");
        }
    }
}

/// Builds an [`AuditEntry`] across the lifetime of one execution.
pub struct AuditEntryBuilder {
    execution_id: String,
    started: Instant,
    timestamp: DateTime<Utc>,
    code_hash: String,
    code_preview: String,
    operation: AuditOperation,
    requests: Vec<RequestAudit>,
}

impl AuditEntryBuilder {
    /// Start building an entry for the given code and operation.
    pub fn new(execution_id: &str, code: &str, operation: AuditOperation) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            started: Instant::now(),
            timestamp: Utc::now(),
            code_hash: sha256_hex(code.as_bytes()),
            code_preview: code.chars().take(CODE_PREVIEW_MAX).collect(),
            operation,
            requests: Vec::new(),
        }
    }

    /// Record one upstream request audit.
    pub fn record_request(&mut self, request: RequestAudit) {
        self.requests.push(request);
    }

    /// Finish the entry from the execution result.
    pub fn finish(self, result: &Result<Value, SandboxError>) -> AuditEntry {
        let (outcome, result_size_bytes) = match result {
            Ok(value) => (
                AuditOutcome::Success,
                serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0),
            ),
            Err(e) => (
                AuditOutcome::Error {
                    error_kind: error_kind(e).to_string(),
                },
                0,
            ),
        };
        AuditEntry {
            execution_id: self.execution_id,
            timestamp: self.timestamp,
            code_hash: self.code_hash,
            code_preview: self.code_preview,
            operation: self.operation,
            requests: self.requests,
            duration_ms: self.started.elapsed().as_millis() as u64,
            result_size_bytes,
            outcome,
        }
    }
}

/// Stable error-kind labels for audit entries and metrics.
pub fn error_kind(error: &SandboxError) -> &'static str {
    match error {
        SandboxError::Timeout { .. } => "timeout",
        SandboxError::HeapLimitExceeded => "heap_limit",
        SandboxError::JsError { .. } => "js_error",
        SandboxError::ValidationFailed { .. } | SandboxError::BannedPattern { .. } => "validation",
        SandboxError::CodeTooLarge { .. } => "code_too_large",
        SandboxError::OutputTooLarge { .. } => "output_too_large",
        SandboxError::ConcurrencyLimit { .. } => "concurrency_limit",
        SandboxError::RequestLimit { .. } => "request_limit",
        SandboxError::Serialization(_) => "serialization",
        SandboxError::Execution(_) => "execution",
    }
}

/// Wraps an [`ApiDispatcher`] and reports a [`RequestAudit`] per call.
pub struct AuditingDispatcher {
    inner: Arc<dyn ApiDispatcher>,
    audit_tx: tokio::sync::mpsc::UnboundedSender<RequestAudit>,
}

impl AuditingDispatcher {
    /// Wrap a dispatcher with audit reporting.
    pub fn new(
        inner: Arc<dyn ApiDispatcher>,
        audit_tx: tokio::sync::mpsc::UnboundedSender<RequestAudit>,
    ) -> Self {
        Self { inner, audit_tx }
    }
}

#[async_trait::async_trait]
impl ApiDispatcher for AuditingDispatcher {
    async fn request(&self, req: ApiRequest) -> Result<Value, UpstreamError> {
        let method = req.method.clone();
        let path = req.path.clone();
        let body_hash = match (&req.body, &req.raw_body) {
            (_, Some(raw)) => sha256_hex(raw.as_bytes()),
            (Some(body), None) => sha256_hex(body.to_string().as_bytes()),
            (None, None) => String::new(),
        };

        let started = Instant::now();
        let result = self.inner.request(req).await;

        let _ = self.audit_tx.send(RequestAudit {
            method,
            path,
            body_hash,
            duration_ms: started.elapsed().as_millis() as u64,
            success: result.is_ok(),
        });

        result
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
