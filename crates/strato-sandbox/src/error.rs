//! Error types for the Strato sandbox.

use thiserror::Error;

/// Errors that can occur during sandbox execution.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Code failed validation checks.
    #[error("code validation failed: {reason}")]
    ValidationFailed {
        /// What went wrong.
        reason: String,
    },

    /// Code exceeds the configured maximum size.
    #[error("code exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// Execution result exceeds the configured maximum size.
    ///
    /// This is the hard backstop behind the truncation layer; results under
    /// this cap but over the token budget are truncated, not rejected.
    #[error("output exceeds maximum size of {max} bytes")]
    OutputTooLarge {
        /// Maximum allowed size.
        max: usize,
    },

    /// Execution timed out (async event loop or CPU-bound watchdog).
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// A banned code pattern was detected during validation.
    #[error("banned pattern detected: `{pattern}` — the sandbox has no filesystem, module, or direct network access. Use request() for upstream API calls.")]
    BannedPattern {
        /// The pattern that was matched.
        pattern: String,
    },

    /// Generic execution failure.
    #[error("sandbox execution failed: {0}")]
    Execution(#[from] anyhow::Error),

    /// A JavaScript error was thrown by the submitted code.
    ///
    /// Captured at the isolation boundary as a `{result, err, stack}` record
    /// and re-raised here as a plain error — a native throw never crosses
    /// the boundary.
    #[error("javascript error: {message}")]
    JsError {
        /// The error message from JavaScript.
        message: String,
        /// The JavaScript stack trace, when one was available.
        stack: Option<String>,
    },

    /// Result serialization failed.
    #[error("result serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Too many concurrent sandbox executions.
    #[error("concurrency limit reached (max {max} concurrent executions)")]
    ConcurrencyLimit {
        /// Maximum allowed concurrent executions.
        max: usize,
    },

    /// Too many upstream API requests in a single execution.
    #[error("request limit exceeded (max {max} requests per execution)")]
    RequestLimit {
        /// Maximum allowed requests.
        max: usize,
    },

    /// V8 heap memory limit was exceeded.
    #[error("V8 heap limit exceeded")]
    HeapLimitExceeded,
}
