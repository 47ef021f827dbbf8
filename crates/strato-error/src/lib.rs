//! Typed error types for the Strato upstream API dispatcher.
//!
//! Provides [`UpstreamError`] — the canonical error type returned by the
//! `ApiDispatcher` trait that backs the sandbox's `request()` capability.

use thiserror::Error;

/// Canonical error type for upstream API operations.
///
/// All variants are `#[non_exhaustive]` to allow future additions without
/// breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpstreamError {
    /// The request targeted a host outside the egress allow-list.
    #[error("egress denied: host '{host}' is not allow-listed")]
    EgressDenied {
        /// The hostname that was rejected.
        host: String,
    },

    /// The upstream returned a non-success HTTP status with a non-JSON body.
    #[error("upstream HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body preview.
        body: String,
    },

    /// The upstream REST envelope reported `success: false`.
    ///
    /// The message concatenates every `code: message` pair from the envelope.
    #[error("upstream API error: {message}")]
    Api {
        /// Concatenated `code: message` pairs.
        message: String,
    },

    /// A GraphQL response carried errors and no data at all.
    #[error("graphql error: {message}")]
    GraphQl {
        /// Concatenated error messages.
        message: String,
    },

    /// The request shape was invalid before it ever left the gateway.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The operation timed out.
    #[error("timeout after {timeout_ms}ms calling the upstream API")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// An internal error (catch-all for unexpected failures).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl UpstreamError {
    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EgressDenied { .. } => "EGRESS_DENIED",
            Self::Http { .. } => "UPSTREAM_HTTP",
            Self::Api { .. } => "UPSTREAM_API",
            Self::GraphQl { .. } => "GRAPHQL_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the operation that produced this error may succeed if retried.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::EgressDenied { .. } => false,
            Self::Api { .. } => false,
            Self::GraphQl { .. } => false,
            Self::InvalidRequest(_) => false,
            Self::Internal(_) => false,
        }
    }

    /// Convert to a structured JSON error response for agent consumption.
    ///
    /// Returns a JSON object with `error`, `code`, `message`, `retryable`,
    /// and optionally `suggested_fix` for retryable conditions.
    pub fn to_structured_error(&self) -> serde_json::Value {
        let suggested_fix = match self {
            Self::Timeout { .. } => Some("Retry with a narrower request".to_string()),
            Self::Http { status, .. } if *status == 429 => {
                Some("Reduce request frequency".to_string())
            }
            Self::EgressDenied { .. } => {
                Some("Only the configured upstream API host is reachable".to_string())
            }
            _ => None,
        };

        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        });

        if let Some(fix) = suggested_fix {
            obj["suggested_fix"] = serde_json::Value::String(fix);
        }

        obj
    }
}

// Compile-time assertion: UpstreamError must be Send + Sync + 'static
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<UpstreamError>();
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_egress_denied() {
        let err = UpstreamError::EgressDenied {
            host: "evil.example".into(),
        };
        assert_eq!(
            err.to_string(),
            "egress denied: host 'evil.example' is not allow-listed"
        );
    }

    #[test]
    fn display_api_error() {
        let err = UpstreamError::Api {
            message: "10000: Authentication error".into(),
        };
        assert_eq!(
            err.to_string(),
            "upstream API error: 10000: Authentication error"
        );
    }

    #[test]
    fn code_exhaustive() {
        let cases: Vec<(UpstreamError, &str)> = vec![
            (
                UpstreamError::EgressDenied { host: "h".into() },
                "EGRESS_DENIED",
            ),
            (
                UpstreamError::Http {
                    status: 502,
                    body: "bad gateway".into(),
                },
                "UPSTREAM_HTTP",
            ),
            (UpstreamError::Api { message: "m".into() }, "UPSTREAM_API"),
            (
                UpstreamError::GraphQl { message: "m".into() },
                "GRAPHQL_ERROR",
            ),
            (
                UpstreamError::InvalidRequest("x".into()),
                "INVALID_REQUEST",
            ),
            (UpstreamError::Timeout { timeout_ms: 1000 }, "TIMEOUT"),
            (UpstreamError::Internal(anyhow::anyhow!("x")), "INTERNAL"),
        ];
        for (err, expected_code) in &cases {
            assert_eq!(err.code(), *expected_code, "wrong code for {err}");
        }
    }

    #[test]
    fn retryable_cases() {
        assert!(UpstreamError::Timeout { timeout_ms: 1 }.retryable());
        assert!(UpstreamError::Http {
            status: 503,
            body: String::new()
        }
        .retryable());
        assert!(UpstreamError::Http {
            status: 429,
            body: String::new()
        }
        .retryable());
        assert!(!UpstreamError::Http {
            status: 404,
            body: String::new()
        }
        .retryable());
        assert!(!UpstreamError::EgressDenied { host: "h".into() }.retryable());
        assert!(!UpstreamError::Api { message: "m".into() }.retryable());
    }

    #[test]
    fn internal_is_display_transparent() {
        let err = UpstreamError::Internal(anyhow::anyhow!("root cause"));
        assert_eq!(err.to_string(), "root cause");
    }

    #[test]
    fn structured_error_egress() {
        let err = UpstreamError::EgressDenied {
            host: "attacker.example".into(),
        };
        let json = err.to_structured_error();
        assert_eq!(json["error"], true);
        assert_eq!(json["code"], "EGRESS_DENIED");
        assert_eq!(json["retryable"], false);
        assert!(json["suggested_fix"].as_str().is_some());
    }

    #[test]
    fn structured_error_timeout_has_retry_suggestion() {
        let err = UpstreamError::Timeout { timeout_ms: 5000 };
        let json = err.to_structured_error();
        assert_eq!(json["retryable"], true);
        assert!(json["suggested_fix"].as_str().unwrap().contains("Retry"));
    }

    #[test]
    fn structured_error_internal_no_suggestion() {
        let err = UpstreamError::Internal(anyhow::anyhow!("unexpected"));
        let json = err.to_structured_error();
        assert_eq!(json["code"], "INTERNAL");
        assert!(json.get("suggested_fix").is_none());
    }

    #[test]
    fn send_sync_static() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<UpstreamError>();
    }
}
