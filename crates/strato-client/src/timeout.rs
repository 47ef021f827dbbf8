//! Per-call timeout wrapper for the upstream API dispatcher.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use strato_error::UpstreamError;

use crate::{ApiDispatcher, ApiRequest};

/// An [`ApiDispatcher`] that enforces a per-call timeout on the inner dispatcher.
pub struct TimeoutDispatcher {
    inner: Arc<dyn ApiDispatcher>,
    timeout: Duration,
}

impl TimeoutDispatcher {
    /// Wrap an inner dispatcher with a per-call timeout.
    pub fn new(inner: Arc<dyn ApiDispatcher>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait::async_trait]
impl ApiDispatcher for TimeoutDispatcher {
    async fn request(&self, req: ApiRequest) -> Result<Value, UpstreamError> {
        match tokio::time::timeout(self.timeout, self.inner.request(req)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(UpstreamError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowDispatcher;

    #[async_trait::async_trait]
    impl ApiDispatcher for SlowDispatcher {
        async fn request(&self, _req: ApiRequest) -> Result<Value, UpstreamError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        }
    }

    struct FastDispatcher;

    #[async_trait::async_trait]
    impl ApiDispatcher for FastDispatcher {
        async fn request(&self, _req: ApiRequest) -> Result<Value, UpstreamError> {
            Ok(serde_json::json!({ "success": true }))
        }
    }

    fn request() -> ApiRequest {
        ApiRequest {
            method: "GET".into(),
            path: "/zones".into(),
            query: None,
            body: None,
            content_type: None,
            raw_body: None,
        }
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let dispatcher = TimeoutDispatcher::new(Arc::new(SlowDispatcher), Duration::from_millis(50));
        let err = dispatcher.request(request()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let dispatcher = TimeoutDispatcher::new(Arc::new(FastDispatcher), Duration::from_secs(5));
        let envelope = dispatcher.request(request()).await.unwrap();
        assert_eq!(envelope["success"], true);
    }
}
