//! Prometheus metrics for the Strato sandbox.
//!
//! This module is only compiled when the `metrics` feature is enabled.
//! Provides counters and histograms for sandbox execution observability.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// Label set for execution metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ExecutionLabels {
    /// The operation type: "search" or "execute".
    pub operation: String,
}

/// Label set for error metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// The error kind: "timeout", "heap_limit", "js_error", ...
    pub error_kind: String,
}

/// Prometheus metrics for the Strato sandbox.
pub struct SandboxMetrics {
    /// Total number of executions.
    pub executions_total: Family<ExecutionLabels, Counter>,
    /// Execution duration in seconds.
    pub execution_duration_seconds: Family<ExecutionLabels, Histogram>,
    /// Total number of errors by kind.
    pub errors_total: Family<ErrorLabels, Counter>,
    /// Total upstream requests dispatched from sandbox code.
    pub upstream_requests_total: Counter,
}

impl SandboxMetrics {
    /// Create a new `SandboxMetrics` and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let executions_total = Family::default();
        registry.register(
            "strato_executions_total",
            "Total sandbox executions",
            executions_total.clone(),
        );

        let execution_duration_seconds =
            Family::<ExecutionLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(
                    [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0].into_iter(),
                )
            });
        registry.register(
            "strato_execution_duration_seconds",
            "Sandbox execution duration",
            execution_duration_seconds.clone(),
        );

        let errors_total = Family::default();
        registry.register(
            "strato_errors_total",
            "Total sandbox errors by kind",
            errors_total.clone(),
        );

        let upstream_requests_total = Counter::default();
        registry.register(
            "strato_upstream_requests_total",
            "Total upstream API requests from sandbox code",
            upstream_requests_total.clone(),
        );

        Self {
            executions_total,
            execution_duration_seconds,
            errors_total,
            upstream_requests_total,
        }
    }

    /// Record one completed execution.
    pub fn observe_execution(&self, operation: &str, duration_secs: f64) {
        let labels = ExecutionLabels {
            operation: operation.to_string(),
        };
        self.executions_total.get_or_create(&labels).inc();
        self.execution_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record one execution error.
    pub fn observe_error(&self, error_kind: &str) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                error_kind: error_kind.to_string(),
            })
            .inc();
    }
}
