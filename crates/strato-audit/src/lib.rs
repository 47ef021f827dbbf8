//! Audit event types for Strato gateway observability.
//!
//! Provides [`AuditEvent`] — a structured, serializable audit record for
//! gateway operations, and [`SecurityRejection`] — the subset of events that
//! indicate a possible attack rather than an ordinary validation failure.
//! Security rejections always fail closed at the call site; this module only
//! records them.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A structured audit event emitted by the Strato gateway.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct AuditEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The type of event.
    pub event_type: String,
    /// Human-readable description.
    pub description: String,
    /// Whether this event is a security-relevant rejection.
    pub security: bool,
}

impl AuditEvent {
    /// Create a new audit event with the current timestamp.
    pub fn new(event_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.into(),
            description: description.into(),
            security: false,
        }
    }

    /// Create a security-rejection audit event and log it as a warning.
    ///
    /// These are logged under a dedicated target so potential attacks can be
    /// filtered apart from ordinary validation noise.
    pub fn security_rejection(kind: SecurityRejection, description: impl Into<String>) -> Self {
        let description = description.into();
        tracing::warn!(
            target: "strato::security",
            kind = kind.as_str(),
            "{description}"
        );
        Self {
            timestamp: Utc::now(),
            event_type: kind.as_str().to_string(),
            description,
            security: true,
        }
    }
}

/// Classification of security-relevant rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SecurityRejection {
    /// The consent form's CSRF token did not match the CSRF cookie.
    CsrfMismatch,
    /// The callback session cookie hash did not match the state token.
    StateBindingMismatch,
    /// A signed cookie failed signature verification.
    CookieTampered,
    /// An authorization state token was absent, expired, or already used.
    StateUnknown,
}

impl SecurityRejection {
    /// Stable string form used in logs and serialized events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CsrfMismatch => "csrf_mismatch",
            Self::StateBindingMismatch => "state_binding_mismatch",
            Self::CookieTampered => "cookie_tampered",
            Self::StateUnknown => "state_unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_json_without_panic() {
        let event = AuditEvent::new("consent_granted", "client abc approved 3 scopes");
        let json = serde_json::to_string(&event).expect("should serialize");
        assert!(json.contains("consent_granted"));
        assert!(json.contains("timestamp"));
        assert!(json.contains("\"security\":false"));
    }

    #[test]
    fn security_rejection_is_flagged() {
        let event = AuditEvent::security_rejection(
            SecurityRejection::CsrfMismatch,
            "form token did not match cookie",
        );
        assert!(event.security);
        assert_eq!(event.event_type, "csrf_mismatch");
    }

    #[test]
    fn rejection_kinds_have_stable_names() {
        assert_eq!(SecurityRejection::CookieTampered.as_str(), "cookie_tampered");
        assert_eq!(SecurityRejection::StateUnknown.as_str(), "state_unknown");
        assert_eq!(
            SecurityRejection::StateBindingMismatch.as_str(),
            "state_binding_mismatch"
        );
    }
}
