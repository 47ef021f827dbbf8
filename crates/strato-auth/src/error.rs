//! Error taxonomy for the authentication and consent surfaces.
//!
//! Two audiences, two renderings: API paths get machine-readable JSON,
//! browser paths get a themed HTML page. Server-side faults (corrupted
//! state, storage failures) render as a generic `server_error` without
//! internal detail; caller faults carry their description.

use thiserror::Error;

/// Errors from the authentication dispatcher (HTTP boundary).
#[derive(Debug, Error)]
pub enum AuthError {
    /// No usable credentials on the request.
    #[error("missing credentials: supply a Bearer token or X-Auth-Email/X-Auth-Key")]
    MissingCredentials,

    /// The supplied credential failed upstream verification.
    #[error("invalid credentials: {0}")]
    InvalidToken(String),

    /// An account-scoped token can reach more than one account and the
    /// caller did not disambiguate.
    #[error("ambiguous account: this token can access multiple accounts, supply account_id")]
    AmbiguousAccount,

    /// The requested account id is not accessible to this credential.
    #[error("account '{0}' is not accessible with these credentials")]
    AccountNotAccessible(String),

    /// The upstream identity service failed in a non-auth way.
    #[error("upstream identity lookup failed: {0}")]
    Upstream(String),
}

impl AuthError {
    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingCredentials | Self::InvalidToken(_) => 401,
            Self::AmbiguousAccount | Self::AccountNotAccessible(_) => 400,
            Self::Upstream(_) => 502,
        }
    }

    /// JSON body for API responses.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

/// Machine-readable OAuth error codes (RFC 6749 §4.1.2.1 vocabulary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthErrorKind {
    /// The request is malformed or missing required parameters.
    InvalidRequest,
    /// The resource owner denied the request.
    AccessDenied,
    /// The client is unknown or unauthorized.
    InvalidClient,
    /// The authorization code or refresh token is invalid or expired.
    InvalidGrant,
    /// Internal failure: storage corruption, schema violations, upstream
    /// identity loss. Never the caller's fault.
    ServerError,
}

impl OAuthErrorKind {
    /// Wire-format error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::AccessDenied => "access_denied",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::ServerError => "server_error",
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::AccessDenied => 403,
            Self::InvalidClient | Self::InvalidGrant => 401,
            Self::ServerError => 500,
        }
    }
}

/// A structured OAuth error: machine-readable code + human description.
#[derive(Debug, Error)]
#[error("{}: {description}", kind.code())]
pub struct OAuthError {
    /// The error classification.
    pub kind: OAuthErrorKind,
    /// Human-readable description. For `server_error` this is logged but
    /// not rendered to browsers.
    pub description: String,
}

impl OAuthError {
    /// Construct an `invalid_request` error.
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self {
            kind: OAuthErrorKind::InvalidRequest,
            description: description.into(),
        }
    }

    /// Construct an `access_denied` error.
    pub fn access_denied(description: impl Into<String>) -> Self {
        Self {
            kind: OAuthErrorKind::AccessDenied,
            description: description.into(),
        }
    }

    /// Construct an `invalid_client` error.
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self {
            kind: OAuthErrorKind::InvalidClient,
            description: description.into(),
        }
    }

    /// Construct an `invalid_grant` error.
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self {
            kind: OAuthErrorKind::InvalidGrant,
            description: description.into(),
        }
    }

    /// Construct a `server_error`. The description is for logs; browsers
    /// see only the generic code.
    pub fn server_error(description: impl Into<String>) -> Self {
        Self {
            kind: OAuthErrorKind::ServerError,
            description: description.into(),
        }
    }

    /// JSON body for API responses.
    ///
    /// Internal detail is withheld for `server_error`.
    pub fn to_json(&self) -> serde_json::Value {
        let description = match self.kind {
            OAuthErrorKind::ServerError => "internal server error".to_string(),
            _ => self.description.clone(),
        };
        serde_json::json!({
            "error": self.kind.code(),
            "error_description": description,
        })
    }

    /// The description safe to show in a browser.
    pub fn public_description(&self) -> &str {
        match self.kind {
            OAuthErrorKind::ServerError => "Something went wrong on our side. Please retry.",
            _ => &self.description,
        }
    }
}
