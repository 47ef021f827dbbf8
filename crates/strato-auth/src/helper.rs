//! The authorization-helper seam: grant bookkeeping for downstream MCP
//! clients.
//!
//! The gateway never holds a client secret per MCP client, so clients are
//! registered with a no-auth token endpoint method and identified purely by
//! id + redirect URI. Grants bind the approved scopes and the resolved
//! credential bundle; gateway-issued access tokens are structurally
//! `userId:grantId:secret`, which is what the dispatcher's 3-segment sniff
//! keys on.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use serde::Serialize;
use url::Url;

use crate::dispatcher::AuthProps;
use crate::error::OAuthError;
use crate::oauth::AuthorizationRequest;

/// Result of completing an authorization: where to send the browser.
#[derive(Debug, Clone)]
pub struct CompletedAuthorization {
    /// Redirect URI with `code` (and the caller's `state`) appended.
    pub redirect_to: String,
}

/// Token response for the delegated `/token` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GrantTokens {
    /// The gateway-issued access token (`userId:grantId:secret`).
    pub access_token: String,
    /// Always `bearer`.
    pub token_type: String,
    /// Token lifetime in seconds.
    pub expires_in: u64,
    /// Space-joined granted scopes.
    pub scope: String,
}

/// Authorization bookkeeping the OAuth routes delegate to.
#[async_trait::async_trait]
pub trait AuthorizationHelper: Send + Sync {
    /// Idempotently register an OAuth client.
    async fn create_client(&self, client_id: &str, redirect_uri: &str) -> Result<(), OAuthError>;

    /// Record a granted authorization and mint a single-use code.
    async fn complete_authorization(
        &self,
        request: &AuthorizationRequest,
        scopes: &[String],
        props: AuthProps,
    ) -> Result<CompletedAuthorization, OAuthError>;

    /// Exchange a single-use authorization code for a grant token.
    async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
    ) -> Result<GrantTokens, OAuthError>;

    /// Resolve a gateway-issued token back to its credential bundle.
    async fn verify_token(&self, token: &str) -> Option<AuthProps>;
}

/// Default grant token lifetime: one hour.
const GRANT_TOKEN_TTL: u64 = 3600;

struct Grant {
    client_id: String,
    scopes: Vec<String>,
    props: AuthProps,
    secret: String,
}

#[derive(Default)]
struct Inner {
    /// client id → registered redirect URI.
    clients: HashMap<String, String>,
    /// grant id → grant.
    grants: HashMap<String, Grant>,
    /// single-use authorization codes → grant id.
    codes: HashMap<String, String>,
}

/// In-memory [`AuthorizationHelper`].
///
/// Suitable for single-node deployments and tests; a multi-node deployment
/// substitutes a store-backed implementation behind the same trait.
#[derive(Default)]
pub struct InMemoryGrantStore {
    inner: Mutex<Inner>,
}

impl InMemoryGrantStore {
    /// Create an empty grant store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

fn subject_id(props: &AuthProps) -> String {
    match props {
        AuthProps::GlobalApiKey { user, .. } | AuthProps::UserToken { user, .. } => {
            user.id.clone()
        }
        AuthProps::AccountToken { account, .. } => account.id.clone(),
    }
}

#[async_trait::async_trait]
impl AuthorizationHelper for InMemoryGrantStore {
    async fn create_client(&self, client_id: &str, redirect_uri: &str) -> Result<(), OAuthError> {
        if client_id.trim().is_empty() {
            return Err(OAuthError::invalid_client("client_id must not be empty"));
        }
        self.lock()
            .clients
            .insert(client_id.to_string(), redirect_uri.to_string());
        Ok(())
    }

    async fn complete_authorization(
        &self,
        request: &AuthorizationRequest,
        scopes: &[String],
        props: AuthProps,
    ) -> Result<CompletedAuthorization, OAuthError> {
        props
            .validate()
            .map_err(|e| OAuthError::server_error(format!("refusing to store bad props: {e}")))?;

        let grant_id = uuid::Uuid::new_v4().to_string();
        let code = random_urlsafe(32);

        let mut redirect = Url::parse(&request.redirect_uri)
            .map_err(|_| OAuthError::invalid_request("redirect_uri is not a valid URL"))?;
        {
            let mut pairs = redirect.query_pairs_mut();
            pairs.append_pair("code", &code);
            if !request.state.is_empty() {
                pairs.append_pair("state", &request.state);
            }
        }

        let mut inner = self.lock();
        inner.grants.insert(
            grant_id.clone(),
            Grant {
                client_id: request.client_id.clone(),
                scopes: scopes.to_vec(),
                props,
                secret: random_urlsafe(24),
            },
        );
        inner.codes.insert(code, grant_id);

        Ok(CompletedAuthorization {
            redirect_to: redirect.into(),
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
    ) -> Result<GrantTokens, OAuthError> {
        let mut inner = self.lock();

        // Single use: the code is consumed whether or not the rest matches
        let grant_id = inner
            .codes
            .remove(code)
            .ok_or_else(|| OAuthError::invalid_grant("unknown or already-used code"))?;

        let grant = inner
            .grants
            .get(&grant_id)
            .ok_or_else(|| OAuthError::server_error("code points at a missing grant"))?;

        if grant.client_id != client_id {
            return Err(OAuthError::invalid_client(
                "code was issued to a different client",
            ));
        }

        Ok(GrantTokens {
            access_token: format!("{}:{}:{}", subject_id(&grant.props), grant_id, grant.secret),
            token_type: "bearer".into(),
            expires_in: GRANT_TOKEN_TTL,
            scope: grant.scopes.join(" "),
        })
    }

    async fn verify_token(&self, token: &str) -> Option<AuthProps> {
        let mut parts = token.split(':');
        let (_subject, grant_id, secret) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let inner = self.lock();
        let grant = inner.grants.get(grant_id)?;
        if grant.secret != secret {
            return None;
        }
        Some(grant.props.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strato_client::{Account, User};

    fn props() -> AuthProps {
        AuthProps::UserToken {
            access_token: "upstream-token".into(),
            user: User {
                id: "user-1".into(),
                email: "dev@example.com".into(),
            },
            accounts: vec![Account {
                id: "acc-1".into(),
                name: "Primary".into(),
            }],
            refresh_token: Some("refresh".into()),
        }
    }

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: "code".into(),
            client_id: "client-1".into(),
            redirect_uri: "https://app.example/cb".into(),
            scope: vec![],
            state: "caller-state".into(),
        }
    }

    #[tokio::test]
    async fn full_grant_lifecycle() {
        let store = InMemoryGrantStore::new();
        store
            .create_client("client-1", "https://app.example/cb")
            .await
            .unwrap();

        let completed = store
            .complete_authorization(&request(), &["user:read".into()], props())
            .await
            .unwrap();

        // The redirect preserves the caller's state and carries a code
        let url = Url::parse(&completed.redirect_to).unwrap();
        let pairs: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs["state"], "caller-state");
        let code = pairs["code"].clone();

        let tokens = store.exchange_code(&code, "client-1").await.unwrap();
        assert_eq!(tokens.token_type, "bearer");
        assert_eq!(tokens.scope, "user:read");
        // Gateway tokens are userId:grantId:secret
        assert_eq!(tokens.access_token.split(':').count(), 3);
        assert!(tokens.access_token.starts_with("user-1:"));

        let resolved = store.verify_token(&tokens.access_token).await.unwrap();
        assert_eq!(resolved, props());
    }

    #[tokio::test]
    async fn codes_are_single_use() {
        let store = InMemoryGrantStore::new();
        let completed = store
            .complete_authorization(&request(), &[], props())
            .await
            .unwrap();
        let url = Url::parse(&completed.redirect_to).unwrap();
        let code = url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        assert!(store.exchange_code(&code, "client-1").await.is_ok());
        let err = store.exchange_code(&code, "client-1").await.unwrap_err();
        assert_eq!(err.kind.code(), "invalid_grant");
    }

    #[tokio::test]
    async fn code_is_bound_to_the_issuing_client() {
        let store = InMemoryGrantStore::new();
        let completed = store
            .complete_authorization(&request(), &[], props())
            .await
            .unwrap();
        let url = Url::parse(&completed.redirect_to).unwrap();
        let code = url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let err = store.exchange_code(&code, "other-client").await.unwrap_err();
        assert_eq!(err.kind.code(), "invalid_client");
    }

    #[tokio::test]
    async fn bad_tokens_do_not_verify() {
        let store = InMemoryGrantStore::new();
        assert!(store.verify_token("no-colons-here").await.is_none());
        assert!(store.verify_token("a:b:c").await.is_none());
        assert!(store.verify_token("a:b:c:d").await.is_none());

        // Right grant id, wrong secret
        let completed = store
            .complete_authorization(&request(), &[], props())
            .await
            .unwrap();
        let url = Url::parse(&completed.redirect_to).unwrap();
        let code = url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let tokens = store.exchange_code(&code, "client-1").await.unwrap();
        let mut parts: Vec<&str> = tokens.access_token.split(':').collect();
        parts[2] = "forged-secret";
        assert!(store.verify_token(&parts.join(":")).await.is_none());
    }

    #[tokio::test]
    async fn create_client_is_idempotent() {
        let store = InMemoryGrantStore::new();
        store.create_client("c", "https://a.example").await.unwrap();
        store.create_client("c", "https://a.example").await.unwrap();
        assert!(store.create_client(" ", "https://a.example").await.is_err());
    }
}
