//! The authentication dispatcher: classify every inbound request into
//! exactly one credential bundle.
//!
//! Checked in order, first match wins:
//!
//! 1. **Global API key** — both `X-Auth-Email` and `X-Auth-Key` present,
//!    verified by live upstream identity lookups.
//! 2. **Direct API token** — `Authorization: Bearer` whose token does *not*
//!    look gateway-issued. Gateway tokens are exactly 3 colon-separated
//!    segments (`userId:grantId:secret`); any other colon count is a direct
//!    token. A structural sniff, not a cryptographic check — it only routes
//!    between the two auth subsystems before either validates the token.
//! 3. **OAuth-delegated** — everything else goes through the authorization
//!    helper's grant verification.

use serde::{Deserialize, Serialize};

use strato_client::{Account, Credential, EgressPolicy, UpstreamApiClient, User};
use strato_config::UpstreamConfig;

use crate::error::AuthError;
use crate::helper::AuthorizationHelper;

/// Resolved credential bundle — exactly one variant per authenticated
/// request.
///
/// The token/key fields are consumed by dispatcher construction and must
/// never be logged or echoed back to the caller afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthProps {
    /// Legacy email + global key pair, verified upstream.
    GlobalApiKey {
        /// Account email.
        email: String,
        /// The global API key.
        api_key: String,
        /// The verified user identity.
        user: User,
        /// Accounts visible to the key.
        accounts: Vec<Account>,
    },
    /// A token scoped to exactly one account, fixed at issuance.
    AccountToken {
        /// The access token.
        access_token: String,
        /// The single account this token can reach.
        account: Account,
    },
    /// A token scoped to a human identity with 0..N accessible accounts.
    UserToken {
        /// The access token.
        access_token: String,
        /// The user identity.
        user: User,
        /// Accounts visible to the user.
        accounts: Vec<Account>,
        /// Refresh token for silent renewal, when granted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
    },
}

impl AuthProps {
    /// The credential to attach to upstream API calls.
    pub fn credential(&self) -> Credential {
        match self {
            Self::GlobalApiKey { email, api_key, .. } => Credential::GlobalKey {
                email: email.clone(),
                key: api_key.clone(),
            },
            Self::AccountToken { access_token, .. } | Self::UserToken { access_token, .. } => {
                Credential::Bearer(access_token.clone())
            }
        }
    }

    /// Accounts reachable with this bundle.
    pub fn accounts(&self) -> &[Account] {
        match self {
            Self::GlobalApiKey { accounts, .. } | Self::UserToken { accounts, .. } => accounts,
            Self::AccountToken { account, .. } => std::slice::from_ref(account),
        }
    }

    /// Resolve the account id an `execute` call should target.
    ///
    /// Account-scoped tokens are fixed at issuance; otherwise a single
    /// accessible account is auto-filled, an explicit request is checked
    /// against the accessible set, and multiple accounts without a request
    /// is the caller's ambiguity to resolve.
    pub fn resolve_account(&self, requested: Option<&str>) -> Result<String, AuthError> {
        if let Self::AccountToken { account, .. } = self {
            return Ok(account.id.clone());
        }
        let accounts = self.accounts();
        match requested {
            Some(id) => accounts
                .iter()
                .find(|a| a.id == id)
                .map(|a| a.id.clone())
                .ok_or_else(|| AuthError::AccountNotAccessible(id.to_string())),
            None => match accounts {
                [only] => Ok(only.id.clone()),
                [] => Err(AuthError::AccountNotAccessible("(none)".into())),
                _ => Err(AuthError::AmbiguousAccount),
            },
        }
    }

    /// Re-validate the bundle's shape after deserialization.
    ///
    /// Stored props (KV blobs, refresh-callback payloads) are never trusted
    /// without this check.
    pub fn validate(&self) -> Result<(), AuthError> {
        let token_ok = match self {
            Self::GlobalApiKey { email, api_key, user, .. } => {
                !email.is_empty() && !api_key.is_empty() && !user.id.is_empty()
            }
            Self::AccountToken { access_token, account } => {
                !access_token.is_empty() && !account.id.is_empty()
            }
            Self::UserToken { access_token, user, .. } => {
                !access_token.is_empty() && !user.id.is_empty()
            }
        };
        if token_ok {
            Ok(())
        } else {
            Err(AuthError::InvalidToken(
                "credential bundle failed shape validation".into(),
            ))
        }
    }
}

/// Whether a bearer token is a direct upstream API token (as opposed to a
/// gateway-issued OAuth grant token).
///
/// Gateway tokens are structurally `userId:grantId:secret` — exactly 3
/// colon-separated segments. Everything else is treated as a direct token.
pub fn is_direct_api_token(token: &str) -> bool {
    token.split(':').count() != 3
}

/// Build a credential bundle from resolved identity parts.
///
/// - a user identity always wins: `UserToken` with the given accounts;
/// - no user but at least one account: `AccountToken` on the first account;
/// - neither: the token is unusable.
pub fn auth_props_from_identity(
    access_token: &str,
    user: Option<User>,
    accounts: Vec<Account>,
    refresh_token: Option<String>,
) -> Result<AuthProps, AuthError> {
    match user {
        Some(user) => Ok(AuthProps::UserToken {
            access_token: access_token.to_string(),
            user,
            accounts,
            refresh_token,
        }),
        None => match accounts.into_iter().next() {
            Some(account) => Ok(AuthProps::AccountToken {
                access_token: access_token.to_string(),
                account,
            }),
            None => Err(AuthError::InvalidToken(
                "token resolves to neither a user nor any account".into(),
            )),
        },
    }
}

/// Credentials extracted from the inbound HTTP request.
#[derive(Debug, Clone, Default)]
pub struct RequestCredentials {
    /// `X-Auth-Email` header.
    pub email: Option<String>,
    /// `X-Auth-Key` header.
    pub api_key: Option<String>,
    /// `Authorization: Bearer` token.
    pub bearer: Option<String>,
    /// `X-Account-Id` header — disambiguates account-scoped tokens that can
    /// reach more than one account.
    pub account_id: Option<String>,
}

/// Stateless per-request resolver from headers to [`AuthProps`].
pub struct AuthDispatcher {
    upstream: UpstreamConfig,
    egress: EgressPolicy,
    helper: std::sync::Arc<dyn AuthorizationHelper>,
}

impl AuthDispatcher {
    /// Create a dispatcher bound to the upstream config and helper.
    pub fn new(
        upstream: UpstreamConfig,
        egress: EgressPolicy,
        helper: std::sync::Arc<dyn AuthorizationHelper>,
    ) -> Self {
        Self {
            upstream,
            egress,
            helper,
        }
    }

    /// Classify and resolve one request's credentials.
    pub async fn resolve(&self, creds: &RequestCredentials) -> Result<AuthProps, AuthError> {
        // 1. Global API key
        if let (Some(email), Some(api_key)) = (&creds.email, &creds.api_key) {
            return self.resolve_global_key(email, api_key).await;
        }

        let Some(bearer) = creds.bearer.as_deref().map(str::trim).filter(|t| !t.is_empty())
        else {
            return Err(AuthError::MissingCredentials);
        };

        // 2. Direct API token
        if is_direct_api_token(bearer) {
            return self
                .resolve_direct_token(bearer, creds.account_id.as_deref())
                .await;
        }

        // 3. OAuth-delegated (gateway-issued grant token)
        match self.helper.verify_token(bearer).await {
            Some(props) => {
                props.validate()?;
                Ok(props)
            }
            None => Err(AuthError::InvalidToken("unknown or revoked grant".into())),
        }
    }

    async fn resolve_global_key(&self, email: &str, api_key: &str) -> Result<AuthProps, AuthError> {
        let client = self.client(Credential::GlobalKey {
            email: email.to_string(),
            key: api_key.to_string(),
        })?;
        let (user, accounts) = client.identity().await;

        let user = user
            .map_err(|e| AuthError::Upstream(e.to_string()))?
            .ok_or_else(|| AuthError::InvalidToken("global key verification failed".into()))?;
        let accounts = accounts.map_err(|e| AuthError::Upstream(e.to_string()))?;

        Ok(AuthProps::GlobalApiKey {
            email: email.to_string(),
            api_key: api_key.to_string(),
            user,
            accounts,
        })
    }

    async fn resolve_direct_token(
        &self,
        token: &str,
        requested_account: Option<&str>,
    ) -> Result<AuthProps, AuthError> {
        let client = self.client(Credential::Bearer(token.to_string()))?;

        // Both lookups run concurrently; neither short-circuits the other,
        // so a user-endpoint outage can still yield an account-scoped bundle.
        let (user, accounts) = client.identity().await;
        let user = user.unwrap_or(None);
        let mut accounts = accounts.unwrap_or_default();

        if user.is_none() && accounts.is_empty() {
            return Err(AuthError::InvalidToken(
                "token resolves to neither a user nor any account".into(),
            ));
        }

        // An account-scoped token reaching several accounts needs the caller
        // to pick one; a single account is auto-filled.
        if user.is_none() && accounts.len() > 1 {
            match requested_account {
                Some(id) => {
                    let Some(position) = accounts.iter().position(|a| a.id == id) else {
                        return Err(AuthError::AccountNotAccessible(id.to_string()));
                    };
                    accounts = vec![accounts.swap_remove(position)];
                }
                None => return Err(AuthError::AmbiguousAccount),
            }
        }

        auth_props_from_identity(token, user, accounts, None)
    }

    fn client(&self, credential: Credential) -> Result<UpstreamApiClient, AuthError> {
        UpstreamApiClient::new(
            &self.upstream.api_base_url,
            &self.upstream.graphql_path,
            credential,
            self.egress.clone(),
        )
        .map_err(|e| AuthError::Upstream(e.to_string()))
    }
}
