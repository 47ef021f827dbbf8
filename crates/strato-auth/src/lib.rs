#![warn(missing_docs)]

//! # strato-auth
//!
//! Authentication dispatch and the OAuth consent flow for the Strato
//! gateway — the trust boundary in front of the sandbox.
//!
//! Two ways in, resolved to one [`AuthProps`] credential bundle per request:
//!
//! - **Direct credentials**: a legacy global key pair or a plain upstream
//!   API token, verified by live identity lookups.
//! - **Three-legged OAuth**: PKCE (S256) against the upstream provider, a
//!   consent screen with scope templates and a per-scope advanced panel,
//!   CSRF double-submit, a signed approved-clients cookie, and single-use
//!   server-side authorization state double-bound to the browser via a
//!   hashed session cookie.
//!
//! Every trust boundary re-validates deserialized shapes: incoming cookies,
//! stored state blobs, and refresh-callback props are never trusted on
//! structure alone.

pub mod consent;
pub mod cookies;
pub mod dispatcher;
pub mod error;
pub mod helper;
pub mod oauth;
pub mod pkce;
pub mod state;

pub use dispatcher::{
    auth_props_from_identity, is_direct_api_token, AuthDispatcher, AuthProps, RequestCredentials,
};
pub use error::{AuthError, OAuthError, OAuthErrorKind};
pub use helper::{AuthorizationHelper, CompletedAuthorization, GrantTokens, InMemoryGrantStore};
pub use state::{MemoryStateStore, PendingAuthorization, StateStore};
