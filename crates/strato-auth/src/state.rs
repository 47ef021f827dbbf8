//! Short-lived server-side state for in-flight authorization attempts.
//!
//! Each attempt is keyed by a random 128-bit token and binds the parsed
//! authorization request to its PKCE code verifier. Entries live for ten
//! minutes and are deleted on first read — a state token never authorizes
//! two callbacks. The browser is double-bound via a session cookie holding
//! the SHA-256 hash of the token (see [`crate::cookies`]).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::oauth::AuthorizationRequest;

/// TTL of a pending authorization: 600 seconds.
pub const PENDING_STATE_TTL: Duration = Duration::from_secs(600);

/// A pending authorization awaiting the upstream callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    /// The parsed authorization request, including the caller's own `state`.
    pub oauth_req_info: AuthorizationRequest,
    /// The PKCE code verifier for the upcoming token exchange.
    pub code_verifier: String,
}

/// Mint a random 128-bit state token (hex).
pub fn new_state_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Storage for pending authorizations.
///
/// Single-writer-single-reader per key: `take` removes the entry, so no
/// locking discipline beyond the store's own mutex is needed.
pub trait StateStore: Send + Sync {
    /// Persist a pending authorization under a state token.
    fn put(&self, token: &str, pending: PendingAuthorization);

    /// Fetch and delete a pending authorization (single use).
    ///
    /// Expired entries are simply absent.
    fn take(&self, token: &str) -> Option<PendingAuthorization>;
}

/// In-memory state store with TTL enforcement on read.
pub struct MemoryStateStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, PendingAuthorization)>>,
}

impl MemoryStateStore {
    /// Create a store with the standard TTL.
    pub fn new() -> Self {
        Self::with_ttl(PENDING_STATE_TTL)
    }

    /// Create a store with a custom TTL (tests).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn put(&self, token: &str, pending: PendingAuthorization) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Opportunistic sweep keeps abandoned attempts from accumulating
        let ttl = self.ttl;
        entries.retain(|_, (stored, _)| stored.elapsed() < ttl);
        entries.insert(token.to_string(), (Instant::now(), pending));
    }

    fn take(&self, token: &str) -> Option<PendingAuthorization> {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (stored, pending) = entries.remove(token)?;
        if stored.elapsed() >= self.ttl {
            return None;
        }
        Some(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingAuthorization {
        PendingAuthorization {
            oauth_req_info: AuthorizationRequest {
                response_type: "code".into(),
                client_id: "client-1".into(),
                redirect_uri: "https://app.example/callback".into(),
                scope: vec!["user:read".into()],
                state: "caller-opaque-state".into(),
            },
            code_verifier: "verifier".into(),
        }
    }

    #[test]
    fn state_tokens_are_128_bit_hex_and_unique() {
        let a = new_state_token();
        let b = new_state_token();
        assert_eq!(a.len(), 32);
        assert!(a.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn take_is_single_use() {
        let store = MemoryStateStore::new();
        store.put("token", pending());

        assert!(store.take("token").is_some());
        assert!(store.take("token").is_none(), "second read must find nothing");
    }

    #[test]
    fn unknown_token_is_absent() {
        let store = MemoryStateStore::new();
        assert!(store.take("never-stored").is_none());
    }

    #[test]
    fn expired_entries_vanish() {
        let store = MemoryStateStore::with_ttl(Duration::from_millis(0));
        store.put("token", pending());
        assert!(store.take("token").is_none());
    }

    #[test]
    fn entries_preserve_the_callers_state() {
        let store = MemoryStateStore::new();
        store.put("token", pending());
        let restored = store.take("token").unwrap();
        assert_eq!(restored.oauth_req_info.state, "caller-opaque-state");
        assert_eq!(restored.code_verifier, "verifier");
    }
}
