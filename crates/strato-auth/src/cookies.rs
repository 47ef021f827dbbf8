//! Signed and binding cookies for the consent flow.
//!
//! Three cookies, all `HttpOnly; Secure; SameSite=Lax`, host-locked names:
//!
//! - **approved clients** (1 year): HMAC-SHA256 signed, base64-encoded list
//!   of previously-approved OAuth client ids, `signatureHex.base64Payload`.
//!   Any tampering invalidates the signature and the record is treated as
//!   absent (fail closed).
//! - **session binding** (10 min): SHA-256 hash of the pending-state token —
//!   never the raw token — binding the in-flight authorization to this
//!   browser.
//! - **CSRF token** (10 min): random value double-submitted via a hidden
//!   form field.

use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Cookie holding the signed approved-clients record.
pub const APPROVED_CLIENTS_COOKIE: &str = "strato_approved_clients";

/// Cookie binding the browser to an in-flight authorization (holds a hash).
pub const SESSION_BINDING_COOKIE: &str = "strato_oauth_session";

/// Cookie carrying the CSRF token for the consent form.
pub const CSRF_COOKIE: &str = "strato_csrf";

/// TTL of the approved-clients cookie: one year.
pub const APPROVED_CLIENTS_MAX_AGE: u64 = 365 * 24 * 60 * 60;

/// TTL of the session-binding and CSRF cookies: ten minutes.
pub const SHORT_COOKIE_MAX_AGE: u64 = 600;

/// Sign an approved-clients list into `signatureHex.base64Payload` form.
pub fn sign_approved_clients(secret: &[u8], clients: &[String]) -> String {
    let payload = serde_json::to_string(clients).unwrap_or_else(|_| "[]".into());
    let payload_b64 = BASE64_STD.encode(payload.as_bytes());
    let signature = hmac_hex(secret, payload_b64.as_bytes());
    format!("{signature}.{payload_b64}")
}

/// Verify a signed approved-clients cookie value.
///
/// Returns `None` on any structural or signature defect — a tampered cookie
/// is indistinguishable from an absent one.
pub fn verify_approved_clients(secret: &[u8], cookie_value: &str) -> Option<Vec<String>> {
    let (signature_hex, payload_b64) = cookie_value.split_once('.')?;

    let signature = decode_hex(signature_hex)?;
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&signature).ok()?;

    let payload = BASE64_STD.decode(payload_b64).ok()?;
    serde_json::from_slice(&payload).ok()
}

/// Union a client id into an approved-clients list (idempotent).
pub fn add_approved_client(mut clients: Vec<String>, client_id: &str) -> Vec<String> {
    if !clients.iter().any(|c| c == client_id) {
        clients.push(client_id.to_string());
    }
    clients
}

/// SHA-256 hex of a state token, stored in the session-binding cookie.
pub fn hash_state_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Mint a random CSRF token (32 bytes, hex).
pub fn mint_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Compare the form-submitted CSRF token with the cookie value.
///
/// Both values are server-issued high-entropy randoms carried over TLS, so
/// plain byte equality is sufficient here.
pub fn csrf_matches(form_value: &str, cookie_value: &str) -> bool {
    !form_value.is_empty() && form_value == cookie_value
}

/// Build a `Set-Cookie` header value with the gateway's standard attributes.
pub fn set_cookie(name: &str, value: &str, max_age: u64) -> String {
    format!("{name}={value}; Max-Age={max_age}; Path=/; HttpOnly; Secure; SameSite=Lax")
}

/// Build a `Set-Cookie` header value that clears a cookie.
pub fn clear_cookie(name: &str) -> String {
    format!("{name}=; Max-Age=0; Path=/; HttpOnly; Secure; SameSite=Lax")
}

/// Extract a named cookie from a `Cookie` request header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then_some(v)
    })
}

fn hmac_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(message);
    hex_encode(&mac.finalize().into_bytes())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn sign_verify_roundtrip() {
        let clients = vec!["client-a".to_string(), "client-b".to_string()];
        let cookie = sign_approved_clients(SECRET, &clients);
        assert_eq!(verify_approved_clients(SECRET, &cookie), Some(clients));
    }

    #[test]
    fn cookie_value_has_signature_and_payload() {
        let cookie = sign_approved_clients(SECRET, &["c".to_string()]);
        let (sig, payload) = cookie.split_once('.').unwrap();
        assert_eq!(sig.len(), 64, "hex SHA-256 HMAC");
        assert!(BASE64_STD.decode(payload).is_ok());
    }

    #[test]
    fn tampered_payload_fails_closed() {
        let cookie = sign_approved_clients(SECRET, &["client-a".to_string()]);
        let (sig, _) = cookie.split_once('.').unwrap();
        let forged_payload = BASE64_STD.encode(b"[\"client-a\",\"attacker\"]");
        let forged = format!("{sig}.{forged_payload}");
        assert_eq!(verify_approved_clients(SECRET, &forged), None);
    }

    #[test]
    fn tampered_signature_fails_closed() {
        let cookie = sign_approved_clients(SECRET, &["client-a".to_string()]);
        let mut chars: Vec<char> = cookie.chars().collect();
        chars[0] = if chars[0] == 'a' { 'b' } else { 'a' };
        let forged: String = chars.into_iter().collect();
        assert_eq!(verify_approved_clients(SECRET, &forged), None);
    }

    #[test]
    fn wrong_secret_fails_closed() {
        let cookie = sign_approved_clients(SECRET, &["client-a".to_string()]);
        assert_eq!(
            verify_approved_clients(b"another-secret-another-secret-xx", &cookie),
            None
        );
    }

    #[test]
    fn structurally_invalid_cookies_fail_closed() {
        assert_eq!(verify_approved_clients(SECRET, ""), None);
        assert_eq!(verify_approved_clients(SECRET, "no-dot-here"), None);
        assert_eq!(verify_approved_clients(SECRET, "nothex.cGF5bG9hZA=="), None);
    }

    #[test]
    fn add_approved_client_is_idempotent_union() {
        let clients = add_approved_client(vec!["a".to_string()], "b");
        assert_eq!(clients, vec!["a", "b"]);
        let clients = add_approved_client(clients, "b");
        assert_eq!(clients, vec!["a", "b"]);
    }

    #[test]
    fn state_token_hash_is_sha256_hex() {
        let hash = hash_state_token("token-value");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_state_token("other-token"));
    }

    #[test]
    fn csrf_tokens_are_random_and_match_only_themselves() {
        let a = mint_csrf_token();
        let b = mint_csrf_token();
        assert_ne!(a, b);
        assert!(csrf_matches(&a, &a));
        assert!(!csrf_matches(&a, &b));
        assert!(!csrf_matches("", ""));
    }

    #[test]
    fn set_cookie_carries_standard_attributes() {
        let header = set_cookie(CSRF_COOKIE, "v", SHORT_COOKIE_MAX_AGE);
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Secure"));
        assert!(header.contains("SameSite=Lax"));
        assert!(header.contains("Max-Age=600"));
    }

    #[test]
    fn cookie_value_parses_headers() {
        let header = "a=1; strato_csrf=tok; b=2";
        assert_eq!(cookie_value(header, "strato_csrf"), Some("tok"));
        assert_eq!(cookie_value(header, "missing"), None);
    }
}
