//! PKCE (RFC 7636) proof-key pair generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Characters allowed in a PKCE code verifier (RFC 7636 unreserved set).
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// A PKCE code verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// The random verifier kept server-side until the token exchange.
    pub verifier: String,
    /// The base64url-encoded SHA-256 of the verifier, sent on the redirect.
    pub challenge: String,
}

/// Generate a PKCE code verifier and S256 challenge.
///
/// The verifier is a random 43-character string using unreserved URI
/// characters. The challenge is the base64url-encoded (no padding) SHA-256
/// hash of the verifier.
pub fn generate_pkce() -> PkcePair {
    let mut rng = rand::rng();
    let verifier: String = (0..43)
        .map(|_| {
            let idx = rng.random_range(0..VERIFIER_CHARSET.len());
            VERIFIER_CHARSET[idx] as char
        })
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let digest = hasher.finalize();
    let challenge = URL_SAFE_NO_PAD.encode(digest);

    PkcePair {
        verifier,
        challenge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_43_unreserved_chars() {
        let pair = generate_pkce();
        assert_eq!(pair.verifier.len(), 43);
        assert!(pair
            .verifier
            .bytes()
            .all(|b| VERIFIER_CHARSET.contains(&b)));
    }

    #[test]
    fn challenge_is_s256_of_verifier() {
        let pair = generate_pkce();
        let mut hasher = Sha256::new();
        hasher.update(pair.verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn challenge_has_no_padding() {
        let pair = generate_pkce();
        assert!(!pair.challenge.contains('='));
    }

    #[test]
    fn pairs_are_unique() {
        let a = generate_pkce();
        let b = generate_pkce();
        assert_ne!(a.verifier, b.verifier);
    }
}
