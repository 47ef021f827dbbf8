//! Outbound HTTP egress policy for the gateway.
//!
//! The sandbox's only network capability is the `request()` shim; every URL
//! it produces is checked here before any connection is made. Anything not
//! on the allow-list is rejected with an egress error (surfaced as 403).
//! This is the hard network-isolation boundary — without it, agent-authored
//! code could exfiltrate data to attacker-controlled hosts.

use std::collections::HashSet;

use strato_error::UpstreamError;
use url::Url;

/// Hostname allow-list for outbound requests.
///
/// Comparison is case-insensitive on the exact hostname; no wildcard or
/// subdomain matching. The policy is built once at startup and read-only
/// afterwards.
#[derive(Debug, Clone)]
pub struct EgressPolicy {
    allowed: HashSet<String>,
}

impl EgressPolicy {
    /// Build a policy from the upstream API host plus extra allow-listed hosts.
    pub fn new(upstream_host: &str, extra_hosts: &[String]) -> Self {
        let mut allowed: HashSet<String> = extra_hosts
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        if !upstream_host.is_empty() {
            allowed.insert(upstream_host.to_ascii_lowercase());
        }
        Self { allowed }
    }

    /// Validate a URL against the policy.
    pub fn check(&self, url: &Url) -> Result<(), UpstreamError> {
        let host = url
            .host_str()
            .ok_or_else(|| UpstreamError::InvalidRequest("URL has no host".into()))?
            .to_ascii_lowercase();
        if self.allowed.contains(&host) {
            Ok(())
        } else {
            Err(UpstreamError::EgressDenied { host })
        }
    }

    /// Number of allow-listed hosts.
    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    /// Whether the allow-list is empty (denies everything).
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}
