#![warn(missing_docs)]

//! # strato-scopes
//!
//! Static catalog of upstream permission scopes, consent templates, and the
//! scope-count cap enforced against the upstream authorization server.
//!
//! Pure data plus validators. The invariant that every scope referenced by a
//! template exists in the catalog is enforced by tests, not at runtime.

use serde::Serialize;

/// Hard cap on the number of scopes a single authorization request may carry.
///
/// The upstream authorization server rejects requests above this count (the
/// authorization URL grows past its limit). The consent UI disables further
/// checkboxes at the cap, but the authoritative enforcement is server-side
/// truncation of the submitted list before building the upstream redirect.
pub const MAX_SCOPES: usize = 40;

/// Suffixes that classify a scope as write-oriented.
///
/// The read-only template must not contain any scope ending in one of these.
pub const WRITE_SUFFIXES: &[&str] = &[
    ":write",
    ":edit",
    ":admin",
    ":pii",
    ":run",
    ":setup",
    ":bind",
    ":secure_location",
];

/// A single permission scope definition.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScopeDef {
    /// Scope name as sent to the upstream authorization server.
    pub name: &'static str,
    /// Human description shown on the consent screen.
    pub description: &'static str,
    /// Category used to group scopes in the advanced consent panel.
    pub category: &'static str,
}

/// A named bundle of scopes offered as a consent preset.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScopeTemplate {
    /// Template identifier submitted by the consent form.
    pub name: &'static str,
    /// Human description shown next to the radio button.
    pub description: &'static str,
    /// Scope names in this template.
    pub scopes: &'static [&'static str],
    /// Whether this template is preselected. Exactly one template is.
    pub default: bool,
}

/// The full scope catalog.
pub const CATALOG: &[ScopeDef] = &[
    // Account
    ScopeDef { name: "offline_access", description: "Stay signed in (issue refresh tokens)", category: "Account" },
    ScopeDef { name: "user:read", description: "Read your user profile", category: "Account" },
    ScopeDef { name: "account:read", description: "Read account details and memberships", category: "Account" },
    ScopeDef { name: "billing:read", description: "Read billing profiles and invoices", category: "Account" },
    ScopeDef { name: "billing:write", description: "Change billing profiles", category: "Account" },
    ScopeDef { name: "auditlogs:read", description: "Read account audit logs", category: "Account" },
    ScopeDef { name: "notification:read", description: "Read notification policies", category: "Account" },
    ScopeDef { name: "notification:write", description: "Change notification policies", category: "Account" },
    // Compute
    ScopeDef { name: "workers:read", description: "Read Workers scripts and settings", category: "Compute" },
    ScopeDef { name: "workers:write", description: "Deploy and change Workers", category: "Compute" },
    ScopeDef { name: "workers_scripts:write", description: "Upload Worker script content", category: "Compute" },
    ScopeDef { name: "workers_kv:write", description: "Read and write Workers KV namespaces", category: "Compute" },
    ScopeDef { name: "workers_routes:write", description: "Change Worker route bindings", category: "Compute" },
    ScopeDef { name: "workers_tail:read", description: "Stream live Worker logs", category: "Compute" },
    ScopeDef { name: "workers_builds:read", description: "Read Worker build history", category: "Compute" },
    ScopeDef { name: "workers_builds:write", description: "Trigger Worker builds", category: "Compute" },
    ScopeDef { name: "workers_observability:read", description: "Read Worker telemetry", category: "Compute" },
    ScopeDef { name: "workers_observability:write", description: "Configure Worker telemetry", category: "Compute" },
    ScopeDef { name: "pages:read", description: "Read Pages projects and deployments", category: "Compute" },
    ScopeDef { name: "pages:write", description: "Create Pages deployments", category: "Compute" },
    ScopeDef { name: "containers:write", description: "Manage container instances", category: "Compute" },
    ScopeDef { name: "queues:write", description: "Manage queues and consumers", category: "Compute" },
    // Storage
    ScopeDef { name: "d1:write", description: "Read and write D1 databases", category: "Storage" },
    ScopeDef { name: "r2_catalog:write", description: "Manage R2 data catalogs", category: "Storage" },
    ScopeDef { name: "vectorize:write", description: "Manage vector indexes", category: "Storage" },
    ScopeDef { name: "secrets_store:read", description: "Read secret store metadata", category: "Storage" },
    ScopeDef { name: "secrets_store:write", description: "Write secret store entries", category: "Storage" },
    ScopeDef { name: "query_cache:write", description: "Manage query caches", category: "Storage" },
    // AI
    ScopeDef { name: "ai:read", description: "Read AI model catalog and usage", category: "AI" },
    ScopeDef { name: "ai:write", description: "Run and configure AI models", category: "AI" },
    ScopeDef { name: "aig:read", description: "Read AI gateway configuration", category: "AI" },
    ScopeDef { name: "aig:write", description: "Change AI gateway configuration", category: "AI" },
    ScopeDef { name: "aig:run", description: "Invoke AI gateway endpoints", category: "AI" },
    ScopeDef { name: "ai-search:read", description: "Read AI search indexes", category: "AI" },
    ScopeDef { name: "ai-search:write", description: "Manage AI search indexes", category: "AI" },
    ScopeDef { name: "ai-search:run", description: "Run AI search queries", category: "AI" },
    ScopeDef { name: "aiaudit:read", description: "Read AI crawler audit data", category: "AI" },
    ScopeDef { name: "aiaudit:write", description: "Configure AI crawler controls", category: "AI" },
    // DNS & Zones
    ScopeDef { name: "zone:read", description: "Read zone configuration", category: "DNS & Zones" },
    ScopeDef { name: "dns_records:read", description: "Read DNS records", category: "DNS & Zones" },
    ScopeDef { name: "dns_records:edit", description: "Create and change DNS records", category: "DNS & Zones" },
    ScopeDef { name: "dns_settings:read", description: "Read DNS zone settings", category: "DNS & Zones" },
    ScopeDef { name: "dns_analytics:read", description: "Read DNS analytics", category: "DNS & Zones" },
    ScopeDef { name: "ssl_certs:write", description: "Manage edge certificates", category: "DNS & Zones" },
    ScopeDef { name: "lb:read", description: "Read load balancer configuration", category: "DNS & Zones" },
    ScopeDef { name: "lb:edit", description: "Change load balancer configuration", category: "DNS & Zones" },
    // Zero Trust
    ScopeDef { name: "access:read", description: "Read Access applications and policies", category: "Zero Trust" },
    ScopeDef { name: "access:write", description: "Change Access applications and policies", category: "Zero Trust" },
    ScopeDef { name: "teams:read", description: "Read Gateway rules and lists", category: "Zero Trust" },
    ScopeDef { name: "teams:write", description: "Change Gateway rules and lists", category: "Zero Trust" },
    ScopeDef { name: "teams:pii", description: "Reveal redacted user PII in Gateway logs", category: "Zero Trust" },
    ScopeDef { name: "dex:read", description: "Read digital experience monitoring data", category: "Zero Trust" },
    ScopeDef { name: "dex:write", description: "Configure digital experience tests", category: "Zero Trust" },
    // Observability
    ScopeDef { name: "logpush:read", description: "Read Logpush jobs", category: "Observability" },
    ScopeDef { name: "logpush:write", description: "Manage Logpush jobs", category: "Observability" },
    ScopeDef { name: "url_scanner:read", description: "Read URL scanner results", category: "Observability" },
    ScopeDef { name: "url_scanner:write", description: "Submit URL scans", category: "Observability" },
    ScopeDef { name: "radar:read", description: "Read Radar datasets", category: "Observability" },
    ScopeDef { name: "pipelines:read", description: "Read data pipelines", category: "Observability" },
    ScopeDef { name: "pipelines:setup", description: "Create data pipelines", category: "Observability" },
    ScopeDef { name: "pipelines:write", description: "Change data pipelines", category: "Observability" },
];

/// Consent templates offered as radio-button presets.
pub const TEMPLATES: &[ScopeTemplate] = &[
    ScopeTemplate {
        name: "account",
        description: "Sign in and read account metadata",
        scopes: &["offline_access", "user:read", "account:read"],
        default: true,
    },
    ScopeTemplate {
        name: "developer",
        description: "Build and deploy: compute, storage, and DNS",
        scopes: &[
            "offline_access",
            "user:read",
            "account:read",
            "workers:read",
            "workers:write",
            "workers_scripts:write",
            "workers_kv:write",
            "workers_builds:read",
            "pages:read",
            "pages:write",
            "d1:write",
            "zone:read",
            "dns_records:read",
            "dns_records:edit",
        ],
        default: false,
    },
    ScopeTemplate {
        name: "read-only",
        description: "Read everything, change nothing",
        scopes: &[
            "offline_access",
            "user:read",
            "account:read",
            "billing:read",
            "auditlogs:read",
            "notification:read",
            "workers:read",
            "workers_tail:read",
            "workers_builds:read",
            "workers_observability:read",
            "pages:read",
            "secrets_store:read",
            "ai:read",
            "aig:read",
            "ai-search:read",
            "aiaudit:read",
            "zone:read",
            "dns_records:read",
            "dns_settings:read",
            "dns_analytics:read",
            "lb:read",
            "access:read",
            "teams:read",
            "dex:read",
            "logpush:read",
            "url_scanner:read",
            "radar:read",
            "pipelines:read",
        ],
        default: false,
    },
];

/// Look up a scope definition by name.
pub fn find_scope(name: &str) -> Option<&'static ScopeDef> {
    CATALOG.iter().find(|s| s.name == name)
}

/// Whether a scope name grants write-oriented access, per [`WRITE_SUFFIXES`].
pub fn is_write_scope(name: &str) -> bool {
    WRITE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// The template marked as default.
pub fn default_template() -> &'static ScopeTemplate {
    // Validated by tests: exactly one template carries `default: true`.
    TEMPLATES
        .iter()
        .find(|t| t.default)
        .unwrap_or(&TEMPLATES[0])
}

/// Look up a template by its form identifier.
pub fn template_by_name(name: &str) -> Option<&'static ScopeTemplate> {
    TEMPLATES.iter().find(|t| t.name == name)
}

/// Catalog scopes grouped by category, in catalog order.
pub fn grouped_by_category() -> Vec<(&'static str, Vec<&'static ScopeDef>)> {
    let mut groups: Vec<(&'static str, Vec<&'static ScopeDef>)> = Vec::new();
    for scope in CATALOG {
        match groups.iter_mut().find(|(cat, _)| *cat == scope.category) {
            Some((_, scopes)) => scopes.push(scope),
            None => groups.push((scope.category, vec![scope])),
        }
    }
    groups
}

/// Filter a submitted scope list down to known catalog scopes and truncate to
/// [`MAX_SCOPES`]. Order and duplicates-first-wins are preserved.
pub fn sanitize_scopes(submitted: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in submitted {
        if find_scope(name).is_some() && !out.iter().any(|s| s == name) {
            out.push(name.clone());
        }
        if out.len() == MAX_SCOPES {
            break;
        }
    }
    out
}

/// Suggest the closest catalog scope for an unknown name.
///
/// Returns a suggestion if a scope within edit distance 3 is found.
pub fn suggest_scope(name: &str) -> Option<&'static str> {
    let mut best: Option<(usize, &'static str)> = None;
    for scope in CATALOG {
        let dist = strsim::levenshtein(name, scope.name);
        if dist <= 3 && best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, scope.name));
        }
    }
    best.map(|(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_scope_exists_in_catalog() {
        for template in TEMPLATES {
            for scope in template.scopes {
                assert!(
                    find_scope(scope).is_some(),
                    "template '{}' references unknown scope '{}'",
                    template.name,
                    scope
                );
            }
        }
    }

    #[test]
    fn exactly_one_default_template() {
        let defaults = TEMPLATES.iter().filter(|t| t.default).count();
        assert_eq!(defaults, 1);
        assert_eq!(default_template().name, "account");
    }

    #[test]
    fn read_only_template_has_no_write_scopes() {
        let template = template_by_name("read-only").unwrap();
        for scope in template.scopes {
            assert!(
                !is_write_scope(scope),
                "read-only template contains write scope '{}'",
                scope
            );
        }
    }

    #[test]
    fn templates_fit_under_the_cap() {
        for template in TEMPLATES {
            assert!(
                template.scopes.len() <= MAX_SCOPES,
                "template '{}' exceeds the scope cap",
                template.name
            );
        }
    }

    #[test]
    fn catalog_names_are_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            for b in &CATALOG[i + 1..] {
                assert_ne!(a.name, b.name, "duplicate catalog entry");
            }
        }
    }

    #[test]
    fn write_classification() {
        assert!(is_write_scope("workers:write"));
        assert!(is_write_scope("dns_records:edit"));
        assert!(is_write_scope("connectivity:admin"));
        assert!(is_write_scope("teams:pii"));
        assert!(is_write_scope("aig:run"));
        assert!(!is_write_scope("workers:read"));
        assert!(!is_write_scope("offline_access"));
    }

    #[test]
    fn sanitize_drops_unknown_and_duplicate_scopes() {
        let submitted = vec![
            "workers:read".to_string(),
            "made-up:scope".to_string(),
            "workers:read".to_string(),
            "zone:read".to_string(),
        ];
        let out = sanitize_scopes(&submitted);
        assert_eq!(out, vec!["workers:read", "zone:read"]);
    }

    #[test]
    fn sanitize_truncates_to_cap() {
        let all: Vec<String> = CATALOG.iter().map(|s| s.name.to_string()).collect();
        assert!(all.len() > MAX_SCOPES);
        let out = sanitize_scopes(&all);
        assert_eq!(out.len(), MAX_SCOPES);
    }

    #[test]
    fn grouped_by_category_covers_catalog() {
        let groups = grouped_by_category();
        let total: usize = groups.iter().map(|(_, s)| s.len()).sum();
        assert_eq!(total, CATALOG.len());
        assert_eq!(groups[0].0, "Account");
    }

    #[test]
    fn suggest_close_scope_name() {
        assert_eq!(suggest_scope("worker:read"), Some("workers:read"));
        assert_eq!(suggest_scope("zzzzzzzzzzz"), None);
    }
}
