//! Platform policy — the limits every service config is checked against.

use std::ops::RangeInclusive;

/// Schema version every `serpens.yml` must declare.
pub const SCHEMA_VERSION: &str = "1.0";

/// First externally allocatable port.
pub const PORT_RANGE_START: u16 = 3000;

/// Last externally allocatable port.
pub const PORT_RANGE_END: u16 = 9999;

/// Image template token replaced with the repository owner.
pub const OWNER_PLACEHOLDER: &str = "${GITHUB_REPOSITORY_OWNER}";

/// Image template token replaced with the release tag.
pub const TAG_PLACEHOLDER: &str = "${TAG}";

/// The allocatable port range as a `RangeInclusive`.
pub fn port_range() -> RangeInclusive<u16> {
    PORT_RANGE_START..=PORT_RANGE_END
}

/// Limits applied by the validator.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformPolicy {
    /// Domain every service must live under (without leading dot).
    pub domain_suffix: String,
    /// Service names nobody may claim.
    pub reserved_names: Vec<String>,
    /// Prefix every volume mount path must start with.
    pub sandbox_root: String,
    pub max_replicas: u32,
    /// CPU ceiling in cores.
    pub max_cpu: f64,
    pub min_memory_mb: u64,
    pub max_memory_mb: u64,
    pub allowed_network_modes: Vec<String>,
}

impl Default for PlatformPolicy {
    fn default() -> Self {
        Self {
            domain_suffix: "serpens.local".to_string(),
            reserved_names: ["admin", "api", "system", "serpens", "deploy"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sandbox_root: "/app/".to_string(),
            max_replicas: 3,
            max_cpu: 2.0,
            min_memory_mb: 64,
            max_memory_mb: 1024,
            allowed_network_modes: vec!["bridge".to_string(), "overlay".to_string()],
        }
    }
}

impl PlatformPolicy {
    /// Default policy for a different platform domain.
    pub fn with_domain(domain_suffix: &str) -> Self {
        Self {
            domain_suffix: domain_suffix.trim_start_matches('.').to_string(),
            ..Self::default()
        }
    }

    /// Whether `domain` is a subdomain of the platform domain.
    pub fn owns_domain(&self, domain: &str) -> bool {
        domain
            .strip_suffix(&self.domain_suffix)
            .and_then(|rest| rest.strip_suffix('.'))
            .is_some_and(|label| !label.is_empty())
    }

    /// Strip the platform suffix, leaving the service label (`light.serpens.local` → `light`).
    pub fn base_label<'a>(&self, domain: &'a str) -> &'a str {
        domain
            .strip_suffix(&self.domain_suffix)
            .and_then(|rest| rest.strip_suffix('.'))
            .unwrap_or(domain)
    }

    /// Join a label onto the platform domain.
    pub fn domain_for(&self, label: &str) -> String {
        format!("{label}.{}", self.domain_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owns_subdomains_only() {
        let policy = PlatformPolicy::with_domain("volodic.com");
        assert!(policy.owns_domain("light.volodic.com"));
        assert!(policy.owns_domain("a.b.volodic.com"));
        assert!(!policy.owns_domain("volodic.com"));
        assert!(!policy.owns_domain("evilvolodic.com"));
        assert!(!policy.owns_domain("light.example.com"));
    }

    #[test]
    fn base_label_round_trips() {
        let policy = PlatformPolicy::default();
        let domain = policy.domain_for("light");
        assert_eq!(domain, "light.serpens.local");
        assert_eq!(policy.base_label(&domain), "light");
    }

    #[test]
    fn leading_dot_is_ignored() {
        let policy = PlatformPolicy::with_domain(".example.org");
        assert_eq!(policy.domain_suffix, "example.org");
    }
}
