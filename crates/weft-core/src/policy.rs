use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sliding-window rate limit: at most `max_calls` per `window_secs`,
/// counted per (tool, tenant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_calls: u32,
    pub window_secs: u64,
}

impl RateLimit {
    pub fn new(max_calls: u32, window_secs: u64) -> Self {
        Self {
            max_calls,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Policy governing invocation of a single tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,

    /// Hostnames the tool may reach. `None` = unrestricted.
    /// An entry matches the host itself and any of its subdomains.
    #[serde(default)]
    pub allowed_domains: Option<Vec<String>>,

    /// Overrides the tool's own timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ToolPolicy {
    pub fn with_rate_limit(mut self, max_calls: u32, window_secs: u64) -> Self {
        self.rate_limit = Some(RateLimit::new(max_calls, window_secs));
        self
    }

    pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = Some(domains.into_iter().map(Into::into).collect());
        self
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn overlay(&self, other: &ToolPolicy) -> ToolPolicy {
        ToolPolicy {
            rate_limit: other.rate_limit.or(self.rate_limit),
            allowed_domains: other
                .allowed_domains
                .clone()
                .or_else(|| self.allowed_domains.clone()),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
        }
    }

    pub fn is_domain_restricted(&self) -> bool {
        self.allowed_domains.is_some()
    }

    /// Check a hostname against the allowlist.
    pub fn allows_host(&self, host: &str) -> bool {
        match &self.allowed_domains {
            None => true,
            Some(list) => list.iter().any(|entry| host_matches(host, entry)),
        }
    }
}

fn host_matches(host: &str, entry: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let entry = entry
        .trim()
        .trim_start_matches("*.")
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if entry == "*" {
        return true;
    }
    host == entry || host.ends_with(&format!(".{}", entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_allows_everything() {
        let policy = ToolPolicy::default();
        assert!(policy.allows_host("anything.example"));
        assert!(!policy.is_domain_restricted());
    }

    #[test]
    fn allowlist_matches_subdomains() {
        let policy = ToolPolicy::default().with_allowed_domains(["example.com", "*.hooks.io"]);
        assert!(policy.allows_host("example.com"));
        assert!(policy.allows_host("API.Example.com"));
        assert!(policy.allows_host("a.hooks.io"));
        assert!(!policy.allows_host("evil-example.com"));
        assert!(!policy.allows_host("example.org"));
    }

    #[test]
    fn overlay_prefers_override() {
        let base = ToolPolicy::default().with_rate_limit(10, 60);
        let over = ToolPolicy {
            timeout_secs: Some(5),
            ..Default::default()
        };
        let merged = base.overlay(&over);
        assert_eq!(merged.rate_limit, Some(RateLimit::new(10, 60)));
        assert_eq!(merged.timeout_secs, Some(5));

        let over = ToolPolicy::default().with_rate_limit(1, 1);
        assert_eq!(base.overlay(&over).rate_limit, Some(RateLimit::new(1, 1)));
    }
}
