//! Network domain allow-lists.

use tracing::debug;
use url::Url;

use crate::error::{CapabilityError, CapabilityResult};

/// Hosts an extension may reach with `fetch` and the downloader.
///
/// An empty list allows every host. Entries are either exact host names or
/// `*.suffix`, which matches any subdomain of `suffix` but not `suffix`
/// itself. A lone `*` allows everything.
#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    entries: Vec<String>,
}

impl DomainPolicy {
    /// Build from manifest entries.
    #[must_use]
    pub fn new(domains: &[String]) -> Self {
        Self {
            entries: domains
                .iter()
                .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Whether requests are unrestricted.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.entries.is_empty() || self.entries.iter().any(|e| e == "*")
    }

    /// Whether `host` is allowed.
    #[must_use]
    pub fn allows_host(&self, host: &str) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.entries.iter().any(|entry| match entry.strip_prefix("*.") {
            Some(suffix) => host
                .strip_suffix(suffix)
                .is_some_and(|head| head.ends_with('.') && head.len() > 1),
            None => *entry == host,
        })
    }

    /// Authorize a request URL, returning it parsed.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Unauthorized`] for malformed URLs, URLs
    /// without a host, non-HTTP schemes, and hosts outside the list.
    pub fn check(&self, operation: &str, raw: &str) -> CapabilityResult<Url> {
        let refuse = |reason: &str| CapabilityError::Unauthorized {
            operation: operation.to_string(),
            resource: raw.to_string(),
            reason: Some(reason.to_string()),
        };
        let url = Url::parse(raw).map_err(|e| refuse(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(refuse("only http and https are allowed"));
        }
        let host = url.host_str().ok_or_else(|| refuse("missing host"))?;
        if !self.allows_host(host) {
            debug!(operation, host, "domain refused");
            return Err(refuse("domain not in allow-list"));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(entries: &[&str]) -> DomainPolicy {
        DomainPolicy::new(&entries.iter().map(|s| (*s).to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_empty_allows_all() {
        assert!(policy(&[]).check("fetch", "https://anything.example/x").is_ok());
    }

    #[test]
    fn test_exact_and_wildcard() {
        let p = policy(&["api.example.com", "*.cdn.net"]);
        assert!(p.allows_host("API.example.com"));
        assert!(!p.allows_host("example.com"));
        assert!(p.allows_host("img.cdn.net"));
        assert!(p.allows_host("a.b.cdn.net"));
        assert!(!p.allows_host("cdn.net"));
        assert!(!p.allows_host("evilcdn.net"));
    }

    #[test]
    fn test_check_rejects_other_schemes_and_hosts() {
        let p = policy(&["example.com"]);
        assert!(p.check("fetch", "https://example.com/a").is_ok());
        assert!(p.check("fetch", "file:///etc/passwd").is_err());
        assert!(p.check("fetch", "https://other.com").is_err());
        assert!(p.check("fetch", "not a url").is_err());
    }
}
