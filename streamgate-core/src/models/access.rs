//! Host allowlist and the per-request access descriptor.

use url::Url;

/// Check a candidate hostname against a single allowlist pattern.
///
/// - `example.com` matches `example.com` only (case-insensitive).
/// - `.example.com` matches any host ending in `.example.com`, and the apex
///   `example.com` itself.
///
/// A trailing root dot on the host is ignored. Empty hosts and empty patterns
/// never match.
#[must_use]
pub fn host_matches_pattern(host: &str, pattern: &str) -> bool {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let pattern = pattern.trim().to_ascii_lowercase();
    if host.is_empty() || pattern.is_empty() || pattern == "." {
        return false;
    }

    if let Some(apex) = pattern.strip_prefix('.') {
        return host == apex || host.ends_with(&pattern);
    }

    host == pattern
}

/// Ordered, case-insensitively deduplicated set of host patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedHostSet {
    patterns: Vec<String>,
}

impl AllowedHostSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for pattern in patterns {
            set.insert(pattern.as_ref());
        }
        set
    }

    /// Add a pattern, ignoring blanks and duplicates.
    pub fn insert(&mut self, pattern: &str) {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return;
        }
        if self
            .patterns
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(pattern))
        {
            return;
        }
        self.patterns.push(pattern.to_string());
    }

    /// Sole authorization check for which hosts the relay may contact.
    #[must_use]
    pub fn contains(&self, host: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| host_matches_pattern(host, pattern))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Everything the manifest and segment paths need after access is granted.
/// Recomputed on every request, never cached.
#[derive(Debug, Clone)]
pub struct ResolvedAccess {
    pub stream_id: String,
    pub origin_url: Url,
    pub allowed_hosts: AllowedHostSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_suffix_rules() {
        assert!(host_matches_pattern("example.com", "example.com"));
        assert!(host_matches_pattern("example.com", ".example.com"));
        assert!(host_matches_pattern("cdn.example.com", ".example.com"));
        assert!(!host_matches_pattern("cdn.example.com", "example.com"));
        assert!(!host_matches_pattern("evilexample.com", "example.com"));
        assert!(!host_matches_pattern("evilexample.com", ".example.com"));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert!(host_matches_pattern("CDN.Example.COM", ".example.com"));
        assert!(host_matches_pattern("example.com", "EXAMPLE.com"));
    }

    #[test]
    fn test_degenerate_inputs_never_match() {
        assert!(!host_matches_pattern("", "example.com"));
        assert!(!host_matches_pattern("example.com", ""));
        assert!(!host_matches_pattern("example.com", "   "));
        assert!(!host_matches_pattern("example.com", "."));
        assert!(!host_matches_pattern("com", ".example.com"));
    }

    #[test]
    fn test_suffix_must_align_on_label_boundary() {
        assert!(!host_matches_pattern("example.com.evil.net", ".example.com"));
        assert!(!host_matches_pattern("notcdn.test", ".cdn.test"));
        assert!(host_matches_pattern("a.b.cdn.test", ".cdn.test"));
    }

    #[test]
    fn test_trailing_root_dot_is_ignored() {
        assert!(host_matches_pattern("cdn.example.com.", ".example.com"));
    }

    #[test]
    fn test_set_deduplicates_and_keeps_order() {
        let mut set = AllowedHostSet::new(["cdn.test", " ", ".media.test"]);
        set.insert("CDN.test");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["cdn.test", ".media.test"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_empty_set_rejects_everything() {
        let set = AllowedHostSet::default();
        assert!(set.is_empty());
        assert!(!set.contains("cdn.test"));
    }
}
