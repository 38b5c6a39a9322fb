//! Allowlist pattern matching for access control
//!
//! Patterns use glob semantics over the full URL string: `*` matches any
//! run of characters except `/`, `**` matches any run including `/`. A
//! URL is allowed when it matches at least one pattern; an empty
//! allowlist denies everything.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::warn;

/// A compiled set of allowlist patterns
#[derive(Debug)]
pub struct Allowlist {
    set: GlobSet,
    pattern_count: usize,
}

impl Allowlist {
    /// Compile patterns into a match set.
    ///
    /// Invalid patterns (e.g. a `**` glued to other characters inside a
    /// path segment) are skipped with a warning rather than poisoning the
    /// whole list.
    #[must_use]
    pub fn new(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_count = 0;
        for pattern in patterns {
            match GlobBuilder::new(pattern).literal_separator(true).build() {
                Ok(glob) => {
                    builder.add(glob);
                    pattern_count += 1;
                }
                Err(e) => {
                    warn!("Skipping invalid allowlist pattern {:?}: {}", pattern, e);
                }
            }
        }
        let set = builder.build().unwrap_or_else(|e| {
            warn!("Failed to build allowlist matcher: {}", e);
            GlobSet::empty()
        });
        Self { set, pattern_count }
    }

    /// Number of usable patterns
    #[must_use]
    pub fn len(&self) -> usize {
        self.pattern_count
    }

    /// `true` when no usable pattern exists (which denies every URL)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pattern_count == 0
    }

    /// Whether the URL matches any pattern
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        if self.is_empty() {
            return false;
        }
        self.set.is_match(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist(patterns: &[&str]) -> Allowlist {
        let owned: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        Allowlist::new(&owned)
    }

    #[test]
    fn test_empty_allowlist_denies_everything() {
        let list = allowlist(&[]);
        assert!(list.is_empty());
        assert!(!list.matches("http://example.com/"));
        assert!(!list.matches(""));
    }

    #[test]
    fn test_exact_match() {
        let list = allowlist(&["http://example.com/"]);
        assert!(list.matches("http://example.com/"));
        assert!(!list.matches("http://example.com/page"));
    }

    #[test]
    fn test_single_star_does_not_cross_slashes() {
        let list = allowlist(&["http://example.com/*.html"]);
        assert!(list.matches("http://example.com/index.html"));
        assert!(!list.matches("http://example.com/dir/page.html"));
    }

    #[test]
    fn test_double_star_crosses_slashes() {
        let list = allowlist(&["http://example.com/**"]);
        assert!(list.matches("http://example.com/a"));
        assert!(list.matches("http://example.com/a/b/c.gif"));
        assert!(!list.matches("http://other.com/a"));
    }

    #[test]
    fn test_host_wildcard() {
        let list = allowlist(&["http://*.example.com/**"]);
        assert!(list.matches("http://www.example.com/page"));
        assert!(list.matches("http://art.example.com/a/b"));
        assert!(!list.matches("http://example.org/page"));
    }

    #[test]
    fn test_tld_pattern_denies_other_hosts() {
        // A bare TLD pattern must not match an ordinary .com URL
        let list = allowlist(&["*.art"]);
        assert!(!list.matches("http://example.com/"));
    }

    #[test]
    fn test_any_match_allows() {
        let list = allowlist(&["http://a.com/**", "http://b.com/**"]);
        assert!(list.matches("http://a.com/x"));
        assert!(list.matches("http://b.com/y"));
        assert!(!list.matches("http://c.com/z"));
    }

    #[test]
    fn test_invalid_pattern_is_skipped_not_fatal() {
        let list = allowlist(&["[", "http://ok.com/**"]);
        assert_eq!(list.len(), 1);
        assert!(list.matches("http://ok.com/page"));
    }
}
