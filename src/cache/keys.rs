//! URL normalization and cache key derivation
//!
//! The normalized URL string is the single input to cache-key hashing,
//! crawl dedup, and upstream fetches, so every consumer sees the same
//! spelling of a resource.

use sha2::{Digest, Sha256};
use url::Url;

/// Normalize a URL for keying: lowercase scheme and host, drop default
/// ports, keep path, query, and fragment as given.
///
/// Idempotent: `normalize_url(normalize_url(u)) == normalize_url(u)`.
/// Unparseable input is returned unchanged so it still keys consistently.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        // The url crate lowercases scheme/host and strips default ports
        // during parsing; serializing gives the canonical spelling.
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.to_string(),
    }
}

/// First 16 hex characters of SHA-256 over the normalized URL
#[must_use]
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(normalize_url(url).as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Extract the registrable domain for view counting.
///
/// Naive last-two-labels extraction; multi-part public suffixes like
/// `.co.uk` are misclassified. Known limitation, acceptable for the
/// popularity list this feeds.
#[must_use]
pub fn registrable_domain(url: &str) -> String {
    let host = match Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return url.to_string(),
        },
        Err(_) => return url.to_string(),
    };

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        host
    } else {
        labels[labels.len() - 2..].join(".")
    }
}
