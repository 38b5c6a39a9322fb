//! Cached response records and their storage envelope
//!
//! Entries round-trip through Redis as a JSON envelope with the body
//! base64-encoded, so binary assets (images, archives) survive a
//! string-oriented store. The envelope format is private to this module.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Which tier an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Permanent, crawler- or human-vetted entries
    Curated,
    /// Auto-populated entries that expire after the hot TTL
    Hot,
}

impl CacheTier {
    /// Redis key prefix for this tier
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Curated => "curated:",
            Self::Hot => "hot:",
        }
    }

    /// Parse a tier name as used by the admin surface
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "curated" => Some(Self::Curated),
            "hot" => Some(Self::Hot),
            _ => None,
        }
    }

    /// Value for the `X-Cache` response header on a hit from this tier
    #[must_use]
    pub fn x_cache(self) -> &'static str {
        match self {
            Self::Curated => "hit-curated",
            Self::Hot => "hit-hot",
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Curated => write!(f, "curated"),
            Self::Hot => write!(f, "hot"),
        }
    }
}

/// Result of a cache lookup
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit {
        response: CachedResponse,
        tier: CacheTier,
    },
    Miss,
}

impl CacheLookup {
    /// Value for the `X-Cache` response header
    #[must_use]
    pub fn x_cache(&self) -> &'static str {
        match self {
            Self::Hit { tier, .. } => tier.x_cache(),
            Self::Miss => "miss",
        }
    }
}

/// A cached upstream response, stored content-decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// HTTP status of the terminal snapshot (100-599)
    pub status_code: u16,
    /// End-to-end headers in receive order; names compared
    /// case-insensitively, duplicates preserved
    pub headers: Vec<(String, String)>,
    /// Decoded body bytes (binary-safe)
    pub body: Vec<u8>,
    /// Content type, preserved from upstream or sniffed
    pub content_type: String,
    /// Unix seconds when the entry was stored
    pub stored_at: u64,
    /// Normalized URL this snapshot was fetched for
    pub source_url: String,
    /// YYYYMMDD date of the snapshot the archive actually served
    pub archive_date: String,
}

/// On-the-wire shape; body carried as base64
#[derive(Serialize, Deserialize)]
struct Envelope {
    status_code: u16,
    headers: Vec<(String, String)>,
    body: String,
    content_type: String,
    stored_at: u64,
    source_url: String,
    archive_date: String,
}

impl CachedResponse {
    /// First header value matching `name`, case-insensitive
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the body is HTML (drives transform and header-bar stages)
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type.contains("html")
    }

    /// Whether this snapshot is itself a redirect to relay to the client
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        matches!(self.status_code, 301 | 302 | 303 | 307 | 308)
    }

    /// Serialize to the JSON storage envelope
    pub fn to_envelope(&self) -> serde_json::Result<String> {
        serde_json::to_string(&Envelope {
            status_code: self.status_code,
            headers: self.headers.clone(),
            body: BASE64.encode(&self.body),
            content_type: self.content_type.clone(),
            stored_at: self.stored_at,
            source_url: self.source_url.clone(),
            archive_date: self.archive_date.clone(),
        })
    }

    /// Deserialize from the JSON storage envelope
    pub fn from_envelope(data: &str) -> anyhow::Result<Self> {
        let envelope: Envelope = serde_json::from_str(data)?;
        Ok(Self {
            status_code: envelope.status_code,
            headers: envelope.headers,
            body: BASE64.decode(envelope.body.as_bytes())?,
            content_type: envelope.content_type,
            stored_at: envelope.stored_at,
            source_url: envelope.source_url,
            archive_date: envelope.archive_date,
        })
    }
}

/// Current time as unix seconds
#[must_use]
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
