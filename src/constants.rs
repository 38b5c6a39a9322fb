//! Constants used throughout the proxy
//!
//! This module centralizes magic numbers and configuration values
//! to improve maintainability and reduce duplication.

use std::time::Duration;

/// Timeout constants
pub mod timeout {
    use super::Duration;

    /// Idle timeout for reading a request from a client connection
    pub const CLIENT_READ: Duration = Duration::from_secs(30);

    /// Connect + read timeout for upstream archive fetches
    pub const UPSTREAM_FETCH: Duration = Duration::from_secs(30);

    /// Grace window for in-flight responses during shutdown
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
}

/// HTTP parsing limits (protects against hostile or broken clients)
pub mod limits {
    /// Maximum length of the request line in bytes
    pub const MAX_REQUEST_LINE: usize = 8192;

    /// Maximum number of request headers
    pub const MAX_HEADERS: usize = 100;

    /// Maximum accepted request body (admin form posts only)
    pub const MAX_BODY_SIZE: usize = 1024 * 1024; // 1MB
}

/// Upstream archive constants
pub mod upstream {
    /// Maximum archive-internal redirects followed per fetch
    pub const MAX_REDIRECTS: usize = 10;

    /// User-Agent presented to the archive
    pub const USER_AGENT: &str = concat!("WaybackCacheProxy/", env!("CARGO_PKG_VERSION"));

    /// Default archive base URL
    pub const DEFAULT_BASE_URL: &str = "https://web.archive.org";
}

/// Crawler constants
pub mod crawl {
    use super::Duration;

    /// Maximum retained crawl log lines (oldest evicted)
    pub const LOG_MAX: usize = 200;

    /// Initial backoff after an upstream throttling signal
    pub const BACKOFF_INITIAL: Duration = Duration::from_secs(1);

    /// Backoff ceiling
    pub const BACKOFF_MAX: Duration = Duration::from_secs(30);
}

/// Server identification header value
pub const SERVER_NAME: &str = "WaybackCacheProxy";

/// Reserved path prefix for the admin surface
pub const ADMIN_PREFIX: &str = "/_admin";

/// Redis channel carrying config reload notifications
pub const RELOAD_CHANNEL: &str = "wayback:config:reload";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts() {
        assert_eq!(timeout::CLIENT_READ.as_secs(), 30);
        assert_eq!(timeout::UPSTREAM_FETCH.as_secs(), 30);
        assert!(timeout::SHUTDOWN_GRACE < timeout::CLIENT_READ);
    }

    #[test]
    fn test_limits() {
        const _: () = assert!(limits::MAX_REQUEST_LINE >= 1024);
        const _: () = assert!(limits::MAX_BODY_SIZE > limits::MAX_REQUEST_LINE);
    }

    #[test]
    fn test_admin_prefix_has_no_trailing_slash() {
        // Dispatch matches both "/_admin" and "/_admin/..." against this
        assert!(!ADMIN_PREFIX.ends_with('/'));
    }
}
