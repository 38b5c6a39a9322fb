//! Wayback Machine HTTP client
//!
//! Fetches the snapshot of a URL closest to the target date. The archive
//! expresses "closest" through its own redirect chain, so redirects are
//! followed manually: archive-internal redirects (`/web/{date}/{url}`)
//! adopt the new date and URL, while a redirect to the live web means the
//! archive has nothing and is treated as terminal.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{normalize_url, now_unix, CachedResponse};
use crate::config::validation::days_between;
use crate::constants::{timeout, upstream};
use crate::http::is_hop_by_hop;

/// Archive-internal snapshot location: `/web/{timestamp}{modifier}/{url}`,
/// optionally absolute against the archive host
static RE_SNAPSHOT_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://[^/]*web\.archive\.org)?/web/(\d+)[a-z_]*/(.+)$")
        .expect("snapshot location regex")
});

/// Dead GeoCities hosts served by the OoCities mirror
const GEOCITIES_HOSTS: [&str; 2] = ["://www.geocities.com", "://geocities.com"];
const OOCITIES_HOST: &str = "://www.oocities.org";

/// Errors from the upstream archive
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The archive has no snapshot: terminal 404, or redirect to the
    /// live web
    #[error("the archive has no snapshot of this URL")]
    NotArchived,

    /// Network failure or archive-side 5xx
    #[error("the archive could not be reached: {0}")]
    Unavailable(String),

    /// The archive did not answer within the fetch timeout
    #[error("the archive did not respond in time")]
    Timeout,

    /// The redirect budget ran out before a terminal snapshot
    #[error("too many redirects while resolving the snapshot")]
    TooManyRedirects,

    /// The archive redirected back to an already-visited snapshot
    #[error("redirect loop while resolving the snapshot")]
    LoopDetected,
}

impl UpstreamError {
    /// HTTP status the client receives for this failure
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotArchived => 404,
            Self::Timeout => 504,
            Self::Unavailable(_) | Self::TooManyRedirects | Self::LoopDetected => 502,
        }
    }
}

/// Client for fetching snapshots from the Wayback Machine
#[derive(Debug, Clone)]
pub struct WaybackClient {
    http: reqwest::Client,
    base_url: String,
    geocities_fix: bool,
}

impl WaybackClient {
    /// Build a client against the given archive base URL.
    ///
    /// Redirects are disabled on the HTTP client; the fetch loop handles
    /// them itself.
    pub fn new(base_url: &str, geocities_fix: bool) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout::UPSTREAM_FETCH)
            .connect_timeout(timeout::UPSTREAM_FETCH)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(upstream::USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            geocities_fix,
        })
    }

    /// Reroute GeoCities URLs through the OoCities mirror
    fn apply_geocities_fix(&self, url: &str) -> String {
        if self.geocities_fix {
            for host in GEOCITIES_HOSTS {
                if url.contains(host) {
                    let rerouted = url.replacen(host, OOCITIES_HOST, 1);
                    info!("Rerouting GeoCities URL to {}", rerouted);
                    return rerouted;
                }
            }
        }
        url.to_string()
    }

    /// Identity-rendering archive URL for a `(url, date)` pair
    fn snapshot_url(&self, url: &str, date: &str) -> String {
        format!("{}/web/{}id_/{}", self.base_url, date, url)
    }

    /// Fetch the terminal snapshot for `url` near `date` (YYYYMMDD).
    ///
    /// `tolerance_days` only governs logging: the archive's closest match
    /// is always accepted, but a large drift is worth a warning.
    pub async fn fetch_snapshot(
        &self,
        url: &str,
        date: &str,
        tolerance_days: u32,
    ) -> Result<CachedResponse, UpstreamError> {
        let source_url = normalize_url(url);
        let fetch_url = self.apply_geocities_fix(&source_url);

        let mut current_date = date.to_string();
        let mut current_url = fetch_url;
        let mut visited: HashSet<(String, String)> = HashSet::new();
        visited.insert((current_date.clone(), current_url.clone()));

        for _ in 0..=upstream::MAX_REDIRECTS {
            let target = self.snapshot_url(&current_url, &current_date);
            debug!("Fetching snapshot: {}", target);

            let response = self.http.get(&target).send().await.map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Unavailable(e.to_string())
                }
            })?;

            let status = response.status().as_u16();

            if response.status().is_redirection() {
                let Some(location) = response
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                else {
                    return Err(UpstreamError::NotArchived);
                };

                match self.parse_snapshot_location(&location) {
                    Some((next_date, next_url)) => {
                        if !visited.insert((next_date.clone(), next_url.clone())) {
                            return Err(UpstreamError::LoopDetected);
                        }
                        debug!(
                            "Archive redirect: {} @ {} -> {} @ {}",
                            current_url, current_date, next_url, next_date
                        );
                        current_date = next_date;
                        current_url = next_url;
                        continue;
                    }
                    None => {
                        // The archive is pointing at the live web: it has
                        // no snapshot to give us
                        debug!("Redirect to live web for {}: {}", url, location);
                        return Err(UpstreamError::NotArchived);
                    }
                }
            }

            // 429 counts as unavailability so callers (the crawler's
            // backoff in particular) can tell throttling from a miss
            if status >= 500 || status == 429 {
                return Err(UpstreamError::Unavailable(format!(
                    "archive returned {status}"
                )));
            }
            if status >= 400 {
                debug!("Archive returned {} for {}", status, url);
                return Err(UpstreamError::NotArchived);
            }

            // Terminal 2xx: collect the snapshot
            let mut headers: Vec<(String, String)> = Vec::new();
            for (name, value) in response.headers() {
                if is_hop_by_hop(name.as_str()) {
                    continue;
                }
                if let Ok(value) = value.to_str() {
                    headers.push((name.as_str().to_string(), value.to_string()));
                }
            }
            let content_type = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                .map(|(_, v)| v.clone());

            let body = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Unavailable(e.to_string())
                }
            })?;

            let content_type =
                content_type.unwrap_or_else(|| sniff_content_type(&body).to_string());

            let archive_date = served_date(&current_date);
            match days_between(&archive_date, date) {
                Some(drift) if drift > tolerance_days => {
                    warn!(
                        "Snapshot for {} is {} days from target date ({} vs {})",
                        url, drift, archive_date, date
                    );
                }
                _ => {}
            }

            return Ok(CachedResponse {
                status_code: status,
                headers,
                body: body.to_vec(),
                content_type,
                stored_at: now_unix(),
                source_url,
                archive_date,
            });
        }

        Err(UpstreamError::TooManyRedirects)
    }

    /// Split an archive-internal Location into `(timestamp, url)`.
    ///
    /// Relative `/web/...` locations and absolute ones against the
    /// archive host both count; anything else is the live web. A custom
    /// base URL (tests, mirrors) is matched by prefix.
    fn parse_snapshot_location(&self, location: &str) -> Option<(String, String)> {
        let relative = location
            .strip_prefix(&self.base_url)
            .unwrap_or(location)
            .to_string();
        let captures = RE_SNAPSHOT_LOCATION.captures(&relative)?;
        Some((captures[1].to_string(), captures[2].to_string()))
    }
}

/// Reduce an archive timestamp (up to 14 digits) to its YYYYMMDD day
fn served_date(timestamp: &str) -> String {
    let digits: String = timestamp.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 8 {
        digits[..8].to_string()
    } else {
        digits
    }
}

/// Guess a content type from the body prefix when upstream sent none
fn sniff_content_type(body: &[u8]) -> &'static str {
    if body.starts_with(b"\x89PNG") {
        return "image/png";
    }
    if body.starts_with(b"GIF87a") || body.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if body.starts_with(&[0xFF, 0xD8]) {
        return "image/jpeg";
    }
    let head: Vec<u8> = body
        .iter()
        .take(256)
        .map(u8::to_ascii_lowercase)
        .collect();
    if head.windows(5).any(|w| w == b"<html") || head.windows(9).any(|w| w == b"<!doctype") {
        return "text/html";
    }
    "application/octet-stream"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> WaybackClient {
        WaybackClient::new("https://web.archive.org", true).unwrap()
    }

    #[test]
    fn test_snapshot_url_uses_identity_modifier() {
        let url = client().snapshot_url("http://example.com/", "20010915");
        assert_eq!(
            url,
            "https://web.archive.org/web/20010915id_/http://example.com/"
        );
    }

    #[test]
    fn test_parse_relative_snapshot_location() {
        let parsed = client().parse_snapshot_location("/web/20010916123456/http://example.com/a");
        assert_eq!(
            parsed,
            Some(("20010916123456".to_string(), "http://example.com/a".to_string()))
        );
    }

    #[test]
    fn test_parse_absolute_snapshot_location() {
        let parsed = client()
            .parse_snapshot_location("https://web.archive.org/web/20010916if_/http://example.com/");
        assert_eq!(
            parsed,
            Some(("20010916".to_string(), "http://example.com/".to_string()))
        );
    }

    #[test]
    fn test_live_web_location_is_not_a_snapshot() {
        assert_eq!(client().parse_snapshot_location("http://example.com/moved"), None);
        assert_eq!(client().parse_snapshot_location("/robots.txt"), None);
    }

    #[test]
    fn test_custom_base_url_location() {
        let client = WaybackClient::new("http://127.0.0.1:9999", false).unwrap();
        let parsed =
            client.parse_snapshot_location("http://127.0.0.1:9999/web/20010916/http://e.com/");
        assert_eq!(
            parsed,
            Some(("20010916".to_string(), "http://e.com/".to_string()))
        );
    }

    #[test]
    fn test_geocities_reroute() {
        let rerouted = client().apply_geocities_fix("http://www.geocities.com/area51/page.html");
        assert_eq!(rerouted, "http://www.oocities.org/area51/page.html");

        let untouched = client().apply_geocities_fix("http://example.com/geocities.html");
        assert_eq!(untouched, "http://example.com/geocities.html");
    }

    #[test]
    fn test_geocities_fix_can_be_disabled() {
        let client = WaybackClient::new("https://web.archive.org", false).unwrap();
        let url = "http://geocities.com/page";
        assert_eq!(client.apply_geocities_fix(url), url);
    }

    #[test]
    fn test_served_date_truncates_timestamps() {
        assert_eq!(served_date("20010916123456"), "20010916");
        assert_eq!(served_date("20010916"), "20010916");
        assert_eq!(served_date("2001"), "2001");
    }

    #[test]
    fn test_sniff_content_type() {
        assert_eq!(sniff_content_type(b"\x89PNG\r\n"), "image/png");
        assert_eq!(sniff_content_type(b"GIF89a..."), "image/gif");
        assert_eq!(sniff_content_type(&[0xFF, 0xD8, 0xFF]), "image/jpeg");
        assert_eq!(sniff_content_type(b"<HTML><BODY>"), "text/html");
        assert_eq!(sniff_content_type(b"<!DOCTYPE html>"), "text/html");
        assert_eq!(sniff_content_type(&[0u8, 1, 2, 3]), "application/octet-stream");
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(UpstreamError::NotArchived.status_code(), 404);
        assert_eq!(UpstreamError::Timeout.status_code(), 504);
        assert_eq!(UpstreamError::Unavailable("x".into()).status_code(), 502);
        assert_eq!(UpstreamError::TooManyRedirects.status_code(), 502);
        assert_eq!(UpstreamError::LoopDetected.status_code(), 502);
    }
}
