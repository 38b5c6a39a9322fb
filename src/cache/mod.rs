//! Two-tier response cache over Redis
//!
//! The store holds two tiers per URL: a permanent **curated** tier filled
//! by the crawler and admin actions, and a TTL-expiring **hot** tier
//! filled by the request pipeline. Reads consult curated before hot, so a
//! curated write never needs to evict a hot entry to win.
//!
//! Alongside the response tiers the same keyspace carries the allowlist
//! patterns, per-domain view counters, and crawl bookkeeping (seeds,
//! status, ring log), shared with the external admin service.
//!
//! ## Degraded mode
//!
//! If Redis is unreachable, reads return misses and writes drop with a
//! rate-limited warning; the request pipeline keeps serving uncached.
//! Reconnection is retried lazily on the next operation.

mod entry;
mod keys;

pub use entry::{now_unix, CacheLookup, CacheTier, CachedResponse};
pub use keys::{normalize_url, registrable_domain, url_hash};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::crawl;

/// Key holding allowlist glob patterns (set)
const ALLOWLIST_KEY: &str = "allowlist:urls";
/// Key holding per-domain view counts (sorted set)
const VIEWS_KEY: &str = "views:urls";
/// Key holding crawl seeds (hash url -> depth)
const SEEDS_KEY: &str = "crawl:seeds";
/// Key holding crawl status (hash)
const STATUS_KEY: &str = "crawl:status";
/// Key holding the crawl log ring (list, newest first)
const LOG_KEY: &str = "crawl:log";

/// Minimum spacing between reconnect attempts while degraded
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
/// Minimum spacing between unavailability warnings
const WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Aggregate cache statistics for the admin surface
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub curated_count: u64,
    pub hot_count: u64,
    pub approx_bytes: u64,
}

/// Crawler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlState {
    Idle,
    Running,
    Stopping,
}

impl CrawlState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

/// Crawl progress snapshot, mirrored in the `crawl:status` hash
#[derive(Debug, Clone, Serialize)]
pub struct CrawlStatus {
    pub state: CrawlState,
    pub started_at: u64,
    pub urls_seen: u64,
    pub urls_fetched: u64,
    pub urls_failed: u64,
    pub current_depth: u32,
    pub current_url: String,
}

impl Default for CrawlStatus {
    fn default() -> Self {
        Self {
            state: CrawlState::Idle,
            started_at: 0,
            urls_seen: 0,
            urls_fetched: 0,
            urls_failed: 0,
            current_depth: 0,
            current_url: String::new(),
        }
    }
}

/// One row of the admin cache listing
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntrySummary {
    pub url: String,
    pub content_type: String,
    pub stored_at: u64,
    pub size: u64,
}

/// Two-tier Redis-backed response cache
pub struct Cache {
    client: redis::Client,
    conn: tokio::sync::RwLock<Option<ConnectionManager>>,
    hot_ttl_seconds: u64,
    last_reconnect: Mutex<Option<Instant>>,
    last_warn: Mutex<Option<Instant>>,
}

impl Cache {
    /// Create a cache for the given Redis URL. Does not connect yet;
    /// call [`Cache::connect`] or let the first operation connect lazily.
    pub fn new(redis_url: &str, hot_ttl_seconds: u64) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| anyhow::anyhow!("Invalid Redis URL '{}': {}", redis_url, e))?;
        Ok(Self {
            client,
            conn: tokio::sync::RwLock::new(None),
            hot_ttl_seconds,
            last_reconnect: Mutex::new(None),
            last_warn: Mutex::new(None),
        })
    }

    /// Eagerly establish the connection, logging the outcome.
    ///
    /// Failure is not fatal: the proxy starts in degraded mode and
    /// reconnects once Redis comes back.
    pub async fn connect(&self) {
        match self.client.get_connection_manager().await {
            Ok(manager) => {
                info!("Connected to Redis at {:?}", self.client.get_connection_info().addr);
                *self.conn.write().await = Some(manager);
            }
            Err(e) => {
                warn!("Redis unavailable, starting in degraded (uncached) mode: {}", e);
            }
        }
    }

    /// Get a connection handle, retrying the connect at most every few
    /// seconds while the store is down.
    async fn conn(&self) -> Option<ConnectionManager> {
        if let Some(manager) = self.conn.read().await.as_ref() {
            return Some(manager.clone());
        }

        {
            let mut last = self.last_reconnect.lock().expect("reconnect clock poisoned");
            if let Some(at) = *last {
                if at.elapsed() < RECONNECT_INTERVAL {
                    return None;
                }
            }
            *last = Some(Instant::now());
        }

        match self.client.get_connection_manager().await {
            Ok(manager) => {
                info!("Redis connection re-established");
                *self.conn.write().await = Some(manager.clone());
                Some(manager)
            }
            Err(e) => {
                self.note_unavailable("connect", &e);
                None
            }
        }
    }

    /// Warn about store unavailability, rate-limited to once per minute
    fn note_unavailable(&self, operation: &str, err: &dyn std::fmt::Display) {
        let mut last = self.last_warn.lock().expect("warn clock poisoned");
        let due = last.map_or(true, |at| at.elapsed() >= WARN_INTERVAL);
        if due {
            warn!("Cache store unavailable ({}): {}", operation, err);
            *last = Some(Instant::now());
        } else {
            debug!("Cache store unavailable ({}): {}", operation, err);
        }
    }

    // ── response tiers ───────────────────────────────────────────────

    /// Look up a URL: curated first, then hot. Misses in degraded mode.
    pub async fn get(&self, url: &str) -> CacheLookup {
        let Some(mut conn) = self.conn().await else {
            return CacheLookup::Miss;
        };
        let hash = url_hash(url);

        for tier in [CacheTier::Curated, CacheTier::Hot] {
            let key = format!("{}{}", tier.prefix(), hash);
            let data: Option<String> = match conn.get(&key).await {
                Ok(d) => d,
                Err(e) => {
                    self.note_unavailable("get", &e);
                    return CacheLookup::Miss;
                }
            };
            if let Some(data) = data {
                match CachedResponse::from_envelope(&data) {
                    Ok(response) => {
                        debug!("Cache hit ({}): {}", tier, url);
                        return CacheLookup::Hit { response, tier };
                    }
                    Err(e) => {
                        // Unreadable entries are dropped so they stop
                        // shadowing a refetch
                        warn!("Discarding corrupt {} entry for {}: {}", tier, url, e);
                        let _: Result<(), _> = conn.del(&key).await;
                    }
                }
            }
        }

        debug!("Cache miss: {}", url);
        CacheLookup::Miss
    }

    /// Store into the hot tier with the configured TTL.
    ///
    /// A zero TTL disables the hot tier entirely (writes become no-ops).
    pub async fn put_hot(&self, url: &str, response: &CachedResponse) {
        if self.hot_ttl_seconds == 0 {
            debug!("Hot tier disabled (TTL 0), skipping store for {}", url);
            return;
        }
        let Some(mut conn) = self.conn().await else {
            return;
        };
        let key = format!("{}{}", CacheTier::Hot.prefix(), url_hash(url));
        let data = match response.to_envelope() {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to serialize cache entry for {}: {}", url, e);
                return;
            }
        };
        match conn.set_ex::<_, _, ()>(&key, data, self.hot_ttl_seconds).await {
            Ok(()) => debug!("Stored hot (TTL {}s): {}", self.hot_ttl_seconds, url),
            Err(e) => self.note_unavailable("put_hot", &e),
        }
    }

    /// Store into the curated tier (no expiry)
    pub async fn put_curated(&self, url: &str, response: &CachedResponse) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        let key = format!("{}{}", CacheTier::Curated.prefix(), url_hash(url));
        let data = match response.to_envelope() {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to serialize cache entry for {}: {}", url, e);
                return;
            }
        };
        match conn.set::<_, _, ()>(&key, data).await {
            Ok(()) => debug!("Stored curated: {}", url),
            Err(e) => self.note_unavailable("put_curated", &e),
        }
    }

    /// Delete one entry from one tier
    pub async fn delete(&self, url: &str, tier: CacheTier) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        let key = format!("{}{}", tier.prefix(), url_hash(url));
        if let Err(e) = conn.del::<_, ()>(&key).await {
            self.note_unavailable("delete", &e);
        }
    }

    /// Clear an entire tier; returns the number of deleted entries
    pub async fn clear(&self, tier: CacheTier) -> u64 {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        let keys = match self.scan_keys(&mut conn, tier.prefix(), usize::MAX).await {
            Ok(k) => k,
            Err(e) => {
                self.note_unavailable("clear", &e);
                return 0;
            }
        };
        if keys.is_empty() {
            return 0;
        }
        let deleted = keys.len() as u64;
        if let Err(e) = conn.del::<_, ()>(keys).await {
            self.note_unavailable("clear", &e);
            return 0;
        }
        info!("Cleared {} {} entries", deleted, tier);
        deleted
    }

    /// Collect keys matching `prefix*` via SCAN (bounded by `limit`)
    async fn scan_keys(
        &self,
        conn: &mut ConnectionManager,
        prefix: &str,
        limit: usize,
    ) -> redis::RedisResult<Vec<String>> {
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(&pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
            if keys.len() >= limit {
                break;
            }
        }
        Ok(keys)
    }

    /// Aggregate statistics (entry counts and approximate stored bytes)
    pub async fn stats(&self) -> CacheStats {
        let Some(mut conn) = self.conn().await else {
            return CacheStats::default();
        };
        let mut stats = CacheStats::default();
        for tier in [CacheTier::Curated, CacheTier::Hot] {
            let keys = match self.scan_keys(&mut conn, tier.prefix(), usize::MAX).await {
                Ok(k) => k,
                Err(e) => {
                    self.note_unavailable("stats", &e);
                    return stats;
                }
            };
            let count = keys.len() as u64;
            let mut bytes = 0u64;
            for key in keys {
                let len: u64 = redis::cmd("STRLEN")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .unwrap_or(0);
                bytes += len;
            }
            match tier {
                CacheTier::Curated => stats.curated_count = count,
                CacheTier::Hot => stats.hot_count = count,
            }
            stats.approx_bytes += bytes;
        }
        stats
    }

    /// List entries in a tier for the admin surface.
    ///
    /// Scans up to `scan_limit` keys and decodes each envelope far enough
    /// to show the source URL; fine at exhibition scale.
    pub async fn entries(&self, tier: CacheTier, scan_limit: usize) -> Vec<CacheEntrySummary> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        let keys = match self.scan_keys(&mut conn, tier.prefix(), scan_limit).await {
            Ok(k) => k,
            Err(e) => {
                self.note_unavailable("entries", &e);
                return Vec::new();
            }
        };
        let mut summaries = Vec::with_capacity(keys.len());
        for key in keys {
            let data: Option<String> = conn.get(&key).await.unwrap_or(None);
            let Some(data) = data else { continue };
            if let Ok(response) = CachedResponse::from_envelope(&data) {
                summaries.push(CacheEntrySummary {
                    url: response.source_url,
                    content_type: response.content_type,
                    stored_at: response.stored_at,
                    size: response.body.len() as u64,
                });
            }
        }
        summaries.sort_by(|a, b| a.url.cmp(&b.url));
        summaries
    }

    // ── views ────────────────────────────────────────────────────────

    /// Bump the view counter for the URL's registrable domain
    pub async fn track_view(&self, url: &str) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        let domain = registrable_domain(url);
        if let Err(e) = conn.zincr::<_, _, _, ()>(VIEWS_KEY, &domain, 1).await {
            self.note_unavailable("track_view", &e);
        }
    }

    /// Top viewed domains, most viewed first
    pub async fn top_views(&self, n: usize) -> Vec<(String, u64)> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        let stop = n.saturating_sub(1) as isize;
        let rows: Vec<(String, f64)> = match conn.zrevrange_withscores(VIEWS_KEY, 0, stop).await {
            Ok(r) => r,
            Err(e) => {
                self.note_unavailable("top_views", &e);
                return Vec::new();
            }
        };
        rows.into_iter()
            .map(|(domain, score)| (domain, score as u64))
            .collect()
    }

    // ── allowlist ────────────────────────────────────────────────────

    /// Current allowlist glob patterns
    pub async fn allowlist_patterns(&self) -> Vec<String> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        match conn.smembers(ALLOWLIST_KEY).await {
            Ok(patterns) => patterns,
            Err(e) => {
                self.note_unavailable("allowlist", &e);
                Vec::new()
            }
        }
    }

    /// Replace the allowlist patterns wholesale
    pub async fn allowlist_set(&self, patterns: &[String]) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.del::<_, ()>(ALLOWLIST_KEY).await {
            self.note_unavailable("allowlist_set", &e);
            return;
        }
        if patterns.is_empty() {
            return;
        }
        if let Err(e) = conn.sadd::<_, _, ()>(ALLOWLIST_KEY, patterns).await {
            self.note_unavailable("allowlist_set", &e);
        }
    }

    /// Whether the URL matches any allowlist pattern.
    ///
    /// An empty (or unreachable) allowlist denies everything, so a Redis
    /// outage fails closed in allowlist mode.
    pub async fn allowlist_check(&self, url: &str) -> bool {
        let patterns = self.allowlist_patterns().await;
        crate::allowlist::Allowlist::new(&patterns).matches(url)
    }

    // ── crawl seeds ──────────────────────────────────────────────────

    /// Add or update a seed URL with its crawl depth
    pub async fn add_seed(&self, url: &str, depth: u32) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.hset::<_, _, _, ()>(SEEDS_KEY, url, depth.to_string()).await {
            self.note_unavailable("add_seed", &e);
        }
    }

    /// Remove a seed URL
    pub async fn remove_seed(&self, url: &str) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.hdel::<_, _, ()>(SEEDS_KEY, url).await {
            self.note_unavailable("remove_seed", &e);
        }
    }

    /// All seeds as `(url, depth)` pairs
    pub async fn seeds(&self) -> Vec<(String, u32)> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        let raw: HashMap<String, String> = match conn.hgetall(SEEDS_KEY).await {
            Ok(r) => r,
            Err(e) => {
                self.note_unavailable("seeds", &e);
                return Vec::new();
            }
        };
        let mut seeds: Vec<(String, u32)> = raw
            .into_iter()
            .map(|(url, depth)| (url, depth.parse().unwrap_or(0)))
            .collect();
        seeds.sort();
        seeds
    }

    // ── crawl status ─────────────────────────────────────────────────

    /// Read the crawl status hash (defaults when absent or unreachable)
    pub async fn crawl_status(&self) -> CrawlStatus {
        let Some(mut conn) = self.conn().await else {
            return CrawlStatus::default();
        };
        let raw: HashMap<String, String> = match conn.hgetall(STATUS_KEY).await {
            Ok(r) => r,
            Err(e) => {
                self.note_unavailable("crawl_status", &e);
                return CrawlStatus::default();
            }
        };
        let field = |name: &str| raw.get(name).cloned().unwrap_or_default();
        CrawlStatus {
            state: CrawlState::from_str(&field("state")),
            started_at: field("started_at").parse().unwrap_or(0),
            urls_seen: field("urls_seen").parse().unwrap_or(0),
            urls_fetched: field("urls_fetched").parse().unwrap_or(0),
            urls_failed: field("urls_failed").parse().unwrap_or(0),
            current_depth: field("current_depth").parse().unwrap_or(0),
            current_url: field("current_url"),
        }
    }

    /// Write the full crawl status hash
    pub async fn set_crawl_status(&self, status: &CrawlStatus) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        let fields: [(&str, String); 7] = [
            ("state", status.state.as_str().to_string()),
            ("started_at", status.started_at.to_string()),
            ("urls_seen", status.urls_seen.to_string()),
            ("urls_fetched", status.urls_fetched.to_string()),
            ("urls_failed", status.urls_failed.to_string()),
            ("current_depth", status.current_depth.to_string()),
            ("current_url", status.current_url.clone()),
        ];
        if let Err(e) = conn.hset_multiple::<_, _, _, ()>(STATUS_KEY, &fields).await {
            self.note_unavailable("set_crawl_status", &e);
        }
    }

    /// Update just the state field, leaving counters untouched
    pub async fn set_crawl_state(&self, state: CrawlState) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.hset::<_, _, _, ()>(STATUS_KEY, "state", state.as_str()).await {
            self.note_unavailable("set_crawl_state", &e);
        }
    }

    // ── crawl log ────────────────────────────────────────────────────

    /// Append a log line, keeping only the newest entries
    pub async fn append_crawl_log(&self, line: &str) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.lpush::<_, _, ()>(LOG_KEY, line).await {
            self.note_unavailable("crawl_log", &e);
            return;
        }
        let _: Result<(), _> = conn.ltrim(LOG_KEY, 0, crawl::LOG_MAX as isize - 1).await;
    }

    /// Most recent log lines, newest first
    pub async fn crawl_log(&self, count: usize) -> Vec<String> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        let stop = count.saturating_sub(1) as isize;
        match conn.lrange(LOG_KEY, 0, stop).await {
            Ok(lines) => lines,
            Err(e) => {
                self.note_unavailable("crawl_log", &e);
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("hot_ttl_seconds", &self.hot_ttl_seconds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_url() {
        assert!(Cache::new("not a redis url", 60).is_err());
        assert!(Cache::new("redis://localhost:6379/0", 60).is_ok());
    }

    #[tokio::test]
    async fn test_degraded_mode_reads_miss_and_writes_drop() {
        // Port 1 is never a Redis server; everything must fail soft
        let cache = Cache::new("redis://127.0.0.1:1/0", 60).unwrap();
        cache.connect().await;

        assert!(matches!(cache.get("http://example.com/").await, CacheLookup::Miss));

        let response = CachedResponse {
            status_code: 200,
            headers: vec![],
            body: b"x".to_vec(),
            content_type: "text/plain".to_string(),
            stored_at: now_unix(),
            source_url: "http://example.com/".to_string(),
            archive_date: "20010915".to_string(),
        };
        cache.put_hot("http://example.com/", &response).await;
        cache.put_curated("http://example.com/", &response).await;
        assert!(matches!(cache.get("http://example.com/").await, CacheLookup::Miss));

        let stats = cache.stats().await;
        assert_eq!(stats.curated_count, 0);
        assert_eq!(stats.hot_count, 0);
        assert!(cache.seeds().await.is_empty());
        assert_eq!(cache.crawl_status().await.state, CrawlState::Idle);
    }

    #[tokio::test]
    async fn test_degraded_allowlist_denies() {
        let cache = Cache::new("redis://127.0.0.1:1/0", 60).unwrap();
        assert!(!cache.allowlist_check("http://example.com/").await);
    }

    #[test]
    fn test_crawl_state_round_trip() {
        for state in [CrawlState::Idle, CrawlState::Running, CrawlState::Stopping] {
            assert_eq!(CrawlState::from_str(state.as_str()), state);
        }
        assert_eq!(CrawlState::from_str("nonsense"), CrawlState::Idle);
    }
}
