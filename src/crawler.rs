//! Prefetch crawler
//!
//! Spiders the configured seed URLs through the archive and stores the
//! cleaned results in the **curated** tier, so an exhibition can run
//! fully offline. Breadth-first and depth-bounded: each seed carries a
//! depth, and only same-host references (`href`, `src`) discovered in
//! fetched HTML are followed while depth remains.
//!
//! A single crawl runs at a time. Workers pull from a shared frontier
//! under a semaphore; stop is cooperative (observed between fetches);
//! upstream throttling backs the pool off exponentially without failing
//! the run.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::cache::{normalize_url, now_unix, Cache, CacheLookup, CrawlState, CrawlStatus};
use crate::config::SharedConfig;
use crate::constants::crawl;
use crate::transform::ContentTransformer;
use crate::wayback::{UpstreamError, WaybackClient};

/// One frontier item: a URL, how deep we already are, how deep this
/// seed may go, and the host spidering is confined to
#[derive(Debug, Clone)]
struct FrontierItem {
    url: String,
    level: u32,
    max_depth: u32,
    seed_host: String,
}

/// Shared counters for a single crawl run
#[derive(Default)]
struct RunCounters {
    seen: AtomicU64,
    fetched: AtomicU64,
    failed: AtomicU64,
}

/// Background prefetch crawler (single instance per process)
pub struct Crawler {
    cache: Arc<Cache>,
    config: SharedConfig,
    stop_flag: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Crawler {
    #[must_use]
    pub fn new(cache: Arc<Cache>, config: SharedConfig) -> Self {
        Self {
            cache,
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Whether a crawl task is currently alive
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .expect("crawler handle lock poisoned")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Launch a crawl in the background. A no-op while one is running.
    ///
    /// `depth_override` replaces every seed's stored depth for this run.
    pub fn start(self: &Arc<Self>, depth_override: Option<u32>) {
        let mut handle = self.handle.lock().expect("crawler handle lock poisoned");
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            info!("Crawl already running, ignoring start request");
            return;
        }
        self.stop_flag.store(false, Ordering::SeqCst);
        let crawler = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            crawler.run(depth_override).await;
        }));
    }

    /// Request a cooperative stop: no new URLs are dequeued, in-flight
    /// fetches finish (bounded by the fetch timeout).
    pub async fn stop(&self) {
        if !self.is_running() {
            return;
        }
        info!("Crawl stop requested");
        self.stop_flag.store(true, Ordering::SeqCst);
        self.cache.set_crawl_state(CrawlState::Stopping).await;
    }

    /// Clear the hot tier, then start a fresh crawl
    pub async fn recrawl(self: &Arc<Self>) {
        self.cache.clear(crate::cache::CacheTier::Hot).await;
        self.start(None);
    }

    /// Current crawl status snapshot
    pub async fn status(&self) -> CrawlStatus {
        self.cache.crawl_status().await
    }

    /// Tail of the crawl log, newest first
    pub async fn log(&self, count: usize) -> Vec<String> {
        self.cache.crawl_log(count).await
    }

    /// Append a timestamped line to the crawl log ring
    async fn log_line(&self, message: &str) {
        info!("[crawl] {}", message);
        let now = time::OffsetDateTime::now_utc();
        let line = format!(
            "[{:02}:{:02}:{:02}] {}",
            now.hour(),
            now.minute(),
            now.second(),
            message
        );
        self.cache.append_crawl_log(&line).await;
    }

    fn stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Main crawl loop: seeds -> breadth-first frontier -> curated tier
    async fn run(self: Arc<Self>, depth_override: Option<u32>) {
        let seeds = self.cache.seeds().await;
        if seeds.is_empty() {
            self.log_line("No seeds configured, nothing to crawl.").await;
            return;
        }

        let config = self.config.load();
        let concurrency = config.crawler.concurrency;
        let max_urls = config.crawler.max_urls;
        let started_at = now_unix();

        let client = match WaybackClient::new(
            &config.proxy.archive_base_url,
            config.proxy.geocities_fix,
        ) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                self.log_line(&format!("Cannot build archive client: {e}")).await;
                return;
            }
        };

        let counters = Arc::new(RunCounters::default());
        let backoff_ms = Arc::new(AtomicU64::new(0));
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<FrontierItem> = VecDeque::new();
        for (url, depth) in &seeds {
            let seed_host = match host_of(url) {
                Some(host) => host,
                None => {
                    self.log_line(&format!("SKIP  {url}: not a valid http(s) URL"))
                        .await;
                    continue;
                }
            };
            queue.push_back(FrontierItem {
                url: url.clone(),
                level: 0,
                max_depth: depth_override.unwrap_or(*depth),
                seed_host,
            });
        }

        self.write_status(CrawlState::Running, started_at, &counters, 0, "")
            .await;
        self.log_line(&format!("Crawl started with {} seed(s)", seeds.len()))
            .await;

        let mut current_depth = 0;
        let mut capped = false;

        while !queue.is_empty() {
            if self.stopped() {
                self.log_line("Crawl stopped by request.").await;
                break;
            }

            // Drain a batch, deduplicating on normalized URLs
            let mut batch: Vec<FrontierItem> = Vec::new();
            while let Some(mut item) = queue.pop_front() {
                let normalized = normalize_url(&item.url);
                if !visited.insert(normalized.clone()) {
                    continue;
                }
                if max_urls > 0 && visited.len() > max_urls {
                    capped = true;
                    queue.clear();
                    break;
                }
                item.url = normalized;
                current_depth = current_depth.max(item.level);
                batch.push(item);
                if batch.len() >= concurrency * 2 {
                    break;
                }
            }
            if capped {
                self.log_line(&format!("Reached max_urls limit ({max_urls}), stopping."))
                    .await;
            }
            if batch.is_empty() {
                continue;
            }

            counters
                .seen
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            let first_url = batch[0].url.clone();
            self.write_status(
                CrawlState::Running,
                started_at,
                &counters,
                current_depth,
                &first_url,
            )
            .await;

            let mut tasks = Vec::with_capacity(batch.len());
            for item in batch {
                let crawler = Arc::clone(&self);
                let client = Arc::clone(&client);
                let semaphore = Arc::clone(&semaphore);
                let counters = Arc::clone(&counters);
                let backoff_ms = Arc::clone(&backoff_ms);
                tasks.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok()?;
                    crawler.process(item, &client, &counters, &backoff_ms).await
                }));
            }

            for task in tasks {
                let children = match task.await {
                    Ok(Some(children)) => children,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Crawl worker panicked: {}", e);
                        continue;
                    }
                };
                for child in children {
                    if !visited.contains(&normalize_url(&child.url)) {
                        queue.push_back(child);
                    }
                }
            }
        }

        self.write_status(CrawlState::Idle, started_at, &counters, current_depth, "")
            .await;
        self.log_line(&format!(
            "Crawl finished: {} fetched, {} failed, {} seen.",
            counters.fetched.load(Ordering::Relaxed),
            counters.failed.load(Ordering::Relaxed),
            counters.seen.load(Ordering::Relaxed),
        ))
        .await;
    }

    /// Fetch one URL into the curated tier; returns discovered children
    async fn process(
        &self,
        item: FrontierItem,
        client: &WaybackClient,
        counters: &RunCounters,
        backoff_ms: &AtomicU64,
    ) -> Option<Vec<FrontierItem>> {
        if self.stopped() {
            return None;
        }

        // Observe the shared backoff before touching the archive again
        let delay = backoff_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            if self.stopped() {
                return None;
            }
        }

        let config = self.config.load();

        // Already curated? Keep spidering its links without refetching.
        if let CacheLookup::Hit { response, tier } = self.cache.get(&item.url).await {
            if tier == crate::cache::CacheTier::Curated {
                self.log_line(&format!("SKIP  {} (already curated)", item.url))
                    .await;
                if item.level < item.max_depth && response.is_html() {
                    return Some(extract_children(
                        &response.body,
                        &item,
                        config.crawler.same_domain_only,
                    ));
                }
                return None;
            }
        }

        match client
            .fetch_snapshot(
                &item.url,
                &config.proxy.target_date,
                config.proxy.date_tolerance_days,
            )
            .await
        {
            Ok(response) => {
                backoff_ms.store(0, Ordering::Relaxed);

                if response.is_redirect() {
                    let location = response.header("location").unwrap_or("?");
                    self.log_line(&format!("REDIR {} -> {}", item.url, location))
                        .await;
                    return None;
                }

                let transformer: ContentTransformer = config.transform.transformer();
                let mut stored = response;
                stored.body = transformer.transform(&stored.body, &stored.content_type);
                self.cache.put_curated(&item.url, &stored).await;
                counters.fetched.fetch_add(1, Ordering::Relaxed);
                self.log_line(&format!("OK    {}", item.url)).await;

                if item.level < item.max_depth && stored.is_html() {
                    return Some(extract_children(
                        &stored.body,
                        &item,
                        config.crawler.same_domain_only,
                    ));
                }
                None
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                self.log_line(&format!("ERR   {}: {}", item.url, e)).await;
                if matches!(e, UpstreamError::Unavailable(_) | UpstreamError::Timeout) {
                    bump_backoff(backoff_ms);
                }
                None
            }
        }
    }

    async fn write_status(
        &self,
        state: CrawlState,
        started_at: u64,
        counters: &RunCounters,
        current_depth: u32,
        current_url: &str,
    ) {
        self.cache
            .set_crawl_status(&CrawlStatus {
                state,
                started_at,
                urls_seen: counters.seen.load(Ordering::Relaxed),
                urls_fetched: counters.fetched.load(Ordering::Relaxed),
                urls_failed: counters.failed.load(Ordering::Relaxed),
                current_depth,
                current_url: current_url.to_string(),
            })
            .await;
    }
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Double the shared backoff (1 s floor, 30 s ceiling)
fn bump_backoff(backoff_ms: &AtomicU64) {
    let current = backoff_ms.load(Ordering::Relaxed);
    let next = if current == 0 {
        crawl::BACKOFF_INITIAL.as_millis() as u64
    } else {
        (current * 2).min(crawl::BACKOFF_MAX.as_millis() as u64)
    };
    backoff_ms.store(next, Ordering::Relaxed);
}

/// Lowercased `scheme://host[:port]` key of a URL, if it is http(s)
fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    match parsed.port() {
        Some(port) => Some(format!("{}://{}:{}", parsed.scheme(), host, port)),
        None => Some(format!("{}://{}", parsed.scheme(), host)),
    }
}

/// Extract child frontier items from fetched HTML.
///
/// `<a href>` targets spider onward only on the seed's host (unless
/// `same_domain_only` is off); `src`/`link` assets are always confined to
/// the seed's host. Anchors, `javascript:`, `mailto:`, and `data:`
/// references are dropped.
fn extract_children(body: &[u8], item: &FrontierItem, same_domain_only: bool) -> Vec<FrontierItem> {
    let html = String::from_utf8_lossy(body);
    let base = match Url::parse(&item.url) {
        Ok(base) => base,
        Err(_) => return Vec::new(),
    };

    let document = Html::parse_document(&html);
    let anchors = Selector::parse("a[href]").expect("anchor selector");
    let assets = Selector::parse("img[src], script[src], link[href]").expect("asset selector");

    let mut seen = HashSet::new();
    let mut children = Vec::new();
    let mut push = |raw: &str, require_same_host: bool| {
        let Some(resolved) = resolve_reference(raw, &base) else {
            return;
        };
        let same_host = host_of(&resolved).as_deref() == Some(item.seed_host.as_str());
        if require_same_host && !same_host {
            return;
        }
        if seen.insert(resolved.clone()) {
            children.push(FrontierItem {
                url: resolved,
                level: item.level + 1,
                max_depth: item.max_depth,
                seed_host: item.seed_host.clone(),
            });
        }
    };

    for element in document.select(&anchors) {
        if let Some(href) = element.value().attr("href") {
            push(href, same_domain_only);
        }
    }
    for element in document.select(&assets) {
        let reference = element.value().attr("src").or_else(|| element.value().attr("href"));
        if let Some(reference) = reference {
            push(reference, true);
        }
    }

    children
}

/// Resolve a possibly-relative reference against a base, filtering junk
fn resolve_reference(raw: &str, base: &Url) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("data:")
    {
        return None;
    }
    let mut resolved = base.join(trimmed).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str, level: u32, max_depth: u32) -> FrontierItem {
        FrontierItem {
            url: url.to_string(),
            level,
            max_depth,
            seed_host: host_of(url).unwrap(),
        }
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("http://Example.COM/page"),
            Some("http://example.com".to_string())
        );
        assert_eq!(
            host_of("http://example.com:8080/x"),
            Some("http://example.com:8080".to_string())
        );
        assert_eq!(host_of("ftp://example.com/"), None);
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_extract_same_host_links_and_assets() {
        let html = br##"<html><body>
            <a href="/about.html">About</a>
            <a href="http://other.com/away">Away</a>
            <img src="logo.gif">
            <script src="http://cdn.other.com/lib.js"></script>
            <link rel="stylesheet" href="/style.css">
            <a href="#section">anchor</a>
            <a href="mailto:a@b.c">mail</a>
        </body></html>"##;
        let children = extract_children(html, &item("http://example.com/index.html", 0, 2), true);
        let urls: Vec<&str> = children.iter().map(|c| c.url.as_str()).collect();
        assert!(urls.contains(&"http://example.com/about.html"));
        assert!(urls.contains(&"http://example.com/logo.gif"));
        assert!(urls.contains(&"http://example.com/style.css"));
        // Off-host link and asset are dropped
        assert!(!urls.iter().any(|u| u.contains("other.com")));
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn test_extract_children_carry_incremented_level() {
        let html = br#"<a href="/next.html">n</a>"#;
        let children = extract_children(html, &item("http://example.com/", 1, 3), true);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].level, 2);
        assert_eq!(children[0].max_depth, 3);
        assert_eq!(children[0].seed_host, "http://example.com");
    }

    #[test]
    fn test_extract_cross_host_links_when_unrestricted() {
        let html = br#"<a href="http://other.com/page">x</a><img src="http://other.com/i.gif">"#;
        let children = extract_children(html, &item("http://example.com/", 0, 1), false);
        let urls: Vec<&str> = children.iter().map(|c| c.url.as_str()).collect();
        // Links may roam, assets stay on the seed host
        assert!(urls.contains(&"http://other.com/page"));
        assert!(!urls.contains(&"http://other.com/i.gif"));
    }

    #[test]
    fn test_extract_dedupes_references() {
        let html = br#"<a href="/a">1</a><a href="/a">2</a><img src="/a">"#;
        let children = extract_children(html, &item("http://example.com/", 0, 1), true);
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn test_resolve_reference_strips_fragment() {
        let base = Url::parse("http://example.com/dir/").unwrap();
        assert_eq!(
            resolve_reference("page.html#top", &base),
            Some("http://example.com/dir/page.html".to_string())
        );
    }

    #[test]
    fn test_bump_backoff_doubles_and_caps() {
        let cell = AtomicU64::new(0);
        bump_backoff(&cell);
        assert_eq!(cell.load(Ordering::Relaxed), 1000);
        bump_backoff(&cell);
        assert_eq!(cell.load(Ordering::Relaxed), 2000);
        bump_backoff(&cell);
        bump_backoff(&cell);
        bump_backoff(&cell);
        bump_backoff(&cell);
        assert_eq!(cell.load(Ordering::Relaxed), 30_000);
        bump_backoff(&cell);
        assert_eq!(cell.load(Ordering::Relaxed), 30_000);
    }

    #[tokio::test]
    async fn test_crawler_reports_not_running_initially() {
        let cache = Arc::new(Cache::new("redis://127.0.0.1:1/0", 0).unwrap());
        let crawler = Crawler::new(cache, SharedConfig::new(crate::config::Config::default()));
        assert!(!crawler.is_running());
        assert_eq!(crawler.status().await.state, CrawlState::Idle);
    }

    #[tokio::test]
    async fn test_crawl_with_no_seeds_finishes_immediately() {
        // Degraded cache -> no seeds -> run exits without touching upstream
        let cache = Arc::new(Cache::new("redis://127.0.0.1:1/0", 0).unwrap());
        let crawler = Arc::new(Crawler::new(
            cache,
            SharedConfig::new(crate::config::Config::default()),
        ));
        crawler.start(None);
        // The run task ends on its own; wait for it
        for _ in 0..50 {
            if !crawler.is_running() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!crawler.is_running());
    }
}
