//! Request pipeline and connection handling
//!
//! One task per accepted connection: parse the request, dispatch to the
//! admin surface, the landing page, or the forward-proxy path, and write
//! the shaped response back. Errors are caught at the connection boundary
//! and rendered as themed pages; nothing escapes to kill the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::admin::AdminHandler;
use crate::cache::{normalize_url, Cache, CacheLookup, CachedResponse};
use crate::config::SharedConfig;
use crate::constants::{timeout, ADMIN_PREFIX, SERVER_NAME};
use crate::crawler::Crawler;
use crate::error::ProxyError;
use crate::header_bar;
use crate::http::{self, Request};
use crate::pages::Pages;
use crate::throttle::{self, Speed};
use crate::wayback::WaybackClient;

/// The proxy server: owns the component graph behind the accept loop
pub struct ProxyServer {
    config: SharedConfig,
    cache: Arc<Cache>,
    crawler: Arc<Crawler>,
    admin: AdminHandler,
    wayback: WaybackClient,
    pages: Pages,
}

impl ProxyServer {
    /// Wire up the component graph from the startup configuration.
    ///
    /// The archive base URL and Redis URL are fixed for the process
    /// lifetime; dates, throttle, header bar, access mode, and admin
    /// password follow live reloads.
    pub fn new(config: SharedConfig) -> anyhow::Result<Self> {
        let startup = config.load();
        let cache = Arc::new(Cache::new(
            &startup.cache.redis_url,
            startup.cache.hot_ttl_seconds(),
        )?);
        let crawler = Arc::new(Crawler::new(Arc::clone(&cache), config.clone()));
        let admin = AdminHandler::new(Arc::clone(&cache), Arc::clone(&crawler), config.clone());
        let wayback = WaybackClient::new(&startup.proxy.archive_base_url, startup.proxy.geocities_fix)?;
        let pages = Pages::load(&startup.proxy.error_pages_dir);
        Ok(Self {
            config,
            cache,
            crawler,
            admin,
            wayback,
            pages,
        })
    }

    #[must_use]
    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn crawler(&self) -> Arc<Crawler> {
        Arc::clone(&self.crawler)
    }

    /// Connect the store and clear any crawl state a previous process
    /// left behind
    pub async fn startup(&self) {
        self.cache.connect().await;
        let status = self.cache.crawl_status().await;
        if status.state != crate::cache::CrawlState::Idle {
            info!("Resetting stale crawl state ({}) to idle", status.state.as_str());
            self.cache.set_crawl_state(crate::cache::CrawlState::Idle).await;
        }
    }

    /// Stop background work and give in-flight responses a grace window
    pub async fn graceful_shutdown(&self) {
        self.crawler.stop().await;
        tokio::time::sleep(timeout::SHUTDOWN_GRACE).await;
    }

    /// Serve one client connection until it closes or stops keeping alive
    pub async fn handle_client(&self, stream: TcpStream, addr: SocketAddr) -> anyhow::Result<()> {
        debug!("New client connection from {}", addr);
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            let request = match tokio::time::timeout(
                timeout::CLIENT_READ,
                http::read_request(&mut reader),
            )
            .await
            {
                Err(_) => {
                    debug!("Client {} idle past read timeout", addr);
                    break;
                }
                Ok(Ok(None)) => break,
                Ok(Ok(Some(request))) => request,
                Ok(Err(ProxyError::Io(e))) => {
                    debug!("Client {} read error: {}", addr, e);
                    break;
                }
                Ok(Err(e)) => {
                    self.write_error_page(&mut write_half, &e, "", false).await?;
                    break;
                }
            };

            let keep_alive = request.keep_alive();
            match self.handle_request(&request, &mut write_half).await {
                Ok(()) => {}
                Err(ProxyError::Io(e)) => {
                    debug!("Client {} write error: {}", addr, e);
                    break;
                }
                Err(e) => {
                    let url = if request.is_absolute_form() {
                        request.target.clone()
                    } else {
                        String::new()
                    };
                    self.write_error_page(&mut write_half, &e, &url, keep_alive)
                        .await?;
                }
            }
            if !keep_alive {
                break;
            }
        }

        let _ = write_half.shutdown().await;
        debug!("Connection closed for client {}", addr);
        Ok(())
    }

    /// Dispatch one parsed request
    async fn handle_request(
        &self,
        request: &Request,
        writer: &mut (impl tokio::io::AsyncWrite + Unpin),
    ) -> Result<(), ProxyError> {
        let config = self.config.load();

        // HTTPS interception is an extension point, not a feature
        if request.method == "CONNECT" {
            return self
                .write_simple_error(writer, 501, "CONNECT not implemented", request.keep_alive())
                .await;
        }

        // Admin surface: reserved origin-form path on the proxy's own host
        if config.admin.enabled
            && !request.is_absolute_form()
            && request.target.starts_with(ADMIN_PREFIX)
            && self.host_is_local(request, &config.proxy.host)
        {
            return self.serve_admin(request, writer).await;
        }

        // Landing page: the proxy's own root
        if config.landing_page.enabled && self.is_landing_request(request, &config.proxy.host) {
            return self.serve_landing(request, writer).await;
        }

        // Forward-proxy path
        let url = if request.is_absolute_form() {
            request.target.clone()
        } else {
            // Transparent mode: rebuild the URL from the Host header
            let host = request
                .header("host")
                .ok_or_else(|| ProxyError::BadRequest("Host header required".to_string()))?;
            format!("http://{}{}", host, request.target)
        };

        self.serve_proxied(request, writer, &url).await
    }

    /// Whether the Host header names this proxy instance.
    ///
    /// Matches loopback names, the bind host, and the literal wildcard
    /// bind address; a forwarded origin host never matches.
    fn host_is_local(&self, request: &Request, bind_host: &str) -> bool {
        let Some(host) = request.header("host") else {
            return false;
        };
        let name = host.split(':').next().unwrap_or(host);
        is_local_name(name, bind_host)
    }

    /// Whether this request is for the proxy's own landing page
    fn is_landing_request(&self, request: &Request, bind_host: &str) -> bool {
        if request.method != "GET" {
            return false;
        }
        if request.is_absolute_form() {
            // Explicit proxy request pointed at the proxy itself
            if let Ok(parsed) = url::Url::parse(&request.target) {
                let host_matches = parsed
                    .host_str()
                    .is_some_and(|h| is_local_name(h, bind_host));
                return host_matches && matches!(parsed.path(), "" | "/");
            }
            return false;
        }
        request.target == "/" && self.host_is_local(request, bind_host)
    }

    async fn serve_admin(
        &self,
        request: &Request,
        writer: &mut (impl tokio::io::AsyncWrite + Unpin),
    ) -> Result<(), ProxyError> {
        let response = self.admin.handle(request).await;
        let connection = if request.keep_alive() { "keep-alive" } else { "close" };
        let length = response.body.len().to_string();

        let mut headers: Vec<(&str, &str)> = vec![
            ("Server", SERVER_NAME),
            ("Content-Type", response.content_type),
            ("Content-Length", &length),
            ("Connection", connection),
        ];
        if let Some(location) = &response.location {
            headers.push(("Location", location.as_str()));
        }
        if response.authenticate {
            headers.push(("WWW-Authenticate", "Basic realm=\"Wayback Proxy Admin\""));
        }
        http::write_head(writer, response.status, &headers).await?;
        writer.write_all(&response.body).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn serve_landing(
        &self,
        request: &Request,
        writer: &mut (impl tokio::io::AsyncWrite + Unpin),
    ) -> Result<(), ProxyError> {
        let config = self.config.load();
        let most_viewed = self
            .cache
            .top_views(config.landing_page.most_viewed_count)
            .await;
        let body = self.pages.render_landing(
            &config.proxy.target_date,
            &most_viewed,
            config.throttle.default_speed(),
            &config.header_bar.text,
        );
        http::write_response(
            writer,
            200,
            "text/html; charset=utf-8",
            &body,
            &[],
            request.keep_alive(),
        )
        .await?;
        Ok(())
    }

    /// The forward-proxy path: allowlist gate, cache, upstream, shaping
    async fn serve_proxied(
        &self,
        request: &Request,
        writer: &mut (impl tokio::io::AsyncWrite + Unpin),
        raw_url: &str,
    ) -> Result<(), ProxyError> {
        let config = self.config.load();
        let url = normalize_url(raw_url);
        info!("{} {}", request.method, url);

        if config.access.mode == crate::config::AccessMode::Allowlist
            && !self.cache.allowlist_check(&url).await
        {
            info!("Blocked by allowlist: {}", url);
            return Err(ProxyError::AllowlistDenied(url));
        }

        let lookup = self.cache.get(&url).await;
        let x_cache = lookup.x_cache();
        let response = match lookup {
            CacheLookup::Hit { response, .. } => response,
            CacheLookup::Miss => {
                let fetched = self
                    .wayback
                    .fetch_snapshot(
                        &url,
                        &config.proxy.target_date,
                        config.proxy.date_tolerance_days,
                    )
                    .await?;

                if fetched.is_redirect() {
                    // The archive's snapshot is itself a redirect; relay
                    // it without caching
                    let location = fetched.header("location").unwrap_or("/").to_string();
                    return self
                        .write_redirect(writer, fetched.status_code, &location, request.keep_alive())
                        .await;
                }

                let transformer = config.transform.transformer();
                let mut stored = fetched;
                stored.body = transformer.transform(&stored.body, &stored.content_type);
                self.cache.put_hot(&url, &stored).await;
                stored
            }
        };

        if response.is_redirect() {
            let location = response.header("location").unwrap_or("/").to_string();
            return self
                .write_redirect(writer, response.status_code, &location, request.keep_alive())
                .await;
        }

        self.cache.track_view(&url).await;

        // Response shaping happens after the cache so cached bytes stay
        // tier-stable across config changes
        let speed = throttle::effective_speed(
            request.header("cookie"),
            config.throttle.selector,
            config.throttle.default_speed(),
        );

        let mut body = response.body.clone();
        if config.header_bar.enabled && response.is_html() {
            let bar = header_bar::render(
                &config.header_bar,
                &config.throttle,
                &response.source_url,
                &response.archive_date,
                speed,
            );
            body = crate::transform::inject_header_bar(&body, &bar);
        }

        self.write_shaped_response(writer, request, &response, &body, x_cache, speed)
            .await
    }

    /// Write status line, forwarded headers, and the throttled body
    async fn write_shaped_response(
        &self,
        writer: &mut (impl tokio::io::AsyncWrite + Unpin),
        request: &Request,
        response: &CachedResponse,
        body: &[u8],
        x_cache: &str,
        speed: Speed,
    ) -> Result<(), ProxyError> {
        let length = body.len().to_string();
        let connection = if request.keep_alive() { "keep-alive" } else { "close" };

        let mut headers: Vec<(&str, &str)> = vec![
            ("Server", SERVER_NAME),
            ("Content-Type", &response.content_type),
            ("Content-Length", &length),
            ("Connection", connection),
            ("X-Archive-Date", &response.archive_date),
            ("X-Cache", x_cache),
        ];
        // Forward the snapshot's own end-to-end headers, minus the ones
        // this proxy owns
        for (name, value) in &response.headers {
            if name.eq_ignore_ascii_case("content-type")
                || name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("content-encoding")
                || name.eq_ignore_ascii_case("server")
                || http::is_hop_by_hop(name)
            {
                continue;
            }
            headers.push((name.as_str(), value.as_str()));
        }

        http::write_head(writer, response.status_code, &headers).await?;
        throttle::write_throttled(writer, body, speed).await?;
        Ok(())
    }

    async fn write_redirect(
        &self,
        writer: &mut (impl tokio::io::AsyncWrite + Unpin),
        status: u16,
        location: &str,
        keep_alive: bool,
    ) -> Result<(), ProxyError> {
        let body = format!(
            "<html><body><p>Redirecting to <a href=\"{location}\">{location}</a></p></body></html>"
        );
        http::write_response(
            writer,
            status,
            "text/html; charset=utf-8",
            body.as_bytes(),
            &[("Location", location)],
            keep_alive,
        )
        .await?;
        Ok(())
    }

    /// Render a pipeline error as its themed page
    async fn write_error_page(
        &self,
        writer: &mut (impl tokio::io::AsyncWrite + Unpin),
        error: &ProxyError,
        url: &str,
        keep_alive: bool,
    ) -> anyhow::Result<()> {
        let status = error.status_code();
        match error {
            ProxyError::AllowlistDenied(_) => info!("{} -> {}", error, status),
            ProxyError::Upstream(e) if status == 404 => info!("{} ({})", e, url),
            _ => warn!("{} -> {}", error, status),
        }
        let body = self.pages.render_error(
            status,
            http::reason_phrase(status),
            url,
            &self.config.load().proxy.target_date,
        );
        http::write_response(
            writer,
            status,
            "text/html; charset=utf-8",
            &body,
            &[],
            keep_alive,
        )
        .await?;
        Ok(())
    }

    async fn write_simple_error(
        &self,
        writer: &mut (impl tokio::io::AsyncWrite + Unpin),
        status: u16,
        message: &str,
        keep_alive: bool,
    ) -> Result<(), ProxyError> {
        let body = self.pages.render_error(
            status,
            message,
            "",
            &self.config.load().proxy.target_date,
        );
        http::write_response(
            writer,
            status,
            "text/html; charset=utf-8",
            &body,
            &[],
            keep_alive,
        )
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer").finish_non_exhaustive()
    }
}

/// Hostnames that count as "this proxy" for admin/landing dispatch
fn is_local_name(name: &str, bind_host: &str) -> bool {
    name == "localhost" || name == "127.0.0.1" || name == bind_host
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn server_with(config: Config) -> ProxyServer {
        let mut config = config;
        // Point both stores at dead endpoints so tests never leave the
        // process
        config.cache.redis_url = "redis://127.0.0.1:1/0".to_string();
        ProxyServer::new(SharedConfig::new(config)).unwrap()
    }

    fn origin_request(target: &str, host: Option<&str>) -> Request {
        let mut headers = Vec::new();
        if let Some(host) = host {
            headers.push(("Host".to_string(), host.to_string()));
        }
        Request {
            method: "GET".to_string(),
            target: target.to_string(),
            http11: false,
            headers,
            body: Vec::new(),
        }
    }

    #[test]
    fn test_host_is_local() {
        let server = server_with(Config::default());
        assert!(server.host_is_local(&origin_request("/", Some("localhost:8888")), "0.0.0.0"));
        assert!(server.host_is_local(&origin_request("/", Some("127.0.0.1")), "0.0.0.0"));
        assert!(server.host_is_local(&origin_request("/", Some("0.0.0.0:8888")), "0.0.0.0"));
        // A forwarded origin host is never local, whatever the bind
        assert!(!server.host_is_local(&origin_request("/", Some("example.com")), "0.0.0.0"));
        assert!(!server.host_is_local(&origin_request("/", Some("example.com")), "10.0.0.5"));
        assert!(server.host_is_local(&origin_request("/", Some("10.0.0.5:8888")), "10.0.0.5"));
        assert!(!server.host_is_local(&origin_request("/", None), "10.0.0.5"));
    }

    #[test]
    fn test_landing_detection() {
        let server = server_with(Config::default());
        assert!(server.is_landing_request(&origin_request("/", Some("localhost")), "0.0.0.0"));
        assert!(!server.is_landing_request(&origin_request("/page", Some("localhost")), "0.0.0.0"));
        // Absolute form pointing at the proxy itself
        assert!(server.is_landing_request(
            &origin_request("http://localhost:8888/", Some("localhost:8888")),
            "0.0.0.0"
        ));
        assert!(!server.is_landing_request(
            &origin_request("http://example.com/", Some("example.com")),
            "0.0.0.0"
        ));
    }

    #[tokio::test]
    async fn test_bad_request_without_host() {
        let server = server_with(Config::default());
        let mut out = Vec::new();
        let request = Request {
            method: "GET".to_string(),
            target: "/page".to_string(),
            http11: false,
            headers: Vec::new(),
            body: Vec::new(),
        };
        let result = server.handle_request(&request, &mut out).await;
        assert!(matches!(result, Err(ProxyError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_connect_answers_501() {
        let server = server_with(Config::default());
        let mut out = Vec::new();
        let request = Request {
            method: "CONNECT".to_string(),
            target: "example.com:443".to_string(),
            http11: true,
            headers: Vec::new(),
            body: Vec::new(),
        };
        server.handle_request(&request, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 501 "));
    }

    #[tokio::test]
    async fn test_allowlist_mode_denies_before_upstream() {
        let mut config = Config::default();
        config.access.mode = crate::config::AccessMode::Allowlist;
        // Dead archive base URL: if the gate leaked, the fetch would
        // error differently than AllowlistDenied
        config.proxy.archive_base_url = "http://127.0.0.1:1".to_string();
        let server = server_with(config);

        let mut out = Vec::new();
        let request = origin_request("http://example.com/", Some("example.com"));
        let result = server.handle_request(&request, &mut out).await;
        assert!(matches!(result, Err(ProxyError::AllowlistDenied(_))));
    }

    #[tokio::test]
    async fn test_landing_page_serves_html() {
        let server = server_with(Config::default());
        let mut out = Vec::new();
        let request = origin_request("/", Some("localhost"));
        server.handle_request(&request, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Wayback Proxy"));
    }

    #[tokio::test]
    async fn test_admin_disabled_treats_path_as_transparent_proxy() {
        // Admin off: /_admin/ with a dead upstream becomes a proxy miss
        let mut config = Config::default();
        config.proxy.archive_base_url = "http://127.0.0.1:1".to_string();
        config.landing_page.enabled = false;
        let server = server_with(config);

        let mut out = Vec::new();
        let request = origin_request("/_admin/", Some("example.com"));
        let result = server.handle_request(&request, &mut out).await;
        assert!(matches!(result, Err(ProxyError::Upstream(_))));
    }
}
