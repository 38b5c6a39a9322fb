//! Admin surface mounted under `/_admin/`
//!
//! Serves the management dashboard and accepts crawl/cache actions,
//! protected by HTTP Basic auth. Handlers answer immediately; long
//! operations (crawling) are dispatched to the crawler task. The
//! dashboard is a single self-contained HTML page that polls
//! `status.json` over XHR.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use tracing::warn;

use crate::cache::{Cache, CacheTier};
use crate::config::SharedConfig;
use crate::crawler::Crawler;
use crate::http::Request;

/// Entries shown per page in the cache listing
const CACHE_PAGE_SIZE: usize = 50;
/// Upper bound on keys scanned for one listing request
const CACHE_SCAN_LIMIT: usize = 2000;
/// Log lines shown on the dashboard and `/log`
const LOG_TAIL: usize = 100;

/// Response produced by an admin handler
#[derive(Debug)]
pub struct AdminResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// Set on 303 redirects back to the dashboard
    pub location: Option<String>,
    /// Set on 401 challenges
    pub authenticate: bool,
}

impl AdminResponse {
    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            body: body.into_bytes(),
            location: None,
            authenticate: false,
        }
    }

    fn json(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.to_string().into_bytes(),
            location: None,
            authenticate: false,
        }
    }

    fn redirect(location: &str) -> Self {
        Self {
            status: 303,
            content_type: "text/html; charset=utf-8",
            body: Vec::new(),
            location: Some(location.to_string()),
            authenticate: false,
        }
    }

    fn unauthorized() -> Self {
        Self {
            status: 401,
            content_type: "text/html; charset=utf-8",
            body: b"<h1>401 Unauthorized</h1>".to_vec(),
            location: None,
            authenticate: true,
        }
    }
}

/// Handles `/_admin/*` requests
pub struct AdminHandler {
    cache: Arc<Cache>,
    crawler: Arc<Crawler>,
    config: SharedConfig,
}

impl AdminHandler {
    #[must_use]
    pub fn new(cache: Arc<Cache>, crawler: Arc<Crawler>, config: SharedConfig) -> Self {
        Self {
            cache,
            crawler,
            config,
        }
    }

    /// Check HTTP Basic credentials against the configured password
    fn authorized(&self, request: &Request, password: &str) -> bool {
        let Some(auth) = request.header("authorization") else {
            return false;
        };
        let Some(encoded) = auth.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64.decode(encoded.trim().as_bytes()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        // Credentials are "user:password"; only the password matters
        match decoded.split_once(':') {
            Some((_, candidate)) => candidate == password,
            None => false,
        }
    }

    /// Dispatch an admin request (auth already scoped to this prefix)
    pub async fn handle(&self, request: &Request) -> AdminResponse {
        let config = self.config.load();
        if config.admin.password.is_empty() {
            warn!("Admin surface requested but no admin password is configured; refusing");
            return AdminResponse::html(
                503,
                "<h1>503 Service Unavailable</h1><p>Admin surface disabled: no password configured.</p>".to_string(),
            );
        }
        if !self.authorized(request, &config.admin.password) {
            return AdminResponse::unauthorized();
        }

        let (path, query) = match request.target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (request.target.as_str(), ""),
        };

        match (request.method.as_str(), path) {
            ("GET", "/_admin" | "/_admin/") => self.dashboard().await,
            ("GET", "/_admin/status.json") => self.status_json().await,
            ("GET", "/_admin/log") => self.log_tail().await,
            ("GET", "/_admin/cache") => self.cache_listing(query).await,
            ("POST", "/_admin/seeds") => self.seeds_action(&request.body).await,
            ("POST", "/_admin/crawl/start") => {
                self.crawler.start(None);
                AdminResponse::redirect("/_admin/")
            }
            ("POST", "/_admin/crawl/stop") => {
                self.crawler.stop().await;
                AdminResponse::redirect("/_admin/")
            }
            ("POST", "/_admin/crawl/recrawl") => {
                self.crawler.recrawl().await;
                AdminResponse::redirect("/_admin/")
            }
            ("POST", "/_admin/cache/delete") => self.cache_delete(&request.body).await,
            ("POST", "/_admin/cache/clear") => self.cache_clear(&request.body).await,
            _ => AdminResponse::html(404, "<h1>404 Not Found</h1>".to_string()),
        }
    }

    // ── GET routes ───────────────────────────────────────────────────

    async fn status_json(&self) -> AdminResponse {
        let status = self.crawler.status().await;
        let stats = self.cache.stats().await;
        let seeds: Vec<_> = self
            .cache
            .seeds()
            .await
            .into_iter()
            .map(|(url, depth)| json!({"url": url, "depth": depth}))
            .collect();
        AdminResponse::json(json!({
            "crawl": status,
            "cache": stats,
            "seeds": seeds,
        }))
    }

    async fn log_tail(&self) -> AdminResponse {
        let lines = self.crawler.log(LOG_TAIL).await;
        AdminResponse {
            status: 200,
            content_type: "text/plain; charset=utf-8",
            body: lines.join("\n").into_bytes(),
            location: None,
            authenticate: false,
        }
    }

    async fn cache_listing(&self, query: &str) -> AdminResponse {
        let mut tier = CacheTier::Curated;
        let mut page = 1usize;
        let mut search = String::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "tier" => tier = CacheTier::from_name(&value).unwrap_or(CacheTier::Curated),
                "page" => page = value.parse().unwrap_or(1).max(1),
                "q" => search = value.to_string(),
                _ => {}
            }
        }

        let mut entries = self.cache.entries(tier, CACHE_SCAN_LIMIT).await;
        if !search.is_empty() {
            entries.retain(|e| e.url.contains(&search));
        }
        let total = entries.len();
        let pages = total.div_ceil(CACHE_PAGE_SIZE).max(1);
        let page = page.min(pages);
        let start = (page - 1) * CACHE_PAGE_SIZE;
        let slice = entries.iter().skip(start).take(CACHE_PAGE_SIZE);

        let mut rows = String::new();
        for entry in slice {
            rows.push_str(&format!(
                "<tr><td>{url}</td><td>{ct}</td><td align=\"right\">{size}</td>\
                 <td><form method=\"POST\" action=\"/_admin/cache/delete\" style=\"margin:0\">\
                 <input type=\"hidden\" name=\"url\" value=\"{url}\">\
                 <input type=\"hidden\" name=\"tier\" value=\"{tier}\">\
                 <input type=\"submit\" value=\"Delete\"></form></td></tr>\n",
                url = escape_html(&entry.url),
                ct = escape_html(&entry.content_type),
                size = entry.size,
                tier = tier,
            ));
        }
        if rows.is_empty() {
            rows = "<tr><td colspan=\"4\">No entries.</td></tr>".to_string();
        }

        let other_tier = match tier {
            CacheTier::Curated => CacheTier::Hot,
            CacheTier::Hot => CacheTier::Curated,
        };
        let nav = format!(
            "<p><a href=\"/_admin/cache?tier={other}\">Switch to {other} tier</a> &middot; \
             page {page} of {pages} ({total} entries) \
             <a href=\"/_admin/cache?tier={tier}&page={prev}&q={q}\">&laquo; prev</a> \
             <a href=\"/_admin/cache?tier={tier}&page={next}&q={q}\">next &raquo;</a></p>\
             <form method=\"GET\" action=\"/_admin/cache\">\
             <input type=\"hidden\" name=\"tier\" value=\"{tier}\">\
             <input type=\"text\" name=\"q\" value=\"{q}\" placeholder=\"search URL substring\">\
             <input type=\"submit\" value=\"Search\"></form>",
            other = other_tier,
            tier = tier,
            page = page,
            pages = pages,
            total = total,
            prev = page.saturating_sub(1).max(1),
            next = (page + 1).min(pages),
            q = escape_html(&search),
        );

        let body = format!(
            "{head}<h1>Cache ({tier})</h1>{nav}\
             <table border=\"1\" cellpadding=\"4\" cellspacing=\"0\">\
             <tr><th>URL</th><th>Type</th><th>Bytes</th><th></th></tr>\n{rows}</table>\
             <p><a href=\"/_admin/\">&laquo; back to dashboard</a></p></body></html>",
            head = page_head("Cache"),
            tier = tier,
            nav = nav,
            rows = rows,
        );
        AdminResponse::html(200, body)
    }

    async fn dashboard(&self) -> AdminResponse {
        let config = self.config.load();
        let seeds = self.cache.seeds().await;
        let status = self.crawler.status().await;
        let stats = self.cache.stats().await;
        let log_lines = self.crawler.log(LOG_TAIL).await;

        let mut seed_rows = String::new();
        for (url, depth) in &seeds {
            seed_rows.push_str(&format!(
                "<tr><td>{url}</td><td align=\"center\">{depth}</td>\
                 <td><form method=\"POST\" action=\"/_admin/seeds\" style=\"margin:0\">\
                 <input type=\"hidden\" name=\"action\" value=\"remove\">\
                 <input type=\"hidden\" name=\"url\" value=\"{url}\">\
                 <input type=\"submit\" value=\"Remove\"></form></td></tr>\n",
                url = escape_html(url),
                depth = depth,
            ));
        }
        if seed_rows.is_empty() {
            seed_rows = "<tr><td colspan=\"3\">No seeds configured.</td></tr>".to_string();
        }

        let crawl_buttons = if status.state == crate::cache::CrawlState::Running {
            "<form method=\"POST\" action=\"/_admin/crawl/stop\" style=\"display:inline\">\
             <input type=\"submit\" value=\"Stop Crawl\"></form>"
                .to_string()
        } else {
            "<form method=\"POST\" action=\"/_admin/crawl/start\" style=\"display:inline\">\
             <input type=\"submit\" value=\"Start Crawl\"></form> \
             <form method=\"POST\" action=\"/_admin/crawl/recrawl\" style=\"display:inline\">\
             <input type=\"submit\" value=\"Recrawl (clear hot)\"></form>"
                .to_string()
        };

        let body = format!(
            r#"{head}<h1>Wayback Proxy Admin</h1>
<p>Target date: <b>{date}</b> &middot; access: <b>{mode:?}</b> &middot; speed: <b>{speed}</b></p>

<h2>Crawl Seeds</h2>
<table border="1" cellpadding="4" cellspacing="0">
<tr><th>URL</th><th>Depth</th><th></th></tr>
<tbody id="seedRows">{seed_rows}</tbody>
</table>
<form method="POST" action="/_admin/seeds" style="margin-top:8px">
<input type="hidden" name="action" value="add">
<input type="text" name="url" size="50" placeholder="http://example.com/">
depth <input type="text" name="depth" size="3" value="1">
<input type="submit" value="Add Seed">
</form>

<h2>Crawl Status</h2>
<div id="crawlStatus">
<p>State: <b>{state}</b> &middot; seen {seen} &middot; fetched {fetched} &middot; failed {failed} &middot; depth {depth}</p>
<p>Current: <code>{current}</code></p>
</div>
{crawl_buttons}

<h2>Cache</h2>
<div id="cacheStatus">
<p>Curated: <b>{curated}</b> &middot; Hot: <b>{hot}</b> &middot; ~{bytes} bytes</p>
</div>
<p><a href="/_admin/cache?tier=curated">Browse curated</a> &middot; <a href="/_admin/cache?tier=hot">Browse hot</a></p>
<form method="POST" action="/_admin/cache/clear" style="display:inline">
<input type="hidden" name="tier" value="hot">
<input type="submit" value="Clear Hot Tier" onclick="return confirm('Clear all hot entries?')">
</form>

<h2>Crawl Log</h2>
<pre id="crawlLog">{log}</pre>

<script language="JavaScript">
<!--
function wbPoll(){{
  var xhr=null;
  if(window.XMLHttpRequest){{xhr=new XMLHttpRequest();}}
  else{{try{{xhr=new ActiveXObject("Microsoft.XMLHTTP");}}catch(e){{return;}}}}
  xhr.open("GET","/_admin/status.json",true);
  xhr.onreadystatechange=function(){{
    if(xhr.readyState!=4||xhr.status!=200)return;
    var s=eval("("+xhr.responseText+")");
    var el=document.getElementById("crawlStatus");
    if(el&&s.crawl){{
      el.innerHTML="<p>State: <b>"+s.crawl.state+"</b> &middot; seen "+s.crawl.urls_seen+
        " &middot; fetched "+s.crawl.urls_fetched+" &middot; failed "+s.crawl.urls_failed+
        " &middot; depth "+s.crawl.current_depth+"</p><p>Current: <code>"+s.crawl.current_url+"</code></p>";
    }}
    var c=document.getElementById("cacheStatus");
    if(c&&s.cache){{
      c.innerHTML="<p>Curated: <b>"+s.cache.curated_count+"</b> &middot; Hot: <b>"+s.cache.hot_count+
        "</b> &middot; ~"+s.cache.approx_bytes+" bytes</p>";
    }}
  }};
  xhr.send(null);
}}
window.setInterval(wbPoll,5000);
// -->
</script>
</body></html>"#,
            head = page_head("Wayback Proxy Admin"),
            date = escape_html(&config.proxy.target_date),
            mode = config.access.mode,
            speed = escape_html(&config.throttle.speed),
            seed_rows = seed_rows,
            state = status.state.as_str(),
            seen = status.urls_seen,
            fetched = status.urls_fetched,
            failed = status.urls_failed,
            depth = status.current_depth,
            current = escape_html(&status.current_url),
            crawl_buttons = crawl_buttons,
            curated = stats.curated_count,
            hot = stats.hot_count,
            bytes = stats.approx_bytes,
            log = escape_html(&log_lines.join("\n")),
        );
        AdminResponse::html(200, body)
    }

    // ── POST routes ──────────────────────────────────────────────────

    async fn seeds_action(&self, body: &[u8]) -> AdminResponse {
        let form = parse_form(body);
        let url = form_value(&form, "url").trim().to_string();
        if url.is_empty() {
            return AdminResponse::redirect("/_admin/");
        }
        match form_value(&form, "action") {
            "remove" => self.cache.remove_seed(&url).await,
            _ => {
                let depth: u32 = form_value(&form, "depth").parse().unwrap_or(1);
                self.cache.add_seed(&url, depth).await;
            }
        }
        AdminResponse::redirect("/_admin/")
    }

    async fn cache_delete(&self, body: &[u8]) -> AdminResponse {
        let form = parse_form(body);
        let url = form_value(&form, "url").trim().to_string();
        if !url.is_empty() {
            match CacheTier::from_name(form_value(&form, "tier")) {
                Some(tier) => self.cache.delete(&url, tier).await,
                None => {
                    // No tier given: remove the URL everywhere
                    self.cache.delete(&url, CacheTier::Curated).await;
                    self.cache.delete(&url, CacheTier::Hot).await;
                }
            }
        }
        AdminResponse::redirect("/_admin/")
    }

    async fn cache_clear(&self, body: &[u8]) -> AdminResponse {
        let form = parse_form(body);
        if let Some(tier) = CacheTier::from_name(form_value(&form, "tier")) {
            self.cache.clear(tier).await;
        }
        AdminResponse::redirect("/_admin/")
    }
}

impl std::fmt::Debug for AdminHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminHandler").finish_non_exhaustive()
    }
}

/// Shared dark-theme page head
fn page_head(title: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <style>body{{background:#0e0e1a;color:#e0e0e0;font-family:monospace;margin:20px}}\
         h1{{color:#c0c0ff}}h2{{color:#a0a0d0;margin-top:24px}}\
         table{{border-collapse:collapse}}th,td{{border:1px solid #404060;padding:4px 8px}}\
         th{{background:#1a1a2e}}a{{color:#8080ff}}\
         input[type=text]{{background:#12122a;color:#e0e0e0;border:1px solid #505070;padding:2px 6px}}\
         pre{{background:#0a0a16;border:1px solid #303050;padding:8px;max-height:300px;overflow:auto;font-size:12px}}\
         </style></head><body>"
    )
}

/// Parse an `application/x-www-form-urlencoded` body
fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// First form value for a key, or empty
fn form_value<'a>(form: &'a [(String, String)], key: &str) -> &'a str {
    form.iter()
        .find(|(k, _)| k == key)
        .map_or("", |(_, v)| v.as_str())
}

/// Minimal HTML escaping for values interpolated into admin pages
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn handler(password: &str) -> AdminHandler {
        let cache = Arc::new(Cache::new("redis://127.0.0.1:1/0", 0).unwrap());
        let mut config = Config::default();
        config.admin.enabled = true;
        config.admin.password = password.to_string();
        let shared = SharedConfig::new(config);
        let crawler = Arc::new(Crawler::new(Arc::clone(&cache), shared.clone()));
        AdminHandler::new(cache, crawler, shared)
    }

    fn request(method: &str, target: &str, auth: Option<&str>) -> Request {
        let mut headers = Vec::new();
        if let Some(password) = auth {
            let token = BASE64.encode(format!("admin:{password}"));
            headers.push(("Authorization".to_string(), format!("Basic {token}")));
        }
        Request {
            method: method.to_string(),
            target: target.to_string(),
            http11: true,
            headers,
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_no_password_refuses_surface() {
        let handler = handler("");
        let response = handler.handle(&request("GET", "/_admin/", None)).await;
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn test_missing_credentials_challenge() {
        let handler = handler("hunter2");
        let response = handler.handle(&request("GET", "/_admin/", None)).await;
        assert_eq!(response.status, 401);
        assert!(response.authenticate);
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let handler = handler("hunter2");
        let response = handler
            .handle(&request("GET", "/_admin/", Some("wrong")))
            .await;
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn test_dashboard_renders_with_valid_auth() {
        let handler = handler("hunter2");
        let response = handler
            .handle(&request("GET", "/_admin/", Some("hunter2")))
            .await;
        assert_eq!(response.status, 200);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("Wayback Proxy Admin"));
        assert!(body.contains("Crawl Seeds"));
        assert!(body.contains("status.json"));
    }

    #[tokio::test]
    async fn test_status_json_shape() {
        let handler = handler("hunter2");
        let response = handler
            .handle(&request("GET", "/_admin/status.json", Some("hunter2")))
            .await;
        assert_eq!(response.status, 200);
        let parsed: serde_json::Value =
            serde_json::from_slice(&response.body).expect("valid JSON");
        assert_eq!(parsed["crawl"]["state"], "idle");
        assert!(parsed["cache"]["curated_count"].is_u64());
        assert!(parsed["seeds"].is_array());
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let handler = handler("hunter2");
        let response = handler
            .handle(&request("GET", "/_admin/warp", Some("hunter2")))
            .await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_crawl_start_redirects_to_dashboard() {
        let handler = handler("hunter2");
        let response = handler
            .handle(&request("POST", "/_admin/crawl/start", Some("hunter2")))
            .await;
        assert_eq!(response.status, 303);
        assert_eq!(response.location.as_deref(), Some("/_admin/"));
    }

    #[tokio::test]
    async fn test_cache_listing_renders() {
        let handler = handler("hunter2");
        let response = handler
            .handle(&request(
                "GET",
                "/_admin/cache?tier=hot&page=1&q=example",
                Some("hunter2"),
            ))
            .await;
        assert_eq!(response.status, 200);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("Cache (hot)"));
    }

    #[test]
    fn test_parse_form_decodes_percent_encoding() {
        let form = parse_form(b"url=http%3A%2F%2Fexample.com%2F&depth=2");
        assert_eq!(form_value(&form, "url"), "http://example.com/");
        assert_eq!(form_value(&form, "depth"), "2");
        assert_eq!(form_value(&form, "missing"), "");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;"
        );
    }
}
