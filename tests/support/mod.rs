//! Shared test harness: an in-process mock archive upstream, a proxy
//! instance bound to an ephemeral port, and a raw HTTP client.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use wayback_proxy::config::{Config, SharedConfig};
use wayback_proxy::ProxyServer;

/// One canned upstream response keyed by exact request path
#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Route {
    pub fn html(path: &str, body: &str) -> Self {
        Self {
            path: path.to_string(),
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/html; charset=utf-8".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn redirect(path: &str, location: &str) -> Self {
        Self {
            path: path.to_string(),
            status: 302,
            headers: vec![("Location".to_string(), location.to_string())],
            body: Vec::new(),
        }
    }
}

/// A fake archive that answers canned responses and counts hits
pub struct MockArchive {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl MockArchive {
    pub async fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let table: Arc<HashMap<String, Route>> = Arc::new(
            routes.into_iter().map(|r| (r.path.clone(), r)).collect(),
        );

        let hits_for_loop = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let table = Arc::clone(&table);
                let hits = Arc::clone(&hits_for_loop);
                tokio::spawn(async move {
                    let _ = serve_one(stream, &table, &hits).await;
                });
            }
        });

        Self { addr, hits }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve_one(
    stream: TcpStream,
    table: &HashMap<String, Route>,
    hits: &AtomicUsize,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    // Drain headers
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    hits.fetch_add(1, Ordering::SeqCst);

    let (status, headers, body) = match table.get(&path) {
        Some(route) => (route.status, route.headers.clone(), route.body.clone()),
        None => (404, Vec::new(), b"not archived".to_vec()),
    };

    let mut response = format!("HTTP/1.1 {status} Mock\r\n");
    for (name, value) in &headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!("Content-Length: {}\r\n", body.len()));
    response.push_str("Connection: close\r\n\r\n");
    write_half.write_all(response.as_bytes()).await?;
    write_half.write_all(&body).await?;
    write_half.flush().await?;
    Ok(())
}

/// Base config for tests: dead Redis (degraded mode), loopback bind
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.proxy.host = "127.0.0.1".to_string();
    config.cache.redis_url = "redis://127.0.0.1:1/0".to_string();
    config
}

/// Start a proxy on an ephemeral port and return its address
pub async fn spawn_proxy(config: Config) -> SocketAddr {
    let server = Arc::new(ProxyServer::new(SharedConfig::new(config)).expect("build proxy"));
    server.startup().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, peer)) = listener.accept().await else {
                break;
            };
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let _ = server.handle_client(stream, peer).await;
            });
        }
    });
    addr
}

/// A parsed raw HTTP response
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Send one raw request and read the connection to EOF
pub async fn send_request(addr: SocketAddr, raw: &str) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.expect("connect proxy");
    stream.write_all(raw.as_bytes()).await.expect("write request");

    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer).await.expect("read response");

    let split = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&buffer[..split]).into_owned();
    let body = buffer[split + 4..].to_vec();

    let mut lines = head.lines();
    let status_line = lines.next().expect("status line");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");
    let headers = lines
        .filter_map(|line| {
            line.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    RawResponse {
        status,
        headers,
        body,
    }
}

/// Convenience: absolute-form GET through the proxy
pub async fn proxy_get(addr: SocketAddr, url: &str) -> RawResponse {
    let host = url
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or("");
    let raw = format!("GET {url} HTTP/1.0\r\nHost: {host}\r\n\r\n");
    send_request(addr, &raw).await
}
