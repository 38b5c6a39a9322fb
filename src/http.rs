//! Minimal HTTP/1.x parsing and response writing
//!
//! The proxy speaks just enough HTTP for period-era browser traffic:
//! a request line, headers, and an optional Content-Length body. Chunked
//! request bodies, trailers, and upgrades are out of scope.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::limits;
use crate::error::ProxyError;

/// Hop-by-hop headers that must not be forwarded between connections
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

/// Check whether a header name is hop-by-hop (case-insensitive)
#[must_use]
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

/// A parsed client request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    /// Request target exactly as sent: absolute-form for proxy requests,
    /// origin-form for direct requests
    pub target: String,
    /// `true` for HTTP/1.1 requests (affects keep-alive default)
    pub http11: bool,
    /// Headers in receive order, names as sent
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// First header value matching `name`, case-insensitive
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the client asked to keep the connection open
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close`;
    /// HTTP/1.0 requires an explicit `Connection: keep-alive`.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.http11,
        }
    }

    /// Whether the request target is in absolute form (`http://host/path`).
    /// Scheme comparison is case-insensitive per RFC 3986.
    #[must_use]
    pub fn is_absolute_form(&self) -> bool {
        let target = self.target.as_bytes();
        target.len() > 7 && target[..7].eq_ignore_ascii_case(b"http://")
            || target.len() > 8 && target[..8].eq_ignore_ascii_case(b"https://")
    }
}

/// Read one request from the stream.
///
/// Returns `Ok(None)` on clean EOF before any bytes (client closed an
/// idle connection). Malformed input is a `BadRequest`; transport errors
/// surface as `ProxyError::Io`.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, ProxyError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if n > limits::MAX_REQUEST_LINE {
        return Err(ProxyError::BadRequest("request line too long".to_string()));
    }

    let request_line = line.trim_end();
    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(m), Some(t)) => (m.to_ascii_uppercase(), t.to_string()),
        _ => {
            return Err(ProxyError::BadRequest(format!(
                "malformed request line: {request_line:?}"
            )));
        }
    };
    let http11 = parts.next().map_or(false, |v| v == "HTTP/1.1");

    // Headers until the blank line
    let mut headers = Vec::new();
    loop {
        let mut header_line = String::new();
        let n = reader.read_line(&mut header_line).await?;
        if n == 0 {
            return Err(ProxyError::BadRequest(
                "connection closed mid-headers".to_string(),
            ));
        }
        let header_line = header_line.trim_end();
        if header_line.is_empty() {
            break;
        }
        if headers.len() >= limits::MAX_HEADERS {
            return Err(ProxyError::BadRequest("too many headers".to_string()));
        }
        // Skip malformed header lines rather than failing the request;
        // 1990s clients emit some strange ones
        if let Some((name, value)) = header_line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let mut request = Request {
        method,
        target,
        http11,
        headers,
        body: Vec::new(),
    };

    // Optional body, framed by Content-Length only
    if let Some(len) = request
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        if len > limits::MAX_BODY_SIZE {
            return Err(ProxyError::BadRequest("request body too large".to_string()));
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        request.body = body;
    }

    Ok(Some(request))
}

/// Standard reason phrase for a status code
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "OK",
    }
}

/// Write a response head: status line plus headers, terminated by CRLF.
///
/// `Content-Length` must be included in `headers` by the caller; the body
/// is written separately so the throttle stage can pace it.
pub async fn write_head<W>(
    writer: &mut W,
    status: u16,
    headers: &[(&str, &str)],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status));
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    writer.write_all(head.as_bytes()).await?;
    writer.flush().await
}

/// Write a complete non-throttled response (admin pages, errors, redirects)
pub async fn write_response<W>(
    writer: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
    extra_headers: &[(&str, &str)],
    keep_alive: bool,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let length = body.len().to_string();
    let connection = if keep_alive { "keep-alive" } else { "close" };
    let mut headers: Vec<(&str, &str)> = vec![
        ("Server", crate::constants::SERVER_NAME),
        ("Content-Type", content_type),
        ("Content-Length", &length),
        ("Connection", connection),
    ];
    headers.extend_from_slice(extra_headers);
    write_head(writer, status, &headers).await?;
    writer.write_all(body).await?;
    writer.flush().await
}
