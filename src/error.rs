//! Error types for the proxy request pipeline
//!
//! Each variant maps to the HTTP status code the client receives, so the
//! connection handler can turn any pipeline failure into a themed error
//! page without inspecting error internals.

use std::io;

use thiserror::Error;

use crate::wayback::UpstreamError;

/// Errors that can occur while processing a single proxied request
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Allowlist mode is on and the URL matched no pattern
    #[error("URL is not in the allowlist: {0}")]
    AllowlistDenied(String),

    /// Malformed HTTP, or a non-absolute request URI on the proxy port
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Upstream archive failure (not archived, unreachable, timed out)
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Client connection I/O failure; the connection is simply closed
    #[error("client I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// HTTP status code sent to the client for this error
    ///
    /// `Io` never reaches the client (the transport is gone); 500 is a
    /// placeholder for logging paths.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AllowlistDenied(_) => 403,
            Self::BadRequest(_) => 400,
            Self::Upstream(e) => e.status_code(),
            Self::Io(_) => 500,
        }
    }
}
