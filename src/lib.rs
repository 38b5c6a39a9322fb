//! # Wayback Cache Proxy
//!
//! An HTTP forward proxy that transparently serves historical snapshots of
//! the live web by mediating between a client browser and the Internet
//! Archive's Wayback Machine. For a configured target date, the proxy
//! accepts ordinary HTTP requests for arbitrary origin URLs, returns the
//! closest archived snapshot for that URL at that date, and caches
//! responses locally so an exhibition keeps working when the upstream
//! archive is unreachable.
//!
//! ## Architecture
//!
//! The proxy is organized into several modules for clean separation of
//! concerns:
//!
//! - **cache**: Two-tier (curated + hot) cache over Redis, plus view
//!   tracking, allowlist storage, and crawl bookkeeping
//! - **wayback**: Upstream client that resolves archive redirects to a
//!   terminal snapshot
//! - **transform**: Pure cleanup of Wayback artifacts in archived HTML/CSS
//! - **throttle**: Period-accurate bandwidth shaping of response bodies
//! - **header_bar**: The injected overlay shown on served pages
//! - **crawler**: Depth-bounded prefetch into the curated tier
//! - **admin**: The `/_admin/` management surface
//! - **server**: TCP accept side, HTTP parsing, and request dispatch
//! - **config**: Layered configuration (CLI > env > YAML) with live reload
//!
//! ## Design notes
//!
//! The proxy speaks plain HTTP/1.x on a raw TCP listener: forward-proxy
//! requests use the absolute-form request URI, and the admin surface and
//! landing page share the same port under reserved paths. Cached bodies
//! are stored content-decoded and transformed, so the post-cache stages
//! (header bar, throttle) stay tier-stable across config changes.

pub mod admin;
pub mod allowlist;
pub mod args;
pub mod cache;
pub mod config;
pub mod constants;
pub mod crawler;
pub mod error;
pub mod header_bar;
pub mod http;
pub mod logging;
pub mod pages;
pub mod reload;
pub mod server;
pub mod throttle;
pub mod transform;
pub mod wayback;

pub use cache::{Cache, CacheLookup, CacheTier, CachedResponse};
pub use config::{Config, SharedConfig};
pub use error::ProxyError;
pub use server::ProxyServer;
pub use throttle::Speed;
pub use wayback::{UpstreamError, WaybackClient};
