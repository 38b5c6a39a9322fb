//! Upstream Wayback Machine client

mod client;

pub use client::{UpstreamError, WaybackClient};
