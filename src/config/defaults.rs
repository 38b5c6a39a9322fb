//! Default values for configuration fields
//!
//! Kept as functions so serde `#[serde(default = ...)]` and
//! `Default` impls share a single source of truth.

use crate::constants::upstream;

pub fn host() -> String {
    "0.0.0.0".to_string()
}

pub fn port() -> u16 {
    8888
}

pub fn target_date() -> String {
    "20010101".to_string()
}

pub fn date_tolerance_days() -> u32 {
    365
}

pub fn archive_base_url() -> String {
    upstream::DEFAULT_BASE_URL.to_string()
}

pub fn geocities_fix() -> bool {
    true
}

pub fn redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

pub fn hot_ttl_days() -> u32 {
    7
}

pub fn transform_flag() -> bool {
    true
}

pub fn speed() -> String {
    "unlimited".to_string()
}

pub fn crawl_concurrency() -> usize {
    4
}

pub fn crawl_same_domain_only() -> bool {
    true
}

pub fn crawl_max_urls() -> usize {
    10_000
}

pub fn landing_enabled() -> bool {
    true
}

pub fn most_viewed_count() -> usize {
    10
}
