//! Configuration types
//!
//! The YAML surface mirrors this structure one to one; every section
//! rejects unknown keys so a typo in `config.yaml` fails loudly at load
//! (or reload) time instead of silently doing nothing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::defaults;
use crate::throttle::Speed;
use crate::transform::ContentTransformer;

/// Main proxy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub proxy: ProxySection,
    pub cache: CacheSection,
    pub access: AccessSection,
    pub transform: TransformSection,
    pub header_bar: HeaderBarSection,
    pub throttle: ThrottleSection,
    pub admin: AdminSection,
    pub crawler: CrawlerSection,
    pub landing_page: LandingPageSection,

    /// Path of the YAML file this config came from; enables live reload
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Listener and archive settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ProxySection {
    pub host: String,
    pub port: u16,
    /// YYYYMMDD date the proxy replays
    pub target_date: String,
    /// How far a served snapshot may drift before a warning is logged
    pub date_tolerance_days: u32,
    /// Directory of themed error page templates (empty = built-in pages)
    pub error_pages_dir: String,
    /// Archive base URL (overridable for tests and mirrors)
    pub archive_base_url: String,
    /// Reroute dead GeoCities hosts through the OoCities mirror
    pub geocities_fix: bool,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            target_date: defaults::target_date(),
            date_tolerance_days: defaults::date_tolerance_days(),
            error_pages_dir: String::new(),
            archive_base_url: defaults::archive_base_url(),
            geocities_fix: defaults::geocities_fix(),
        }
    }
}

/// Redis cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct CacheSection {
    pub redis_url: String,
    /// Hot-tier lifetime in days; 0 disables the hot tier
    pub hot_ttl_days: u32,
}

impl CacheSection {
    /// Hot TTL in seconds, as the store consumes it
    #[must_use]
    pub fn hot_ttl_seconds(&self) -> u64 {
        u64::from(self.hot_ttl_days) * 86_400
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            redis_url: defaults::redis_url(),
            hot_ttl_days: defaults::hot_ttl_days(),
        }
    }
}

/// Access control mode
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    Open,
    Allowlist,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct AccessSection {
    pub mode: AccessMode,
}

/// Content transformation toggles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct TransformSection {
    pub remove_wayback_toolbar: bool,
    pub remove_wayback_scripts: bool,
    pub fix_base_tags: bool,
    pub fix_asset_urls: bool,
    pub normalize_links: bool,
}

impl TransformSection {
    /// Build the transformer these toggles describe
    #[must_use]
    pub fn transformer(&self) -> ContentTransformer {
        ContentTransformer {
            remove_toolbar: self.remove_wayback_toolbar,
            remove_scripts: self.remove_wayback_scripts,
            fix_base_tags: self.fix_base_tags,
            fix_asset_urls: self.fix_asset_urls,
            normalize_links: self.normalize_links,
        }
    }
}

impl Default for TransformSection {
    fn default() -> Self {
        Self {
            remove_wayback_toolbar: defaults::transform_flag(),
            remove_wayback_scripts: defaults::transform_flag(),
            fix_base_tags: defaults::transform_flag(),
            fix_asset_urls: defaults::transform_flag(),
            normalize_links: defaults::transform_flag(),
        }
    }
}

/// Where the header bar sits on the page
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BarPosition {
    #[default]
    Top,
    Bottom,
}

/// Header bar overlay settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct HeaderBarSection {
    pub enabled: bool,
    pub position: BarPosition,
    /// Branding text shown in the bar
    pub text: String,
}

/// Bandwidth throttle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ThrottleSection {
    /// Default speed profile name (`14.4k`, `56k`, `unlimited`, ...)
    pub speed: String,
    /// Let visitors pick a speed via the header-bar dropdown
    pub selector: bool,
}

impl ThrottleSection {
    /// The configured default speed; falls back to unlimited if the name
    /// is invalid (validation rejects that earlier)
    #[must_use]
    pub fn default_speed(&self) -> Speed {
        Speed::from_name(&self.speed).unwrap_or(Speed::Unlimited)
    }
}

impl Default for ThrottleSection {
    fn default() -> Self {
        Self {
            speed: defaults::speed(),
            selector: false,
        }
    }
}

/// Admin surface settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct AdminSection {
    pub enabled: bool,
    /// Basic-auth password; empty disables the surface entirely
    pub password: String,
}

/// Prefetch crawler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct CrawlerSection {
    /// Concurrent fetcher tasks
    pub concurrency: usize,
    /// Restrict `<a href>` spidering to the seed's host (assets always
    /// stay same-host per the frontier rules)
    pub same_domain_only: bool,
    /// Cap on URLs visited per run; 0 = unlimited
    pub max_urls: usize,
}

impl Default for CrawlerSection {
    fn default() -> Self {
        Self {
            concurrency: defaults::crawl_concurrency(),
            same_domain_only: defaults::crawl_same_domain_only(),
            max_urls: defaults::crawl_max_urls(),
        }
    }
}

/// Landing page settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct LandingPageSection {
    pub enabled: bool,
    pub most_viewed_count: usize,
}

impl Default for LandingPageSection {
    fn default() -> Self {
        Self {
            enabled: defaults::landing_enabled(),
            most_viewed_count: defaults::most_viewed_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.proxy.port, 8888);
        assert_eq!(config.proxy.target_date, "20010101");
        assert_eq!(config.cache.hot_ttl_days, 7);
        assert_eq!(config.cache.hot_ttl_seconds(), 604_800);
        assert_eq!(config.access.mode, AccessMode::Open);
        assert_eq!(config.throttle.default_speed(), Speed::Unlimited);
        assert_eq!(config.crawler.concurrency, 4);
        assert!(config.landing_page.enabled);
        assert!(!config.admin.enabled);
    }

    #[test]
    fn test_hot_ttl_zero_means_zero_seconds() {
        let section = CacheSection {
            hot_ttl_days: 0,
            ..CacheSection::default()
        };
        assert_eq!(section.hot_ttl_seconds(), 0);
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let yaml = "proxy:\n  port: 8888\nwarc_export:\n  enabled: true\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_unknown_section_key_rejected() {
        let yaml = "proxy:\n  port: 8888\n  bogus_key: 1\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "proxy:\n  target_date: \"19991231\"\nthrottle:\n  speed: 56k\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.proxy.target_date, "19991231");
        assert_eq!(config.proxy.port, 8888);
        assert_eq!(config.throttle.default_speed(), Speed::Modem56);
        assert!(!config.throttle.selector);
    }

    #[test]
    fn test_access_mode_parsing() {
        let config: Config = serde_yaml::from_str("access:\n  mode: allowlist\n").unwrap();
        assert_eq!(config.access.mode, AccessMode::Allowlist);
        assert!(serde_yaml::from_str::<Config>("access:\n  mode: denylist\n").is_err());
    }

    #[test]
    fn test_bar_position_parsing() {
        let config: Config =
            serde_yaml::from_str("header_bar:\n  enabled: true\n  position: bottom\n").unwrap();
        assert_eq!(config.header_bar.position, BarPosition::Bottom);
    }

    #[test]
    fn test_transform_section_builds_transformer() {
        let yaml = "transform:\n  remove_wayback_toolbar: false\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let transformer = config.transform.transformer();
        assert!(!transformer.remove_toolbar);
        assert!(transformer.fix_base_tags);
    }
}
