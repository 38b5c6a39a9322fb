//! Configuration module
//!
//! Layered configuration for the proxy: built-in defaults, then the YAML
//! config file, then environment variables, then CLI flags (highest
//! priority). The loaded record is immutable; live reload replaces the
//! whole snapshot through [`SharedConfig`].

mod defaults;
mod loading;
mod shared;
mod types;
pub mod validation;

pub use loading::{from_yaml, load_config};
pub use shared::SharedConfig;
pub use types::{
    AccessMode, AccessSection, AdminSection, BarPosition, CacheSection, Config, CrawlerSection,
    HeaderBarSection, LandingPageSection, ProxySection, ThrottleSection, TransformSection,
};
