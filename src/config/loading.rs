//! Configuration loading and layering
//!
//! Build order: defaults, then the YAML file (if given), then CLI flags
//! and their environment twins (clap folds env into the parsed args, so
//! CLI beats env per flag). The result is validated before use.

use std::path::Path;

use anyhow::Result;

use super::types::{AccessMode, Config};
use crate::args::Args;

/// Load a config from a YAML file, remembering the path for live reload
pub fn from_yaml(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
    let mut config: Config = serde_yaml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
    config.config_path = Some(path.to_path_buf());
    Ok(config)
}

/// Apply CLI/env overrides on top of a base config
fn apply_args(config: &mut Config, args: &Args) {
    if let Some(host) = &args.host {
        config.proxy.host = host.clone();
    }
    if let Some(port) = args.port {
        config.proxy.port = port;
    }
    if let Some(date) = &args.date {
        config.proxy.target_date = date.clone();
    }
    if let Some(redis) = &args.redis {
        config.cache.redis_url = redis.clone();
    }
    if let Some(speed) = &args.speed {
        config.throttle.speed = speed.clone();
    }
    if args.speed_selector {
        config.throttle.selector = true;
    }
    if args.header_bar {
        config.header_bar.enabled = true;
    }
    if let Some(position) = args.header_bar_position {
        config.header_bar.position = position;
    }
    if let Some(text) = &args.header_bar_text {
        config.header_bar.text = text.clone();
    }
    if args.admin {
        config.admin.enabled = true;
    }
    if let Some(password) = &args.admin_password {
        config.admin.password = password.clone();
    }
    if args.allowlist {
        config.access.mode = AccessMode::Allowlist;
    }
    if let Some(dir) = &args.error_pages {
        config.proxy.error_pages_dir = dir.display().to_string();
    }
    if args.no_landing_page {
        config.landing_page.enabled = false;
    }
}

/// Build the startup configuration from args (and the file they name)
pub fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => from_yaml(path)?,
        None => Config::default(),
    };
    apply_args(&mut config, args);
    config.validate()?;
    Ok(config)
}
