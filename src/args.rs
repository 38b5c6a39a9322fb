//! Command-line argument parsing
//!
//! Every flag has an environment-variable twin (the uppercased flag name
//! with `-` replaced by `_`), so container deployments can configure the
//! proxy without a command line. CLI beats env beats YAML.

use std::path::PathBuf;

use clap::Parser;

use crate::config::validation::parse_yyyymmdd;
use crate::config::BarPosition;
use crate::throttle::Speed;

/// Validate a YYYYMMDD date argument
fn parse_date(s: &str) -> Result<String, String> {
    parse_yyyymmdd(s)
        .map(|_| s.to_string())
        .ok_or_else(|| format!("invalid date '{s}', expected YYYYMMDD"))
}

/// Validate a speed profile name argument
fn parse_speed(s: &str) -> Result<String, String> {
    Speed::from_name(s).map(|_| s.to_string()).ok_or_else(|| {
        let names: Vec<&str> = Speed::ALL.iter().map(|sp| sp.name()).collect();
        format!("invalid speed '{s}', expected one of {}", names.join(", "))
    })
}

/// Parse a header-bar position argument
fn parse_position(s: &str) -> Result<BarPosition, String> {
    match s {
        "top" => Ok(BarPosition::Top),
        "bottom" => Ok(BarPosition::Bottom),
        _ => Err(format!("invalid position '{s}', expected top or bottom")),
    }
}

/// Command-line arguments
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "Wayback Machine caching HTTP proxy", long_about = None)]
pub struct Args {
    /// Path to YAML config file (enables live reload)
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Target date to replay (YYYYMMDD)
    #[arg(short, long, env = "TARGET_DATE", value_parser = parse_date)]
    pub date: Option<String>,

    /// Redis URL for the cache store
    #[arg(long, env = "REDIS_URL")]
    pub redis: Option<String>,

    /// Default throttle speed profile
    #[arg(long, env = "SPEED", value_parser = parse_speed)]
    pub speed: Option<String>,

    /// Let visitors pick a speed via the header-bar dropdown
    #[arg(long, env = "SPEED_SELECTOR")]
    pub speed_selector: bool,

    /// Enable the header bar overlay
    #[arg(long, env = "HEADER_BAR")]
    pub header_bar: bool,

    /// Header bar position (top or bottom)
    #[arg(long, env = "HEADER_BAR_POSITION", value_parser = parse_position)]
    pub header_bar_position: Option<BarPosition>,

    /// Branding text shown in the header bar
    #[arg(long, env = "HEADER_BAR_TEXT")]
    pub header_bar_text: Option<String>,

    /// Enable the admin interface at /_admin/
    #[arg(long, env = "ADMIN")]
    pub admin: bool,

    /// Password for admin Basic auth
    #[arg(long, env = "ADMIN_PASSWORD")]
    pub admin_password: Option<String>,

    /// Enable allowlist access mode
    #[arg(long, env = "ALLOWLIST")]
    pub allowlist: bool,

    /// Directory of themed error page templates
    #[arg(long = "error-pages", env = "ERROR_PAGES")]
    pub error_pages: Option<PathBuf>,

    /// Disable the landing page
    #[arg(long = "no-landing-page", env = "NO_LANDING_PAGE")]
    pub no_landing_page: bool,
}
