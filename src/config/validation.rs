//! Configuration validation
//!
//! Runs after every load and reload; a config that fails here never
//! replaces the running one.

use anyhow::{bail, Result};
use time::{Date, Month};

use super::types::Config;
use crate::throttle::Speed;

/// Parse a YYYYMMDD string into a calendar date
#[must_use]
pub fn parse_yyyymmdd(s: &str) -> Option<Date> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u8 = s[4..6].parse().ok()?;
    let day: u8 = s[6..8].parse().ok()?;
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

/// Whole days between two YYYYMMDD dates (absolute)
#[must_use]
pub fn days_between(a: &str, b: &str) -> Option<u32> {
    let a = parse_yyyymmdd(a)?;
    let b = parse_yyyymmdd(b)?;
    Some(a.to_julian_day().abs_diff(b.to_julian_day()))
}

impl Config {
    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<()> {
        if parse_yyyymmdd(&self.proxy.target_date).is_none() {
            bail!(
                "proxy.target_date must be a valid YYYYMMDD date, got {:?}",
                self.proxy.target_date
            );
        }
        if self.proxy.port == 0 {
            bail!("proxy.port must be non-zero");
        }
        if Speed::from_name(&self.throttle.speed).is_none() {
            let names: Vec<&str> = Speed::ALL.iter().map(|s| s.name()).collect();
            bail!(
                "throttle.speed must be one of {}, got {:?}",
                names.join(", "),
                self.throttle.speed
            );
        }
        if self.crawler.concurrency == 0 {
            bail!("crawler.concurrency must be at least 1");
        }
        Ok(())
    }
}
