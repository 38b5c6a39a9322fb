//! Bandwidth throttling to simulate period-accurate connection speeds
//!
//! Response bodies are written in ~100 ms chunks with cooperative sleeps
//! between them, yielding the target byte rate without blocking the
//! scheduler. A dropped client connection surfaces as a write error and
//! aborts pacing immediately.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Cookie the header-bar speed selector writes
pub const SPEED_COOKIE: &str = "wayback_speed";

/// Chunks emitted per second while throttling
const CHUNKS_PER_SEC: u64 = 10;

/// Named connection-speed profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    /// 14.4 kbps modem, ~1800 bytes/sec
    Modem14_4,
    /// 28.8 kbps modem, ~3600 bytes/sec
    Modem28_8,
    /// 56 kbps modem, ~7000 bytes/sec
    Modem56,
    /// 128 kbps ISDN, ~16000 bytes/sec
    Isdn,
    /// Early DSL, ~128000 bytes/sec
    Dsl,
    /// No throttling
    Unlimited,
}

impl Speed {
    /// Every profile, slowest first (drives the selector dropdown)
    pub const ALL: [Speed; 6] = [
        Speed::Modem14_4,
        Speed::Modem28_8,
        Speed::Modem56,
        Speed::Isdn,
        Speed::Dsl,
        Speed::Unlimited,
    ];

    /// Parse a profile name as used in config, CLI, and the cookie
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "14.4k" => Some(Self::Modem14_4),
            "28.8k" => Some(Self::Modem28_8),
            "56k" => Some(Self::Modem56),
            "isdn" => Some(Self::Isdn),
            "dsl" => Some(Self::Dsl),
            "unlimited" => Some(Self::Unlimited),
            _ => None,
        }
    }

    /// Canonical profile name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Modem14_4 => "14.4k",
            Self::Modem28_8 => "28.8k",
            Self::Modem56 => "56k",
            Self::Isdn => "isdn",
            Self::Dsl => "dsl",
            Self::Unlimited => "unlimited",
        }
    }

    /// Target rate in bytes per second; `None` means unthrottled
    #[must_use]
    pub fn bytes_per_sec(self) -> Option<u64> {
        match self {
            Self::Modem14_4 => Some(1800),
            Self::Modem28_8 => Some(3600),
            Self::Modem56 => Some(7000),
            Self::Isdn => Some(16000),
            Self::Dsl => Some(128_000),
            Self::Unlimited => None,
        }
    }
}

impl std::fmt::Display for Speed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick the effective speed for a request.
///
/// The cookie only wins when the selector is enabled and its value names
/// a real profile; anything else falls back to the config default.
#[must_use]
pub fn effective_speed(cookie_header: Option<&str>, selector: bool, default: Speed) -> Speed {
    if !selector {
        return default;
    }
    let Some(cookies) = cookie_header else {
        return default;
    };
    for part in cookies.split(';') {
        if let Some((name, value)) = part.trim().split_once('=') {
            if name.trim() == SPEED_COOKIE {
                if let Some(speed) = Speed::from_name(value.trim()) {
                    return speed;
                }
            }
        }
    }
    default
}

/// Write `data` to the client, paced to the given speed.
///
/// Unlimited (or empty) writes go out in one shot. Throttled writes go
/// out in `rate / 10` byte chunks, each followed by a 100 ms sleep, so
/// N chunks take N ticks and the observed rate never exceeds the
/// target over any window.
pub async fn write_throttled<W>(writer: &mut W, data: &[u8], speed: Speed) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(bytes_per_sec) = speed.bytes_per_sec() else {
        writer.write_all(data).await?;
        return writer.flush().await;
    };
    if data.is_empty() {
        return writer.flush().await;
    }

    let chunk_size = std::cmp::max(1, (bytes_per_sec / CHUNKS_PER_SEC) as usize);
    let tick = Duration::from_millis(1000 / CHUNKS_PER_SEC);
    let mut offset = 0;
    while offset < data.len() {
        let end = std::cmp::min(offset + chunk_size, data.len());
        writer.write_all(&data[offset..end]).await?;
        writer.flush().await?;
        offset = end;
        tokio::time::sleep(tick).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_profile_rates() {
        assert_eq!(Speed::Modem14_4.bytes_per_sec(), Some(1800));
        assert_eq!(Speed::Modem28_8.bytes_per_sec(), Some(3600));
        assert_eq!(Speed::Modem56.bytes_per_sec(), Some(7000));
        assert_eq!(Speed::Isdn.bytes_per_sec(), Some(16000));
        assert_eq!(Speed::Dsl.bytes_per_sec(), Some(128_000));
        assert_eq!(Speed::Unlimited.bytes_per_sec(), None);
    }

    #[test]
    fn test_name_round_trip() {
        for speed in Speed::ALL {
            assert_eq!(Speed::from_name(speed.name()), Some(speed));
        }
        assert_eq!(Speed::from_name("300baud"), None);
        assert_eq!(Speed::from_name(""), None);
    }

    #[test]
    fn test_effective_speed_prefers_valid_cookie() {
        let cookie = Some("foo=1; wayback_speed=56k; bar=2");
        assert_eq!(effective_speed(cookie, true, Speed::Unlimited), Speed::Modem56);
    }

    #[test]
    fn test_effective_speed_ignores_cookie_when_selector_off() {
        let cookie = Some("wayback_speed=14.4k");
        assert_eq!(effective_speed(cookie, false, Speed::Dsl), Speed::Dsl);
    }

    #[test]
    fn test_effective_speed_rejects_bogus_cookie_value() {
        let cookie = Some("wayback_speed=warp9");
        assert_eq!(effective_speed(cookie, true, Speed::Isdn), Speed::Isdn);
    }

    #[test]
    fn test_effective_speed_no_cookie_header() {
        assert_eq!(effective_speed(None, true, Speed::Modem28_8), Speed::Modem28_8);
    }

    #[tokio::test]
    async fn test_unlimited_writes_everything_at_once() {
        let mut out = Vec::new();
        let data: Vec<u8> = (0u8..=255).collect();
        write_throttled(&mut out, &data, Speed::Unlimited).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_throttled_write_preserves_bytes() {
        let mut out = Vec::new();
        let data = vec![0xABu8; 5000];
        write_throttled(&mut out, &data, Speed::Modem56).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_throttled_write_paces_output() {
        // 1800 B/s profile, 900 bytes = 5 chunks of 180, one tick each:
        // 500 ms of pacing
        let mut out = Vec::new();
        let data = vec![1u8; 900];
        let started = Instant::now();
        write_throttled(&mut out, &data, Speed::Modem14_4).await.unwrap();
        let elapsed = started.elapsed();
        assert_eq!(out.len(), 900);
        assert!(elapsed >= Duration::from_millis(500), "too fast: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "too slow: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_empty_body_is_fine() {
        let mut out = Vec::new();
        write_throttled(&mut out, &[], Speed::Modem14_4).await.unwrap();
        assert!(out.is_empty());
    }
}
