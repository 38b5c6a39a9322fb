//! Logging setup
//!
//! Proxy traffic is interesting twice: live on stdout while tending an
//! exhibition, and after the fact in `debug.log` when a visitor reports
//! a page that looked wrong. Both outputs are installed here and share
//! the `RUST_LOG` level.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Level filter from `RUST_LOG`, defaulting to `info`.
///
/// `EnvFilter` is not `Clone`, so each output layer builds its own.
fn level_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the stdout + `debug.log` subscriber for the process lifetime
pub fn init_dual_logging() {
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(".", "debug.log"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(level_filter()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(level_filter()),
        )
        .init();

    // The appender flushes from a worker thread only while the guard is
    // alive; this process logs until it exits, so the guard never drops
    std::mem::forget(guard);
}
