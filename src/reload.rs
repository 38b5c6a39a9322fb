//! Live config reload listener
//!
//! When the proxy was started with a YAML config file, it subscribes to
//! the `wayback:config:reload` Redis channel. The external admin service
//! rewrites `config.yaml` and publishes a notification; on each message
//! the file is re-read, validated, and swapped in atomically. A config
//! that fails to parse or validate is discarded and the previous one
//! stays live.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use tracing::{info, warn};

use crate::config::{from_yaml, SharedConfig};
use crate::constants::RELOAD_CHANNEL;

/// Delay before re-subscribing after a dropped pub/sub connection
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Run the reload listener until the process exits.
///
/// A no-op when the running config has no file path (flags/env only:
/// nothing on disk to reload).
pub async fn run_reload_listener(config: SharedConfig) {
    let startup = config.load();
    let Some(path) = startup.config_path.clone() else {
        return;
    };
    let redis_url = startup.cache.redis_url.clone();

    loop {
        match listen(&redis_url, &path, &config).await {
            Ok(()) => {
                warn!("Config reload subscription ended, re-subscribing");
            }
            Err(e) => {
                warn!("Config reload listener error: {} (retrying)", e);
            }
        }
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}

/// Subscribe and apply reloads until the connection drops
async fn listen(redis_url: &str, path: &PathBuf, config: &SharedConfig) -> anyhow::Result<()> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(RELOAD_CHANNEL).await?;
    info!("Subscribed to {} for config reloads", RELOAD_CHANNEL);

    let mut messages = pubsub.on_message();
    while messages.next().await.is_some() {
        info!("Config reload signal received");
        apply_reload(path, config);
    }
    Ok(())
}

/// Re-read the YAML and swap it in; keep the old config on any failure
fn apply_reload(path: &PathBuf, config: &SharedConfig) {
    let loaded = from_yaml(path).and_then(|new_config| {
        new_config.validate()?;
        Ok(new_config)
    });
    match loaded {
        Ok(new_config) => {
            let old = config.load();
            if old.proxy.target_date != new_config.proxy.target_date {
                info!(
                    "Reloaded target_date: {} -> {}",
                    old.proxy.target_date, new_config.proxy.target_date
                );
            }
            if old.throttle.speed != new_config.throttle.speed {
                info!(
                    "Reloaded throttle speed: {} -> {}",
                    old.throttle.speed, new_config.throttle.speed
                );
            }
            config.store(new_config);
            info!("Config reloaded successfully");
        }
        Err(e) => {
            warn!("Config reload failed, keeping previous config: {}", e);
        }
    }
}
