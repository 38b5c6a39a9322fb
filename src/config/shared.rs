//! Live-reloadable configuration snapshot
//!
//! Single writer (the reload listener), many readers. Readers `load()` an
//! `Arc<Config>` snapshot and keep using it for the rest of their request;
//! a reload swaps the whole record in one atomic store. No field-by-field
//! mutation exists anywhere.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::types::Config;

/// Shared handle to the current configuration
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<ArcSwap<Config>>,
}

impl SharedConfig {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Snapshot the current config. In-flight requests hold their
    /// snapshot; new requests see the newest one.
    #[must_use]
    pub fn load(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Replace the config atomically
    pub fn store(&self, config: Config) {
        self.inner.store(Arc::new(config));
    }
}

impl std::fmt::Debug for SharedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConfig")
            .field("target_date", &self.load().proxy.target_date)
            .finish_non_exhaustive()
    }
}
