//! Coordinator configuration

use std::time::Duration;

use serde::Deserialize;

/// Split coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Shard header polling interval (seconds).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Keys migrated per page; the migration cursor is persisted after each
    /// page so a crash re-copies at most one page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Attempts to re-read and re-apply a split after losing a metadata
    /// race to another coordinator.
    #[serde(default = "default_apply_retry_limit")]
    pub apply_retry_limit: u32,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_page_size() -> usize {
    1000
}

fn default_apply_retry_limit() -> u32 {
    8
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            page_size: default_page_size(),
            apply_retry_limit: default_apply_retry_limit(),
        }
    }
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
