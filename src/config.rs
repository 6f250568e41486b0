//! Runtime configuration with named defaults.
//!
//! Hosts pass JSON overrides through [`CoreConfig::from_json`]; native tools
//! read `BRANCHSCOPE_*` environment variables through [`CoreConfig::from_env`].
//! Missing fields fall back to the `DEFAULT_*` constants below.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use serde::{Deserialize, Serialize};

use crate::dom::SelectorPolicy;
use crate::error::CoreError;

pub const DEFAULT_BATCH_DELAY_MS: u64 = 50;
pub const DEFAULT_THROTTLE_MS: u64 = 100;

pub const DEFAULT_CLICK_DELAY_MS: u64 = 150;
pub const DEFAULT_SETTLE_MS: u64 = 300;
pub const DEFAULT_VALIDATION_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

pub const DEFAULT_PREFIX: &str = "branchscope_";
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 10_000;
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_STALE_AFTER_MS: i64 = 30 * 24 * 60 * 60 * 1_000;
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.25;

/// Read an environment variable, falling back to `default` when unset or
/// unparseable.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Debounce delay for deferred rescans.
    pub batch_delay_ms: u64,
    /// Minimum spacing between rescans.
    pub throttle_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { batch_delay_ms: DEFAULT_BATCH_DELAY_MS, throttle_ms: DEFAULT_THROTTLE_MS }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    pub click_delay_ms: u64,
    /// Grace period after the last click before the rescan.
    pub settle_ms: u64,
    /// How long to wait for the counter to move after one click.
    pub validation_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    /// Retry `n` waits `n * retry_backoff_ms` before re-clicking.
    pub retry_backoff_ms: u64,
    /// Allow wrapping past an endpoint when that path is shorter.
    pub allow_wrap: bool,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            click_delay_ms: DEFAULT_CLICK_DELAY_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            validation_timeout_ms: DEFAULT_VALIDATION_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            allow_wrap: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Key prefix shared by every record this crate writes.
    pub prefix: String,
    /// Serialized length above which whitespace compression applies.
    pub compression_threshold: usize,
    /// Total bytes under `prefix` before eviction kicks in.
    pub quota_bytes: usize,
    pub stale_after_ms: i64,
    /// Share of records deleted per eviction pass.
    pub eviction_fraction: f64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_owned(),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            quota_bytes: DEFAULT_QUOTA_BYTES,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub watcher: WatcherConfig,
    pub navigator: NavigatorConfig,
    pub persistence: PersistenceConfig,
    pub selectors: SelectorPolicy,
}

impl CoreConfig {
    /// Parse host-provided overrides. Absent sections keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults overridden by `BRANCHSCOPE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let w = &mut config.watcher;
        w.batch_delay_ms = env_parse("BRANCHSCOPE_BATCH_DELAY_MS", w.batch_delay_ms);
        w.throttle_ms = env_parse("BRANCHSCOPE_THROTTLE_MS", w.throttle_ms);

        let n = &mut config.navigator;
        n.click_delay_ms = env_parse("BRANCHSCOPE_CLICK_DELAY_MS", n.click_delay_ms);
        n.settle_ms = env_parse("BRANCHSCOPE_SETTLE_MS", n.settle_ms);
        n.validation_timeout_ms = env_parse("BRANCHSCOPE_VALIDATION_TIMEOUT_MS", n.validation_timeout_ms);
        n.poll_interval_ms = env_parse("BRANCHSCOPE_POLL_INTERVAL_MS", n.poll_interval_ms);
        n.max_retries = env_parse("BRANCHSCOPE_MAX_RETRIES", n.max_retries);
        n.retry_backoff_ms = env_parse("BRANCHSCOPE_RETRY_BACKOFF_MS", n.retry_backoff_ms);
        n.allow_wrap = env_parse("BRANCHSCOPE_ALLOW_WRAP", n.allow_wrap);

        let p = &mut config.persistence;
        if let Ok(prefix) = std::env::var("BRANCHSCOPE_PREFIX") {
            if !prefix.trim().is_empty() {
                p.prefix = prefix.trim().to_owned();
            }
        }
        p.compression_threshold = env_parse("BRANCHSCOPE_COMPRESSION_THRESHOLD", p.compression_threshold);
        p.quota_bytes = env_parse("BRANCHSCOPE_QUOTA_BYTES", p.quota_bytes);
        p.stale_after_ms = env_parse("BRANCHSCOPE_STALE_AFTER_MS", p.stale_after_ms);
        p.eviction_fraction = env_parse("BRANCHSCOPE_EVICTION_FRACTION", p.eviction_fraction);
        config
    }
}
