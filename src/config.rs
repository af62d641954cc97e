//! Configuration file support for approval-scanner.
//!
//! Loads optional TOML config from `~/.config/approval-scanner/config.toml`.
//! Every field is optional; command-line flags take precedence.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::fetcher::FetchConfig;
use crate::scan::ScanSettings;

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// EVM JSON-RPC URL
    pub rpc_url: Option<String>,
    /// Account whose approvals are scanned
    pub account: Option<String>,
    /// Days covered by one scan (default: 7)
    pub days_per_scan: Option<u32>,
    /// First `eth_getLogs` window size when no hint is cached (default: 5000)
    pub initial_window: Option<u64>,
    /// Smallest window before a rejected range is skipped (default: 256)
    pub min_window: Option<u64>,
    /// Retries per window on transient errors (default: 3)
    pub max_retries: Option<u32>,
    /// Linear backoff step in milliseconds (default: 250)
    pub backoff_base_ms: Option<u64>,
    /// Maximum random jitter added to each backoff in milliseconds (default: 150)
    pub backoff_jitter_ms: Option<u64>,
    /// Directory holding persisted scan caches
    pub cache_dir: Option<PathBuf>,
    /// Token metadata cache TTL in seconds (default: 3600)
    pub metadata_cache_ttl_seconds: Option<u64>,
    /// Maximum token metadata cache entries (default: 10000)
    pub metadata_cache_max_entries: Option<u64>,
    /// Interval between receipt polls in milliseconds (default: 1500)
    pub receipt_poll_ms: Option<u64>,
}

impl Config {
    /// Load config from the default path, falling back to defaults on any error.
    pub fn load() -> Self {
        let path = crate::config_dir().join("config.toml");
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let config = toml::from_str(content)?;
        tracing::info!("loaded config");
        Ok(config)
    }

    /// Scan settings with defaults applied.
    pub fn scan_settings(&self) -> ScanSettings {
        let defaults = FetchConfig::default();
        ScanSettings {
            days_per_scan: self
                .days_per_scan
                .unwrap_or(ScanSettings::default().days_per_scan),
            fetch: FetchConfig {
                initial_window: self.initial_window.unwrap_or(defaults.initial_window),
                min_window: self.min_window.unwrap_or(defaults.min_window).max(1),
                max_retries: self.max_retries.unwrap_or(defaults.max_retries),
                backoff_base: self
                    .backoff_base_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff_base),
                backoff_jitter: self
                    .backoff_jitter_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff_jitter),
            },
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(crate::cache_dir)
    }

    pub fn receipt_poll(&self) -> Duration {
        self.receipt_poll_ms
            .map(Duration::from_millis)
            .unwrap_or(crate::rpc::DEFAULT_RECEIPT_POLL)
    }

    pub fn metadata_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_cache_ttl_seconds.unwrap_or(3600))
    }

    pub fn metadata_cache_max_entries(&self) -> u64 {
        self.metadata_cache_max_entries.unwrap_or(10_000)
    }
}
