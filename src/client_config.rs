//! # Client Configuration Module
//!
//! This module defines configuration structures for the ZdravScan client,
//! including API endpoint settings, scan polling parameters, and retry settings.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

// Constants for client configuration
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024; // 10MB limit for image uploads

/// Polling configuration for asynchronous scan processing
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Delay before the first status query in milliseconds
    pub initial_delay_ms: u64,
    /// Interval between status queries in milliseconds
    pub interval_ms: u64,
    /// Maximum number of status queries before giving up
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2000, // 2 seconds
            interval_ms: 1000,      // 1 second
            max_attempts: 30,
        }
    }
}

impl PollConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Recovery configuration for transient failures of a single status query
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Retries for one status query after a transport error (0 = fail fast)
    pub poll_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_retries: 2,
            base_retry_delay_ms: 500,   // 0.5 seconds
            max_retry_delay_ms: 4000,   // 4 seconds
        }
    }
}

/// Configuration structure for the API client and scan workflow
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Backend base URL without trailing slash (e.g. "http://127.0.0.1:8000")
    pub api_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Maximum accepted upload size in bytes
    pub max_upload_size: u64,
    /// Directory holding persisted tokens
    pub data_dir: PathBuf,
    /// Scan polling settings
    pub poll: PollConfig,
    /// Per-poll retry settings
    pub recovery: RecoveryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_upload_size: MAX_UPLOAD_SIZE,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            poll: PollConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration pointing at the given backend
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Build configuration from `ZDRAVSCAN_*` environment variables.
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let poll = PollConfig {
            initial_delay_ms: env_or("ZDRAVSCAN_POLL_INITIAL_DELAY_MS", defaults.poll.initial_delay_ms),
            interval_ms: env_or("ZDRAVSCAN_POLL_INTERVAL_MS", defaults.poll.interval_ms),
            max_attempts: env_or("ZDRAVSCAN_POLL_MAX_ATTEMPTS", defaults.poll.max_attempts),
        };
        let recovery = RecoveryConfig {
            poll_retries: env_or("ZDRAVSCAN_POLL_RETRIES", defaults.recovery.poll_retries),
            ..defaults.recovery
        };

        Self {
            api_url: env::var("ZDRAVSCAN_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            request_timeout_secs: env_or("ZDRAVSCAN_REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            max_upload_size: env_or("ZDRAVSCAN_MAX_UPLOAD_SIZE", defaults.max_upload_size),
            data_dir: env::var("ZDRAVSCAN_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            poll,
            recovery,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
