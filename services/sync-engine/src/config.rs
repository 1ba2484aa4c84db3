//! Configuration for the sync engine.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::client::RemoteConfig;
use crate::controller::ControllerConfig;
use crate::retry::{BackoffPolicy, RetryPolicy};

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the remote label service.
    pub remote_url: String,

    /// Number of physical spaces in the pool.
    pub total_spaces: u32,

    /// Articles requested per page during a full pull.
    pub page_size: u32,

    /// Data directory for local state.
    pub data_dir: String,

    /// Token expiry check interval in seconds.
    pub token_check_interval_secs: u64,

    /// Refresh the token when it expires within this many seconds.
    pub token_refresh_threshold_secs: u64,

    /// Periodic full pull interval in seconds (0 disables).
    pub sync_interval_secs: u64,

    /// Per-request HTTP timeout in seconds.
    pub http_timeout_secs: u64,

    /// Attempts per primary remote call, including the first.
    pub retry_attempts: u32,

    /// Article ids starting with this prefix are virtual pool slots.
    pub virtual_pool_prefix: String,

    /// Attribute keys blanked when a space is vacated.
    pub identifying_fields: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote_url: "http://127.0.0.1:9000".to_string(),
            total_spaces: 0,
            page_size: 100,
            data_dir: "/var/lib/slotsync".to_string(),
            token_check_interval_secs: 60,
            token_refresh_threshold_secs: 300,
            sync_interval_secs: 0,
            http_timeout_secs: 30,
            retry_attempts: 3,
            virtual_pool_prefix: "POOL-".to_string(),
            identifying_fields: vec!["name".to_string()],
            log_level: "info".to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let identifying_fields = std::env::var("SLOTSYNC_IDENTIFYING_FIELDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.identifying_fields);

        let config = Self {
            remote_url: std::env::var("SLOTSYNC_REMOTE_URL").unwrap_or(defaults.remote_url),
            total_spaces: env_or("SLOTSYNC_TOTAL_SPACES", defaults.total_spaces),
            page_size: env_or("SLOTSYNC_PAGE_SIZE", defaults.page_size),
            data_dir: std::env::var("SLOTSYNC_DATA_DIR").unwrap_or(defaults.data_dir),
            token_check_interval_secs: env_or(
                "SLOTSYNC_TOKEN_CHECK_INTERVAL",
                defaults.token_check_interval_secs,
            ),
            token_refresh_threshold_secs: env_or(
                "SLOTSYNC_TOKEN_REFRESH_THRESHOLD",
                defaults.token_refresh_threshold_secs,
            ),
            sync_interval_secs: env_or("SLOTSYNC_SYNC_INTERVAL", defaults.sync_interval_secs),
            http_timeout_secs: env_or("SLOTSYNC_HTTP_TIMEOUT", defaults.http_timeout_secs),
            retry_attempts: env_or("SLOTSYNC_RETRY_ATTEMPTS", defaults.retry_attempts),
            virtual_pool_prefix: std::env::var("SLOTSYNC_VIRTUAL_POOL_PREFIX")
                .unwrap_or(defaults.virtual_pool_prefix),
            identifying_fields,
            log_level: std::env::var("SLOTSYNC_LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("SLOTSYNC_PAGE_SIZE must be at least 1");
        }
        if self.retry_attempts == 0 {
            bail!("SLOTSYNC_RETRY_ATTEMPTS must be at least 1");
        }
        if self.token_check_interval_secs == 0 {
            bail!("SLOTSYNC_TOKEN_CHECK_INTERVAL must be at least 1 second");
        }
        Ok(())
    }

    /// Path of the SQLite state database.
    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("state.db")
    }

    pub fn token_check_interval(&self) -> Duration {
        Duration::from_secs(self.token_check_interval_secs)
    }

    pub fn token_refresh_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.token_refresh_threshold_secs).unwrap_or(i64::MAX))
    }

    /// Periodic pull interval, if enabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }

    pub fn remote(&self) -> RemoteConfig {
        RemoteConfig {
            base_url: self.remote_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            identifying_fields: self.identifying_fields.clone(),
        }
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            total_spaces: self.total_spaces,
            page_size: self.page_size,
            virtual_pool_prefix: self.virtual_pool_prefix.clone(),
            identifying_fields: self.identifying_fields.clone(),
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
                backoff: BackoffPolicy::default(),
            },
        }
    }
}
