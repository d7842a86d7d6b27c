//! Relayer configuration

use eyre::{eyre, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use starkbridge_rs::DevnetConfig;

use crate::retry::RetryConfig;

const DEFAULT_STATE_DIR: &str = ".starkbridge";

/// Relayer configuration
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    /// Directory holding the persisted L1 and L2 state
    pub state_dir: PathBuf,

    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Submit attempts for transient failures, and polls before a
    /// permanently failing message is dead-lettered
    pub max_retries: u32,
    /// Backoff before the first retry, doubled per attempt
    pub initial_backoff_ms: u64,

    /// Max handled message hashes remembered (default 100000)
    pub cache_max_size: usize,
    /// Seconds a handled hash is remembered (default 86400)
    pub cache_ttl_secs: u64,

    /// Execute L1 -> L2 messages during devnet flush
    pub auto_settle_l1_to_l2: bool,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            poll_interval_ms: 1000,
            max_retries: 5,
            initial_backoff_ms: 200,
            cache_max_size: 100_000,
            cache_ttl_secs: 86400,
            auto_settle_l1_to_l2: true,
        }
    }
}

impl RelayerConfig {
    /// Load configuration from environment
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded .env from {:?}", path);
        }

        let defaults = Self::default();

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);

        let poll_interval_ms = env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.poll_interval_ms);

        let max_retries = env::var("MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_retries);

        let initial_backoff_ms = env::var("INITIAL_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.initial_backoff_ms);

        let cache_max_size = env::var("CACHE_MAX_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.cache_max_size);

        let cache_ttl_secs = env::var("CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.cache_ttl_secs);

        let auto_settle_l1_to_l2 = env::var("AUTO_SETTLE_L1_TO_L2")
            .ok()
            .map(|v| parse_flag(&v))
            .transpose()?
            .unwrap_or(defaults.auto_settle_l1_to_l2);

        let config = Self {
            state_dir,
            poll_interval_ms,
            max_retries,
            initial_backoff_ms,
            cache_max_size,
            cache_ttl_secs,
            auto_settle_l1_to_l2,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(eyre!("POLL_INTERVAL_MS must be greater than zero"));
        }
        if self.cache_max_size == 0 {
            return Err(eyre!("CACHE_MAX_SIZE must be greater than zero"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            ..RetryConfig::default()
        }
    }

    /// Devnet settings with the default deployment addresses
    pub fn devnet_config(&self) -> DevnetConfig {
        DevnetConfig {
            auto_settle_l1_to_l2: self.auto_settle_l1_to_l2,
            ..DevnetConfig::default()
        }
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(eyre!("AUTO_SETTLE_L1_TO_L2 must be a boolean, got {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 7] = [
        "STATE_DIR",
        "POLL_INTERVAL_MS",
        "MAX_RETRIES",
        "INITIAL_BACKOFF_MS",
        "CACHE_MAX_SIZE",
        "CACHE_TTL_SECS",
        "AUTO_SETTLE_L1_TO_L2",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_load_defaults() {
        clear_env();
        let config = RelayerConfig::load().unwrap();
        assert_eq!(config.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_retries, 5);
        assert!(config.auto_settle_l1_to_l2);
    }

    #[test]
    #[serial]
    fn test_load_overrides() {
        clear_env();
        env::set_var("STATE_DIR", "/tmp/bridge-state");
        env::set_var("POLL_INTERVAL_MS", "250");
        env::set_var("MAX_RETRIES", "2");
        env::set_var("CACHE_MAX_SIZE", "10");
        env::set_var("AUTO_SETTLE_L1_TO_L2", "false");

        let config = RelayerConfig::load().unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/bridge-state"));
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.retry_config().max_retries, 2);
        assert_eq!(config.cache_max_size, 10);
        assert!(!config.devnet_config().auto_settle_l1_to_l2);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_unparseable_number_falls_back() {
        clear_env();
        env::set_var("POLL_INTERVAL_MS", "soon");
        let config = RelayerConfig::load().unwrap();
        assert_eq!(config.poll_interval_ms, 1000);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_rejects_bad_flag_and_zero_interval() {
        clear_env();
        env::set_var("AUTO_SETTLE_L1_TO_L2", "maybe");
        assert!(RelayerConfig::load().is_err());

        clear_env();
        env::set_var("POLL_INTERVAL_MS", "0");
        assert!(RelayerConfig::load().is_err());
        clear_env();
    }
}
