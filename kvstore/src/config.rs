//! Store configuration module.
//!
//! This module provides configuration loading for the key-value store from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `KVSTORE_DATABASE_PATH`: Database file (default: `./kvstore.db`)
//! - `KVSTORE_LOCK_TIMEOUT_MS`: How long to wait for the file lock (default: `5000`)
//! - `KVSTORE_LOCK_RETRY_MS`: Delay between lock attempts (default: `100`)

use std::path::PathBuf;
use std::time::Duration;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database file used by the command-line tool.
    pub database_path: PathBuf,
    /// Maximum time to wait for another process to release the lock.
    pub lock_timeout: Duration,
    /// Delay between attempts to take a contended lock.
    pub lock_retry_interval: Duration,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(Self::DEFAULT_DATABASE_PATH),
            lock_timeout: Duration::from_millis(Self::DEFAULT_LOCK_TIMEOUT_MS),
            lock_retry_interval: Duration::from_millis(Self::DEFAULT_LOCK_RETRY_MS),
        }
    }
}

impl StoreConfig {
    /// Default database file.
    pub const DEFAULT_DATABASE_PATH: &'static str = "./kvstore.db";
    /// Default lock timeout in milliseconds.
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;
    /// Default lock retry interval in milliseconds.
    pub const DEFAULT_LOCK_RETRY_MS: u64 = 100;

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a millisecond value is set but not a valid integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path = std::env::var("KVSTORE_DATABASE_PATH")
            .map_or_else(|_| PathBuf::from(Self::DEFAULT_DATABASE_PATH), PathBuf::from);
        let lock_timeout = Self::load_millis("KVSTORE_LOCK_TIMEOUT_MS", Self::DEFAULT_LOCK_TIMEOUT_MS)?;
        let lock_retry_interval =
            Self::load_millis("KVSTORE_LOCK_RETRY_MS", Self::DEFAULT_LOCK_RETRY_MS)?;

        Ok(Self {
            database_path,
            lock_timeout,
            lock_retry_interval,
        })
    }

    /// Load a duration in milliseconds, using `default` if unset.
    fn load_millis(name: &str, default: u64) -> Result<Duration, ConfigError> {
        std::env::var(name).map_or(Ok(Duration::from_millis(default)), |value| {
            parse_millis(name, &value)
        })
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a whole number of milliseconds"),
        })
}
