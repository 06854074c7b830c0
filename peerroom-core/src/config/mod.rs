//! Configuration management
//!
//! Defaults, TOML files and `PEERROOM_*` environment variables, validated
//! before use.
//!
//! ```toml
//! [session]
//! app_namespace = "peerroom"
//! display_name = "alice"
//! max_file_size_bytes = 104857600
//! download_dir = "./downloads"
//!
//! [transfer]
//! stall_threshold = "2m"
//! stall_poll_interval = "30s"
//! fingerprint = "sha256"
//!
//! [logging]
//! level = "info"
//! json_format = false
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core_session::fingerprint::FingerprintStrategy;
use crate::core_session::transfer::{DEFAULT_STALL_POLL_INTERVAL, DEFAULT_STALL_THRESHOLD};
use crate::logging::LogLevel;

mod error;

pub use error::ConfigError;

/// Default upload cap: 100 MiB
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session defaults
    pub session: SessionDefaults,

    /// File transfer tuning
    pub transfer: TransferConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Defaults applied to every session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    /// Namespace isolating this application's rooms on a shared transport
    pub app_namespace: String,

    /// Name announced to peers; generated when absent
    pub display_name: Option<String>,

    /// Largest file `send_file` accepts
    pub max_file_size_bytes: u64,

    /// Where downloads are written; kept in memory only when absent
    pub download_dir: Option<PathBuf>,
}

/// File transfer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Idle time after which a download is cancelled
    #[serde(with = "humantime_serde")]
    pub stall_threshold: Duration,

    /// How often downloads are checked for stalls
    #[serde(with = "humantime_serde")]
    pub stall_poll_interval: Duration,

    /// Hash used for send deduplication keys
    pub fingerprint: FingerprintStrategy,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            app_namespace: "peerroom".to_string(),
            display_name: None,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            download_dir: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            stall_poll_interval: DEFAULT_STALL_POLL_INTERVAL,
            fingerprint: FingerprintStrategy::Sha256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl SessionDefaults {
    /// Configured display name, or a generated `user-NNN`
    pub fn resolved_display_name(&self) -> String {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("user-{}", rand::rng().random_range(100..1000)),
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: PEERROOM_<KEY>
    /// Example: PEERROOM_STALL_THRESHOLD_SECS=300
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PEERROOM_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Session
        if let Some(ns) = lookup("PEERROOM_APP_NAMESPACE") {
            self.session.app_namespace = ns;
        }
        if let Some(name) = lookup("PEERROOM_DISPLAY_NAME") {
            self.session.display_name = Some(name);
        }
        if let Some(raw) = lookup("PEERROOM_MAX_FILE_SIZE_BYTES") {
            self.session.max_file_size_bytes = parse_value("PEERROOM_MAX_FILE_SIZE_BYTES", &raw)?;
        }
        if let Some(dir) = lookup("PEERROOM_DOWNLOAD_DIR") {
            self.session.download_dir = Some(PathBuf::from(dir));
        }

        // Transfer
        if let Some(raw) = lookup("PEERROOM_STALL_THRESHOLD_SECS") {
            let secs: u64 = parse_value("PEERROOM_STALL_THRESHOLD_SECS", &raw)?;
            self.transfer.stall_threshold = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("PEERROOM_STALL_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_value("PEERROOM_STALL_POLL_INTERVAL_SECS", &raw)?;
            self.transfer.stall_poll_interval = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("PEERROOM_FINGERPRINT") {
            self.transfer.fingerprint = match raw.trim().to_lowercase().as_str() {
                "sha256" => FingerprintStrategy::Sha256,
                "fast" => FingerprintStrategy::Fast,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "PEERROOM_FINGERPRINT".to_string(),
                        reason: format!("unknown strategy '{}'", other),
                    })
                }
            };
        }

        // Logging
        if let Some(level) = lookup("PEERROOM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(raw) = lookup("PEERROOM_LOG_JSON") {
            self.logging.json_format = parse_value("PEERROOM_LOG_JSON", &raw)?;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.app_namespace.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "app_namespace must not be empty".to_string(),
            ));
        }

        if self.session.max_file_size_bytes == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_file_size_bytes must be greater than 0".to_string(),
            ));
        }

        if self.transfer.stall_threshold.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "stall_threshold must be greater than 0".to_string(),
            ));
        }

        if self.transfer.stall_poll_interval.is_zero()
            || self.transfer.stall_poll_interval > self.transfer.stall_threshold
        {
            return Err(ConfigError::ValidationFailed(
                "stall_poll_interval must be non-zero and no longer than stall_threshold"
                    .to_string(),
            ));
        }

        if self.logging.level.parse::<LogLevel>().is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
