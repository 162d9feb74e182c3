//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Accepted values for `logging.level`.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Session and framing settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;

        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        Ok(())
    }
}

/// Session and framing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Seconds after which an unanswered request is dropped from the ledger.
    /// Absent means pending calls never expire.
    #[serde(default)]
    pub pending_timeout_secs: Option<u64>,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Largest accepted frame body in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Longest accepted header line in bytes.
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,

    /// Size of each read from the byte source.
    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,
}

impl SessionConfig {
    /// The pending call timeout, if one is configured.
    #[must_use]
    pub fn pending_timeout(&self) -> Option<Duration> {
        self.pending_timeout_secs.map(Duration::from_secs)
    }

    /// The interval between expiry sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validates the session settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any limit or interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("pending_timeout_secs", self.pending_timeout_secs == Some(0)),
            ("sweep_interval_secs", self.sweep_interval_secs == 0),
            ("max_frame_bytes", self.max_frame_bytes == 0),
            ("max_header_bytes", self.max_header_bytes == 0),
            ("read_buffer_bytes", self.read_buffer_bytes == 0),
        ];
        if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::ValidationError {
                message: format!("session.{field} must be greater than zero"),
            });
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pending_timeout_secs: None,
            sweep_interval_secs: default_sweep_interval(),
            max_frame_bytes: default_max_frame_bytes(),
            max_header_bytes: default_max_header_bytes(),
            read_buffer_bytes: default_read_buffer_bytes(),
        }
    }
}

const fn default_sweep_interval() -> u64 {
    1
}

const fn default_max_frame_bytes() -> usize {
    crate::rpc::codec::DEFAULT_MAX_FRAME_BYTES
}

const fn default_max_header_bytes() -> usize {
    crate::rpc::codec::DEFAULT_MAX_HEADER_BYTES
}

const fn default_read_buffer_bytes() -> usize {
    8 * 1024
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
