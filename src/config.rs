//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TelemetryError};
use crate::protocol::types::DEFAULT_WS_PATH;
use crate::socket::derive_ws_url;
use crate::telemetry::connection::{
    ConnectionSettings, ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_MS,
};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub reconnect: ReconnectConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Platform endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// REST base URL; the socket URL is derived from it
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

/// Reconnect policy configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    #[serde(default)]
    pub resubscribe: bool,
}

/// Authentication configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// File holding the bearer token written by the sign-in flow
    #[serde(default = "default_token_file")]
    pub token_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily log files; empty logs to stderr
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_base_url() -> String { "http://localhost:8080".to_string() }
fn default_ws_path() -> String { DEFAULT_WS_PATH.to_string() }

fn default_max_attempts() -> u32 { DEFAULT_MAX_RECONNECT_ATTEMPTS }
fn default_delay_ms() -> u64 { DEFAULT_RECONNECT_DELAY_MS }

fn default_token_file() -> String { "./token".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use traffic_telemetry::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket URL and reconnect policy for [`crate::TelemetryConnection::new`]
    ///
    /// # Errors
    ///
    /// Returns error if the base URL cannot be turned into a socket URL
    pub fn connection_settings(&self) -> Result<ConnectionSettings> {
        Ok(ConnectionSettings {
            ws_url: derive_ws_url(&self.server.base_url, &self.server.ws_path)?,
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect.max_attempts,
                delay: Duration::from_millis(self.reconnect.delay_ms),
                resubscribe: self.reconnect.resubscribe,
            },
        })
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if !self.server.ws_path.starts_with('/') {
            return Err(invalid("ws_path must start with '/'"));
        }

        if let Err(e) = derive_ws_url(&self.server.base_url, &self.server.ws_path) {
            return Err(invalid(format!("base_url is not usable: {}", e)));
        }

        if self.reconnect.max_attempts > 100 {
            return Err(invalid("max_attempts must be between 0 and 100"));
        }

        if self.reconnect.delay_ms == 0 || self.reconnect.delay_ms > 600_000 {
            return Err(invalid("delay_ms must be between 1 and 600000"));
        }

        if self.auth.token_file.is_empty() {
            return Err(invalid("token_file cannot be empty"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(format!(
                "log level must be one of: {}",
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> TelemetryError {
    TelemetryError::Config(toml::de::Error::custom(msg))
}
