//! # Error Types
//!
//! Custom error types for the telemetry client using `thiserror`.

use thiserror::Error;

/// Main error type for the telemetry client
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// REST base URL cannot be turned into a socket URL
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// Socket could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Connection attempt discarded by an explicit disconnect
    #[error("Connection closed by disconnect")]
    Disconnected,
}

/// Result type alias for the telemetry client
pub type Result<T> = std::result::Result<T, TelemetryError>;
