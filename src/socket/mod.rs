//! # Socket Module
//!
//! Handles the WebSocket transport underneath the telemetry connection.
//!
//! This module handles:
//! - Deriving the socket URL from the platform's REST base URL
//! - Opening sockets through a swappable connector
//! - Exposing each socket as an outbound text channel and an inbound event channel

pub mod connector;

pub use connector::{SocketConnector, TungsteniteConnector};

use crate::error::{Result, TelemetryError};
use tokio::sync::mpsc;
use url::Url;

/// Event observed on an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Text frame received
    Text(String),

    /// Transport error; a `Closed` event follows
    Error(String),

    /// Socket closed by either side
    Closed,
}

/// Channels attached to one open socket
///
/// Dropping every clone of `outbound` closes the socket.
#[derive(Debug)]
pub struct SocketChannels {
    /// Text frames to write to the socket
    pub outbound: mpsc::UnboundedSender<String>,

    /// Events read from the socket, in arrival order
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Derive the WebSocket URL from the REST base URL
///
/// Maps `http` to `ws` and `https` to `wss`, keeps host, port and any path
/// prefix (e.g. behind a reverse proxy), and appends `ws_path`.
///
/// # Arguments
///
/// * `base_url` - REST base URL (e.g. "https://iot.example.com")
/// * `ws_path` - WebSocket endpoint path (e.g. "/api/ws")
///
/// # Errors
///
/// Returns error if the base URL does not parse, has no host, or uses a scheme
/// other than `http`/`https`
///
/// # Examples
///
/// ```
/// use traffic_telemetry::socket::derive_ws_url;
///
/// let url = derive_ws_url("https://iot.example.com", "/api/ws")?;
/// assert_eq!(url, "wss://iot.example.com/api/ws");
///
/// let url = derive_ws_url("http://10.0.0.5:9090/console/", "/api/ws")?;
/// assert_eq!(url, "ws://10.0.0.5:9090/console/api/ws");
/// # Ok::<(), traffic_telemetry::TelemetryError>(())
/// ```
pub fn derive_ws_url(base_url: &str, ws_path: &str) -> Result<String> {
    let parsed = Url::parse(base_url)
        .map_err(|e| TelemetryError::InvalidBaseUrl(format!("{}: {}", base_url, e)))?;

    let scheme = match parsed.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(TelemetryError::InvalidBaseUrl(format!(
                "unsupported scheme '{}' in {}",
                other, base_url
            )))
        }
    };

    let host = parsed
        .host_str()
        .ok_or_else(|| TelemetryError::InvalidBaseUrl(format!("missing host in {}", base_url)))?;

    let authority = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let prefix = parsed.path().trim_end_matches('/');

    Ok(format!("{}://{}{}{}", scheme, authority, prefix, ws_path))
}
