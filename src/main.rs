//! # Traffic Telemetry
//!
//! Stream live telemetry from traffic-signal controllers as JSON Lines.
//!
//! Connects to the IoT platform's WebSocket API, subscribes to the device ids
//! given on the command line and prints every received frame to stdout.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use traffic_telemetry::config::{Config, LoggingConfig};
use traffic_telemetry::socket::TungsteniteConnector;
use traffic_telemetry::{FileTokenSource, StaticToken, TelemetryConnection, TelemetryFrame, TokenSource};

/// Seconds between status log messages
const STATUS_INTERVAL_SECS: u64 = 30;

/// File name prefix for daily log files
const LOG_FILE_NAME: &str = "traffic-telemetry.log";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "traffic-telemetry", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Bearer token; overrides the configured token file
    #[arg(short, long)]
    token: Option<String>,

    /// Device ids to subscribe to
    #[arg(required = true)]
    devices: Vec<String>,
}

/// One line of output
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FrameRecord<'a> {
    received_at: String,
    device_id: &'a str,
    frame: &'a TelemetryFrame,
}

fn frame_line(device_id: &str, frame: &TelemetryFrame, received_at: DateTime<Utc>) -> serde_json::Result<String> {
    serde_json::to_string(&FrameRecord {
        received_at: received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        device_id,
        frame,
    })
}

/// Initialize tracing; `RUST_LOG` overrides the configured level
///
/// The returned guard flushes the file writer and must be kept alive.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;

    if logging.log_dir.is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&logging.log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(Some(guard))
}

/// Main entry point
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration and set up logging
///    - Resolve the bearer token (command line, then token file)
///    - Connect and subscribe to every requested device
///
/// 2. **Main Loop**
///    - Frames are printed from the subscription handlers as they arrive
///    - Log link status every 30 seconds
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Unsubscribe every device and close the socket
///
/// # Errors
///
/// Returns error if:
/// - Configuration cannot be loaded
/// - No token is available
/// - The initial connection fails
///
/// # Examples
///
/// ```bash
/// cargo run --release -- --config config/default.toml device-1 device-2
/// ```
///
/// Expected output:
/// ```text
/// {"receivedAt":"2024-05-01T10:00:00.000Z","deviceId":"device-1","frame":{"data":{"T_D1":[[1714557600000,"42"]]},"latestValues":{}}}
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Traffic Telemetry v{} starting...", env!("CARGO_PKG_VERSION"));

    let (tokens, token): (Arc<dyn TokenSource>, String) = match cli.token {
        Some(token) => (Arc::new(StaticToken::new(token.clone())), token),
        None => {
            let source = FileTokenSource::new(&config.auth.token_file);
            let token = source.token().with_context(|| {
                format!("No authentication token available in {}", source.path().display())
            })?;
            (Arc::new(source), token)
        }
    };

    let settings = config.connection_settings()?;
    info!("Telemetry socket: {}", settings.ws_url);

    let connection = TelemetryConnection::new(settings, Arc::new(TungsteniteConnector::new()), tokens);
    connection
        .connect(&token)
        .await
        .context("Failed to connect telemetry socket")?;

    let mut subscriptions = Vec::new();
    for device_id in &cli.devices {
        let device = device_id.clone();
        let handler = move |frame: TelemetryFrame| match frame_line(&device, &frame, Utc::now()) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to format frame for {}: {}", device, e),
        };

        match connection.subscribe_to_device_telemetry(device_id, handler) {
            Some(id) => subscriptions.push((device_id.clone(), id)),
            None => warn!("Could not subscribe to {}", device_id),
        }
    }

    info!("Streaming telemetry for {} devices", subscriptions.len());
    info!("Press Ctrl+C to exit");

    let mut status_interval = interval(Duration::from_secs(STATUS_INTERVAL_SECS));

    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                let state = connection.state();
                let count = connection.subscription_count();
                if state.is_open() {
                    info!("Link open, {} subscriptions", count);
                } else if state.is_connecting() {
                    warn!("Link {:?}, {} subscriptions waiting", state, count);
                } else {
                    error!("Link down with no reconnect pending; restart to resume streaming");
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    for (device_id, id) in &subscriptions {
        connection.unsubscribe_from_device_telemetry(device_id, *id);
    }
    connection.disconnect();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_status_interval_constant() {
        assert_eq!(STATUS_INTERVAL_SECS, 30);
    }

    #[test]
    fn test_cli_parses_devices_and_defaults() {
        let cli = Cli::try_parse_from(["traffic-telemetry", "D1", "D2"]).unwrap();
        assert_eq!(cli.devices, vec!["D1", "D2"]);
        assert_eq!(cli.config, PathBuf::from("config/default.toml"));
        assert_eq!(cli.token, None);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "traffic-telemetry",
            "--config",
            "/etc/telemetry.toml",
            "-t",
            "jwt",
            "D1",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/telemetry.toml"));
        assert_eq!(cli.token.as_deref(), Some("jwt"));
    }

    #[test]
    fn test_cli_requires_a_device() {
        assert!(Cli::try_parse_from(["traffic-telemetry"]).is_err());
    }

    #[test]
    fn test_frame_line_format() {
        let frame: TelemetryFrame =
            serde_json::from_value(json!({"data": {"temp": [[1000, 42]]}})).unwrap();
        let received_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        let line = frame_line("D1", &frame, received_at).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["receivedAt"], "2024-05-01T10:00:00.000Z");
        assert_eq!(value["deviceId"], "D1");
        assert_eq!(value["frame"]["data"]["temp"], json!([[1000, 42]]));
    }
}
