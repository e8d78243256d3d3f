//! # Traffic Telemetry Library
//!
//! Live telemetry for a traffic-signal-controller fleet.
//!
//! This library provides the WebSocket client that authenticates against the
//! IoT platform, multiplexes per-device telemetry subscriptions over a single
//! socket, reconnects on drop and routes inbound frames back to callbacks.

pub mod config;
pub mod error;
pub mod protocol;
pub mod socket;
pub mod telemetry;
pub mod token;

pub use error::{Result, TelemetryError};
pub use protocol::types::{TelemetryFrame, TelemetryPoint};
pub use telemetry::{ConnectionSettings, LinkState, ReconnectPolicy, SubscriptionId, TelemetryConnection};
pub use token::{FileTokenSource, StaticToken, TokenSource};
