//! # Telemetry Module
//!
//! Live device telemetry over the platform's WebSocket API.
//!
//! This module handles:
//! - Connecting and authenticating one shared socket
//! - Multiplexing device subscriptions over that socket by `cmdId`
//! - Routing inbound frames to subscription and message-type handlers
//! - Reconnecting with a fixed delay after the socket drops

pub mod connection;
pub mod registry;

pub use connection::{ConnectionSettings, LinkState, ReconnectPolicy, TelemetryConnection};
pub use registry::{MessageHandler, SubscriptionId, TelemetryHandler};
