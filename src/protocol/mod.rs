//! # Telemetry Protocol Module
//!
//! JSON protocol spoken over the IoT platform's WebSocket endpoint.
//!
//! This module handles:
//! - Authentication frame encoding
//! - Latest-telemetry subscribe/unsubscribe commands
//! - Inbound frame classification (telemetry dispatch vs. typed messages)

pub mod types;
pub mod encoder;
pub mod decoder;
