//! # Inbound Frame Decoder
//!
//! Classifies text frames received on the telemetry socket.

use super::types::TelemetryFrame;
use crate::error::Result;
use serde_json::Value;

/// Field correlating a frame to a telemetry subscription
pub const SUBSCRIPTION_ID_FIELD: &str = "subscriptionId";

/// Field naming the type of a non-telemetry frame
pub const MESSAGE_TYPE_FIELD: &str = "type";

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Telemetry dispatch for a subscription
    Telemetry {
        subscription_id: u64,
        frame: TelemetryFrame,
    },

    /// Any other message, routed by its `type` field
    Typed {
        message_type: Option<String>,
        body: Value,
    },

    /// Carries a `subscriptionId` that can never match a registry entry
    Unroutable(Value),
}

/// Decode a text frame
///
/// A frame carrying a `subscriptionId` is always a telemetry dispatch, whatever
/// its `errorCode`.
///
/// # Errors
///
/// Returns error if:
/// - Text is not valid JSON
/// - A telemetry frame has malformed error fields (odd samples in `data` or
///   `latestValues` are skipped, not fatal)
pub fn decode_inbound(text: &str) -> Result<InboundFrame> {
    let body: Value = serde_json::from_str(text)?;

    if let Some(id) = body.get(SUBSCRIPTION_ID_FIELD) {
        let Some(subscription_id) = id.as_u64() else {
            return Ok(InboundFrame::Unroutable(body));
        };
        let frame: TelemetryFrame = serde_json::from_value(body)?;
        return Ok(InboundFrame::Telemetry {
            subscription_id,
            frame,
        });
    }

    let message_type = body
        .get(MESSAGE_TYPE_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(InboundFrame::Typed { message_type, body })
}
