//! # Command Encoder
//!
//! Builds outbound authentication and subscription frames.

use super::types::*;
use crate::error::Result;
use serde::Serialize;

/// Build the authentication frame
///
/// # Arguments
///
/// * `cmd_id` - Current value of the connection's command counter
/// * `token` - Bearer token
///
/// # Examples
///
/// ```
/// use traffic_telemetry::protocol::encoder::{auth_command, encode};
///
/// let text = encode(&auth_command(0, "jwt")).unwrap();
/// assert_eq!(text, r#"{"authCmd":{"cmdId":0,"token":"jwt"}}"#);
/// ```
pub fn auth_command(cmd_id: u64, token: &str) -> AuthEnvelope {
    AuthEnvelope {
        auth_cmd: AuthCommand {
            cmd_id,
            token: token.to_string(),
        },
    }
}

/// Build a latest-telemetry subscribe command for one device
pub fn subscribe_command(device_id: &str, cmd_id: u64) -> CommandEnvelope {
    timeseries_command(device_id, cmd_id, None)
}

/// Build the matching unsubscribe command
///
/// `cmd_id` must be the id used when subscribing.
pub fn unsubscribe_command(device_id: &str, cmd_id: u64) -> CommandEnvelope {
    timeseries_command(device_id, cmd_id, Some(true))
}

fn timeseries_command(device_id: &str, cmd_id: u64, unsubscribe: Option<bool>) -> CommandEnvelope {
    CommandEnvelope {
        cmds: vec![TimeseriesCommand {
            cmd_type: CMD_TYPE_TIMESERIES.to_string(),
            entity_type: ENTITY_TYPE_DEVICE.to_string(),
            entity_id: device_id.to_string(),
            scope: SCOPE_LATEST_TELEMETRY.to_string(),
            cmd_id,
            unsubscribe,
        }],
    }
}

/// Serialize any outbound message into a text frame
///
/// # Errors
///
/// Returns error if the message cannot be represented as JSON
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}
