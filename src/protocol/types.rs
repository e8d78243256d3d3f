//! # Telemetry Protocol Constants and Types
//!
//! Wire definitions for the IoT platform's WebSocket telemetry API.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Command type for time-series subscriptions
pub const CMD_TYPE_TIMESERIES: &str = "TIMESERIES";

/// Entity type of a traffic-signal controller
pub const ENTITY_TYPE_DEVICE: &str = "DEVICE";

/// Scope carrying the newest telemetry samples
pub const SCOPE_LATEST_TELEMETRY: &str = "LATEST_TELEMETRY";

/// Path of the WebSocket endpoint relative to the REST base URL
pub const DEFAULT_WS_PATH: &str = "/api/ws";

/// Error code reported by the platform for a successful frame
pub const ERROR_CODE_OK: i64 = 0;

/// Authentication command payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCommand {
    pub cmd_id: u64,
    pub token: String,
}

/// Authentication frame sent right after the socket opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEnvelope {
    pub auth_cmd: AuthCommand,
}

/// One time-series subscribe/unsubscribe command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesCommand {
    #[serde(rename = "type")]
    pub cmd_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub scope: String,
    pub cmd_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsubscribe: Option<bool>,
}

/// Command frame wrapping a batch of time-series commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandEnvelope {
    pub cmds: Vec<TimeseriesCommand>,
}

/// Single `[timestamp, value]` sample
///
/// Timestamps are epoch milliseconds. Values are kept as raw JSON because the
/// platform reports them as numbers or strings depending on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint(pub i64, pub Value);

impl TelemetryPoint {
    /// Sample timestamp in epoch milliseconds
    pub fn timestamp(&self) -> i64 {
        self.0
    }

    /// Raw sample value
    pub fn value(&self) -> &Value {
        &self.1
    }
}

/// Telemetry frame as delivered to subscription handlers
///
/// `data` and `latest_values` are empty when the platform omits them or sends
/// `null`; the error fields are passed through untouched so handlers can
/// branch on them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,

    #[serde(default, deserialize_with = "lenient_data")]
    pub data: BTreeMap<String, Vec<TelemetryPoint>>,

    #[serde(default, deserialize_with = "lenient_latest_values")]
    pub latest_values: BTreeMap<String, i64>,
}

impl TelemetryFrame {
    /// True when the platform reported a non-zero error code
    pub fn is_error(&self) -> bool {
        matches!(self.error_code, Some(code) if code != ERROR_CODE_OK)
    }

    /// All samples received for a metric key
    pub fn points(&self, key: &str) -> &[TelemetryPoint] {
        self.data.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Value of the first sample for a metric key
    ///
    /// Dashboards read the current reading of a metric (e.g. `T_D1`) this way.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.points(key).first().map(TelemetryPoint::value)
    }
}

impl TelemetryPoint {
    /// Parse a raw `[timestamp, value, ...]` sample
    ///
    /// Float and numeric-string timestamps are truncated to milliseconds and
    /// trailing elements are ignored. Anything else is not a sample.
    fn from_raw(raw: &Value) -> Option<Self> {
        let [timestamp, value, ..] = raw.as_array()?.as_slice() else {
            return None;
        };
        Some(Self(epoch_millis(timestamp)?, value.clone()))
    }
}

fn epoch_millis(raw: &Value) -> Option<i64> {
    raw.as_i64()
        .or_else(|| raw.as_f64().map(|ms| ms as i64))
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Object map of a frame field; `null`, absent or non-object become empty
fn object_or_empty<'de, D>(deserializer: D, field: &str) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(map)) => Ok(map),
        None | Some(Value::Null) => Ok(Map::new()),
        Some(other) => {
            warn!("Ignoring non-object {}: {}", field, other);
            Ok(Map::new())
        }
    }
}

// A bad sample is skipped on its own so the rest of the frame still reaches
// its handler.
fn lenient_data<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, Vec<TelemetryPoint>>, D::Error>
where
    D: Deserializer<'de>,
{
    let metrics = object_or_empty(deserializer, "data")?;

    Ok(metrics
        .into_iter()
        .map(|(key, raw)| {
            let samples = raw.as_array().map(Vec::as_slice).unwrap_or_default();
            let points: Vec<_> = samples.iter().filter_map(TelemetryPoint::from_raw).collect();
            if points.len() != samples.len() || !raw.is_array() {
                warn!("Skipped malformed samples for metric {}: {}", key, raw);
            }
            (key, points)
        })
        .collect())
}

fn lenient_latest_values<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let latest = object_or_empty(deserializer, "latestValues")?;

    Ok(latest
        .into_iter()
        .filter_map(|(key, raw)| match epoch_millis(&raw) {
            Some(ts) => Some((key, ts)),
            None => {
                warn!("Skipped malformed latest value for metric {}: {}", key, raw);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_protocol_constants() {
        assert_eq!(CMD_TYPE_TIMESERIES, "TIMESERIES");
        assert_eq!(ENTITY_TYPE_DEVICE, "DEVICE");
        assert_eq!(SCOPE_LATEST_TELEMETRY, "LATEST_TELEMETRY");
        assert_eq!(DEFAULT_WS_PATH, "/api/ws");
    }

    #[test]
    fn test_frame_defaults_when_fields_missing() {
        let frame: TelemetryFrame = serde_json::from_value(json!({})).unwrap();
        assert_eq!(frame, TelemetryFrame::default());
        assert!(!frame.is_error());
    }

    #[test]
    fn test_frame_null_maps_become_empty() {
        let frame: TelemetryFrame =
            serde_json::from_value(json!({"data": null, "latestValues": null})).unwrap();
        assert!(frame.data.is_empty());
        assert!(frame.latest_values.is_empty());
    }

    #[test]
    fn test_frame_error_code() {
        let ok: TelemetryFrame = serde_json::from_value(json!({"errorCode": 0})).unwrap();
        assert!(!ok.is_error());

        let failed: TelemetryFrame =
            serde_json::from_value(json!({"errorCode": 3, "errorMsg": "Unauthorized"})).unwrap();
        assert!(failed.is_error());
        assert_eq!(failed.error_msg.as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn test_frame_value_reads_first_point() {
        let frame: TelemetryFrame = serde_json::from_value(json!({
            "data": {"T_D1": [[2000, "15"], [1000, "14"]]},
            "latestValues": {"T_D1": 2000}
        }))
        .unwrap();

        assert_eq!(frame.value("T_D1"), Some(&json!("15")));
        assert_eq!(frame.points("T_D1").len(), 2);
        assert_eq!(frame.points("T_D1")[1].timestamp(), 1000);
        assert_eq!(frame.latest_values.get("T_D1"), Some(&2000));
        assert_eq!(frame.value("T_X1"), None);
        assert!(frame.points("T_X1").is_empty());
    }

    #[test]
    fn test_frame_tolerates_odd_samples() {
        let frame: TelemetryFrame = serde_json::from_value(json!({
            "errorCode": 0,
            "data": {
                "temp": [[1000, 42]],
                "volt": [[1000.0, 12], [999.9, 11]],
                "amp": [[1000, 3, "extra"]],
                "mode": [["2000", "AUTO"]],
                "bad": [["x", 1], [5], "y", [6, 7]],
                "flat": 17
            }
        }))
        .unwrap();

        assert_eq!(frame.points("temp"), [TelemetryPoint(1000, json!(42))]);
        assert_eq!(frame.points("volt")[1].timestamp(), 999);
        assert_eq!(frame.value("amp"), Some(&json!(3)));
        assert_eq!(frame.points("mode")[0].timestamp(), 2000);
        assert_eq!(frame.points("bad"), [TelemetryPoint(6, json!(7))]);
        assert!(frame.points("flat").is_empty());
    }

    #[test]
    fn test_frame_skips_malformed_latest_values() {
        let frame: TelemetryFrame = serde_json::from_value(json!({
            "latestValues": {"temp": 1000, "volt": 1000.5, "amp": "soon", "mode": null}
        }))
        .unwrap();

        assert_eq!(
            frame.latest_values,
            BTreeMap::from([("temp".to_string(), 1000), ("volt".to_string(), 1000)])
        );
    }

    #[test]
    fn test_frame_non_object_maps_become_empty() {
        let frame: TelemetryFrame =
            serde_json::from_value(json!({"errorCode": 1, "data": [1, 2], "latestValues": "x"})).unwrap();
        assert!(frame.data.is_empty());
        assert!(frame.latest_values.is_empty());
        assert!(frame.is_error());
    }

    #[test]
    fn test_unsubscribe_flag_omitted_when_unset() {
        let cmd = TimeseriesCommand {
            cmd_type: CMD_TYPE_TIMESERIES.to_string(),
            entity_type: ENTITY_TYPE_DEVICE.to_string(),
            entity_id: "dev".to_string(),
            scope: SCOPE_LATEST_TELEMETRY.to_string(),
            cmd_id: 1,
            unsubscribe: None,
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert!(value.get("unsubscribe").is_none());
        assert_eq!(value["type"], "TIMESERIES");
        assert_eq!(value["entityType"], "DEVICE");
    }
}
