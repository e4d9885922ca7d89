//! Decode queue message bodies into [`MeasurementEvent`]s.
//!
//! The wire form is the source agent's AgentResult:
//!
//! ```json
//! {"agentId":"pollen-agent","jobId":"job-1","agentName":"Pollen",
//!  "data":{"pollenRiskLevel":"Moderate"},"timestamp":"2025-04-01T10:00:00Z"}
//! ```

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use ifthen_core::{DataValue, MeasurementEvent};

use crate::consumer::QueueMessage;
use crate::error::QueueError;

/// Convert a JSON [`Value`] to a [`DataValue`]. `null` has no counterpart.
fn json_to_data_value(v: &Value) -> Option<DataValue> {
    match v {
        Value::String(s) => Some(DataValue::Text(s.clone())),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) => DataValue::Number(f),
            None => DataValue::Text(n.to_string()),
        }),
        Value::Bool(b) => Some(DataValue::Boolean(*b)),
        Value::Null => None,
        // Arrays and objects: serialize back to JSON text
        other => Some(DataValue::Text(other.to_string())),
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

/// Event time: RFC 3339 text or epoch milliseconds.
fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => s.parse::<DateTime<Utc>>().ok(),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Parse a single queue message body into a [`MeasurementEvent`].
///
/// - `agentId` must be a non-empty string
/// - `data` must be an object; `null` entries are dropped
/// - `jobId` and `agentName` default to empty
/// - `timestamp` falls back to the queue's send time when absent, but a
///   present and unreadable timestamp rejects the message
pub fn parse_message(msg: &QueueMessage) -> Result<MeasurementEvent, QueueError> {
    let json: Value = serde_json::from_str(&msg.body)
        .map_err(|e| QueueError::Parse(format!("Invalid JSON in message {}: {}", msg.id, e)))?;

    let obj = json
        .as_object()
        .ok_or_else(|| QueueError::Parse(format!("Message {} body is not a JSON object", msg.id)))?;

    let agent_id = str_field(obj, "agentId")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| QueueError::Parse(format!("Message {} has no agentId", msg.id)))?
        .to_string();

    let data_obj = obj
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| QueueError::Parse(format!("Message {} has no data object", msg.id)))?;

    let data: HashMap<String, DataValue> = data_obj
        .iter()
        .filter_map(|(k, v)| json_to_data_value(v).map(|dv| (k.clone(), dv)))
        .collect();

    let timestamp = match obj.get("timestamp") {
        None | Some(Value::Null) => msg.timestamp,
        Some(v) => parse_timestamp(v).ok_or_else(|| {
            QueueError::Parse(format!("Message {} has an invalid timestamp: {v}", msg.id))
        })?,
    };

    Ok(MeasurementEvent {
        agent_id,
        job_id: str_field(obj, "jobId").unwrap_or_default().to_string(),
        agent_name: str_field(obj, "agentName").unwrap_or_default().to_string(),
        data,
        timestamp,
    })
}
