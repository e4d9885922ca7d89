use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single observed or expected metric value.
///
/// Source agents report strings, numbers and booleans. Untagged so the
/// wire form is the bare JSON scalar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DataValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl DataValue {
    /// Extract as string, returning None for non-text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Boolean(b) => write!(f, "{b}"),
            // f64 Display already drops a trailing ".0" for integral values.
            DataValue::Number(n) => write!(f, "{n}"),
            DataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::Text(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::Text(s)
    }
}

impl From<f64> for DataValue {
    fn from(n: f64) -> Self {
        DataValue::Number(n)
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> Self {
        DataValue::Boolean(b)
    }
}

/// One measurement batch emitted by a source agent (wire name: AgentResult).
///
/// Consumed once per delivery; never persisted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementEvent {
    pub agent_id: String,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub agent_name: String,
    /// Metric name → value.
    pub data: HashMap<String, DataValue>,
    pub timestamp: DateTime<Utc>,
}

impl MeasurementEvent {
    /// Job filter for rule lookup; an empty job id means "any job".
    pub fn job_filter(&self) -> Option<&str> {
        if self.job_id.is_empty() {
            None
        } else {
            Some(self.job_id.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_value_untagged_decode() {
        let data: HashMap<String, DataValue> = serde_json::from_str(
            r#"{"pollenRiskLevel":"Moderate","temperature":21.5,"raining":false}"#,
        )
        .unwrap();

        assert_eq!(data["pollenRiskLevel"], DataValue::Text("Moderate".into()));
        assert_eq!(data["temperature"], DataValue::Number(21.5));
        assert_eq!(data["raining"], DataValue::Boolean(false));
    }

    #[test]
    fn data_value_display() {
        assert_eq!(DataValue::Number(3.0).to_string(), "3");
        assert_eq!(DataValue::Number(2.5).to_string(), "2.5");
        assert_eq!(DataValue::Boolean(true).to_string(), "true");
        assert_eq!(DataValue::from("High").to_string(), "High");
    }

    #[test]
    fn event_decodes_camel_case_wire_form() {
        let event: MeasurementEvent = serde_json::from_str(
            r#"{
                "agentId": "pollen-agent",
                "jobId": "job-1",
                "agentName": "Pollen",
                "data": {"pollenRiskLevel": "Moderate"},
                "timestamp": "2025-04-01T10:00:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(event.agent_id, "pollen-agent");
        assert_eq!(event.job_filter(), Some("job-1"));
        assert_eq!(event.timestamp.to_rfc3339(), "2025-04-01T10:00:00+00:00");
    }

    #[test]
    fn empty_job_id_means_no_filter() {
        let event: MeasurementEvent = serde_json::from_str(
            r#"{"agentId":"a","data":{},"timestamp":"2025-04-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(event.job_filter(), None);
    }
}
