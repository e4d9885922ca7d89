use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::event::DataValue;
use crate::rule::{Comparator, DataType, TargetAgentAction};

/// Source agent section of a trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerAgent {
    pub id: String,
    /// The measurement data the rule was matched against.
    pub params: HashMap<String, DataValue>,
}

/// Snapshot of the matched rule's condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRule {
    pub name: String,
    pub data_point: String,
    pub data_type: DataType,
    pub comparator: Comparator,
    pub value: DataValue,
    /// Execution interval in minutes.
    pub interval: u32,
}

/// Dispatch-ready work order built from a matched, admitted rule.
///
/// Ephemeral: consumed immediately by the dispatcher and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    /// Correlation id for logs.
    pub id: Uuid,
    pub rule_id: String,
    pub owner: String,
    pub agent: TriggerAgent,
    pub rule: TriggerRule,
    pub matched_value: DataValue,
    /// Timestamp of the event that fired the rule.
    pub fired_at: DateTime<Utc>,
    pub targets: Vec<TargetAgentAction>,
}
