//! Persisted rule definitions: condition, cool-down interval and targets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::event::DataValue;

/// Declared type of a condition's data point.
///
/// Unrecognised values decode to [`DataType::Unknown`] so the rule still
/// loads and fails closed at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Number,
    Enum,
    Boolean,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Number => write!(f, "number"),
            DataType::Enum => write!(f, "enum"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Predicate operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Gt,
    Lt,
    Eq,
    Yes,
    No,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::Gt => write!(f, "gt"),
            Comparator::Lt => write!(f, "lt"),
            Comparator::Eq => write!(f, "eq"),
            Comparator::Yes => write!(f, "yes"),
            Comparator::No => write!(f, "no"),
            Comparator::Unknown => write!(f, "unknown"),
        }
    }
}

/// Source agent a rule listens to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// The predicate definition embedded in a rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub name: String,
    /// Metric name looked up in the event's `data` map.
    pub data_point: String,
    pub data_type: DataType,
    pub comparator: Comparator,
    /// Expected value. Ignored by `yes`/`no`.
    #[serde(default = "default_expected")]
    pub value: DataValue,
}

fn default_expected() -> DataValue {
    DataValue::Boolean(true)
}

/// One `{key, value}` pair of a target action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionParam {
    pub key: String,
    pub value: String,
}

/// A mutation to perform on a target agent when the rule fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetAgentAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: Vec<ActionParam>,
}

impl TargetAgentAction {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            params: Vec::new(),
        }
    }

    /// Append a param, builder style.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(ActionParam {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// First param value for `key`, if any.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }
}

/// A persisted "if this then that" rule.
///
/// Created and edited externally. The engine only ever advances
/// `last_executed`, through the store's compare-and-set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub owner: String,
    /// Empty means the rule applies to any job of its source.
    #[serde(default)]
    pub job_id: String,
    pub source: SourceRef,
    pub condition: Condition,
    /// Minimum minutes between two dispatches of this rule.
    pub execution_interval: u32,
    #[serde(default)]
    pub targets: Vec<TargetAgentAction>,
    #[serde(default)]
    pub last_executed: Option<DateTime<Utc>>,
}

impl Rule {
    /// Cool-down window as a chrono duration.
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.execution_interval))
    }

    /// Whether this rule is scoped to the given job filter.
    pub fn applies_to_job(&self, job_id: Option<&str>) -> bool {
        match job_id {
            Some(job) => self.job_id.is_empty() || self.job_id == job,
            None => true,
        }
    }

    /// Check the structural invariants the engine relies on.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: &str| CoreError::InvalidRule {
            rule_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.source.id.trim().is_empty() {
            return Err(invalid("source.id must not be empty"));
        }
        if self.condition.data_point.trim().is_empty() {
            return Err(invalid("condition.dataPoint must not be empty"));
        }
        if self.execution_interval == 0 {
            return Err(invalid("executionInterval must be greater than 0"));
        }
        if matches!(self.condition.comparator, Comparator::Gt | Comparator::Lt)
            && self.condition.data_type != DataType::Number
        {
            return Err(invalid(&format!(
                "comparator '{}' requires dataType 'number', got '{}'",
                self.condition.comparator, self.condition.data_type
            )));
        }
        Ok(())
    }
}
