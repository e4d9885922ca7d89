//! Target agent capability trait and shared error types.

use chrono::Utc;
use serde::Serialize;

use ifthen_core::{TargetAgentAction, Trigger};

/// Errors that can occur while dispatching an action to a target agent.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("target rejected action with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid action: {0}")]
    Invalid(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Prefix of the environment variables action params may reference.
pub const TARGET_ENV_PREFIX: &str = "IFTHEN_TARGET_";

/// Read an operator-provided variable on behalf of an action param.
///
/// Params are written by rule owners, so only names under
/// [`TARGET_ENV_PREFIX`] are visible. The rest of the process environment
/// (database and cloud credentials) is not.
pub fn target_env_var(name: &str) -> Result<String, TargetError> {
    if !name.starts_with(TARGET_ENV_PREFIX) {
        return Err(TargetError::Config(format!(
            "env var '{name}' is not readable from action params (allowed prefix: {TARGET_ENV_PREFIX})"
        )));
    }
    std::env::var(name).map_err(|_| TargetError::Config(format!("env var not found: {name}")))
}

/// One setting a target agent reads from its action params.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettingDescriptor {
    pub key: String,
    pub description: String,
    pub required: bool,
}

impl SettingDescriptor {
    pub fn required(key: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(key: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

/// Describes a target agent: the action type it handles and its settings.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentMetadata {
    /// Action type this agent is registered under (e.g. `"webhook"`).
    pub action_type: String,
    pub name: String,
    pub description: String,
    pub settings: Vec<SettingDescriptor>,
}

/// Context handed to a target agent alongside the resolved action.
///
/// Also the root object for param templates: `{{ trigger.rule.name }}`,
/// `{{ trigger.matchedValue }}`, `{{ now }}`.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchContext {
    pub trigger: Trigger,
    /// Position of the action within the trigger's targets.
    pub target_index: usize,
    /// Dispatch time in ISO 8601 format.
    pub now: String,
}

impl DispatchContext {
    pub fn new(trigger: &Trigger, target_index: usize) -> Self {
        Self {
            trigger: trigger.clone(),
            target_index,
            now: Utc::now().to_rfc3339(),
        }
    }
}

/// Capability shared by all target agents.
///
/// No base type: an agent is anything that can describe itself, validate
/// an action, and process it.
#[async_trait::async_trait]
pub trait TargetAgent: Send + Sync {
    /// Descriptor used for registry keying and settings discovery.
    fn metadata(&self) -> AgentMetadata;

    /// Check an action before it is processed.
    ///
    /// The default checks that every required setting is present.
    fn validate(&self, action: &TargetAgentAction) -> Result<(), TargetError> {
        let missing: Vec<String> = self
            .metadata()
            .settings
            .into_iter()
            .filter(|s| s.required && action.param(&s.key).map_or(true, str::is_empty))
            .map(|s| s.key)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TargetError::Invalid(format!(
                "missing required params: {}",
                missing.join(", ")
            )))
        }
    }

    /// Perform the external mutation described by `action`.
    async fn process(
        &self,
        action: &TargetAgentAction,
        context: &DispatchContext,
    ) -> Result<(), TargetError>;
}
