//! Log target: records the action instead of calling out.
//!
//! Useful for dry runs and for rules that only need an audit trail.

use ifthen_core::TargetAgentAction;

use crate::traits::{AgentMetadata, DispatchContext, SettingDescriptor, TargetAgent, TargetError};

#[derive(Debug, Clone, Default)]
pub struct LogTarget;

impl LogTarget {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl TargetAgent for LogTarget {
    fn metadata(&self) -> AgentMetadata {
        AgentMetadata {
            action_type: "log".to_string(),
            name: "Log".to_string(),
            description: "Writes the trigger to the engine log".to_string(),
            settings: vec![SettingDescriptor::optional("message", "Log message")],
        }
    }

    async fn process(
        &self,
        action: &TargetAgentAction,
        context: &DispatchContext,
    ) -> Result<(), TargetError> {
        let trigger = &context.trigger;
        let message = action.param("message").unwrap_or("rule triggered");
        tracing::info!(
            trigger_id = %trigger.id,
            rule_id = %trigger.rule_id,
            agent_id = %trigger.agent.id,
            data_point = %trigger.rule.data_point,
            matched_value = %trigger.matched_value,
            fired_at = %trigger.fired_at,
            target_index = context.target_index,
            "{}",
            message
        );
        Ok(())
    }
}
