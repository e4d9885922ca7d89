use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::{AgentMetadata, TargetAgent};

/// Target agents keyed by the action type they handle.
#[derive(Default, Clone)]
pub struct TargetRegistry {
    agents: HashMap<String, Arc<dyn TargetAgent>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in webhook and log agents.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::webhook::WebhookTarget::new()));
        registry.register(Arc::new(crate::log::LogTarget::new()));
        registry
    }

    /// Register an agent under its metadata's action type, replacing any
    /// previous agent for that type.
    pub fn register(&mut self, agent: Arc<dyn TargetAgent>) {
        let action_type = agent.metadata().action_type;
        if self.agents.insert(action_type.clone(), agent).is_some() {
            tracing::warn!(%action_type, "replaced existing target agent");
        }
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn TargetAgent>> {
        self.agents.get(action_type).cloned()
    }

    /// Descriptors of all registered agents, sorted by action type.
    pub fn metadata(&self) -> Vec<AgentMetadata> {
        let mut all: Vec<AgentMetadata> = self.agents.values().map(|a| a.metadata()).collect();
        all.sort_by(|a, b| a.action_type.cmp(&b.action_type));
        all
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_lists_webhook_and_log() {
        let registry = TargetRegistry::with_builtin();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("webhook").is_some());
        assert!(registry.get("log").is_some());
        assert!(registry.get("google-ads").is_none());

        let types: Vec<String> = registry.metadata().into_iter().map(|m| m.action_type).collect();
        assert_eq!(types, vec!["log", "webhook"]);
    }

    #[test]
    fn register_replaces_same_type() {
        let mut registry = TargetRegistry::new();
        registry.register(Arc::new(crate::log::LogTarget::new()));
        registry.register(Arc::new(crate::log::LogTarget::new()));
        assert_eq!(registry.len(), 1);
    }
}
