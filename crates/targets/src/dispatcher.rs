//! Fans a trigger out to its target actions.
//!
//! Every action is dispatched concurrently under its own timeout. A failing,
//! slow or unsupported target never blocks or cancels its siblings, and no
//! failure is retried here: the cool-down window has already been committed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;

use ifthen_core::{TargetAgentAction, Trigger};

use crate::registry::TargetRegistry;
use crate::templating::TemplateRenderer;
use crate::traits::{DispatchContext, TargetError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DispatchStatus {
    Delivered,
    Failed,
    TimedOut,
    /// No agent is registered for the action type.
    Unsupported,
}

/// Outcome of one target action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub index: usize,
    pub target: String,
    pub status: DispatchStatus,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl DispatchResult {
    pub fn is_delivered(&self) -> bool {
        self.status == DispatchStatus::Delivered
    }
}

pub struct Dispatcher {
    registry: Arc<TargetRegistry>,
    renderer: TemplateRenderer,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<TargetRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            renderer: TemplateRenderer::new(),
            timeout,
        }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Dispatch every target of `trigger`. One result per target, in order.
    pub async fn dispatch(&self, trigger: &Trigger) -> Vec<DispatchResult> {
        if trigger.targets.is_empty() {
            tracing::debug!(rule_id = %trigger.rule_id, "no targets configured");
            return Vec::new();
        }

        let futures = trigger
            .targets
            .iter()
            .enumerate()
            .map(|(index, action)| self.dispatch_one(trigger, index, action));

        join_all(futures).await
    }

    async fn dispatch_one(
        &self,
        trigger: &Trigger,
        index: usize,
        action: &TargetAgentAction,
    ) -> DispatchResult {
        let start = Instant::now();
        let target = action.action_type.clone();

        let Some(agent) = self.registry.get(&action.action_type) else {
            tracing::warn!(
                rule_id = %trigger.rule_id,
                trigger_id = %trigger.id,
                target = %target,
                index,
                "TargetDispatchFailure: no agent registered for action type"
            );
            return DispatchResult {
                index,
                target,
                status: DispatchStatus::Unsupported,
                error: Some(format!("unsupported action type '{}'", action.action_type)),
                duration_ms: start.elapsed().as_millis() as u64,
            };
        };

        let context = DispatchContext::new(trigger, index);
        let attempt = async {
            let resolved = self.renderer.resolve_action(action, &context)?;
            agent.validate(&resolved)?;
            agent.process(&resolved, &context).await
        };

        let (status, error) = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(())) => (DispatchStatus::Delivered, None),
            Ok(Err(e)) => (DispatchStatus::Failed, Some(e)),
            Err(_) => (
                DispatchStatus::TimedOut,
                Some(TargetError::Timeout(self.timeout.as_millis() as u64)),
            ),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match &error {
            None => tracing::info!(
                rule_id = %trigger.rule_id,
                trigger_id = %trigger.id,
                target = %target,
                index,
                duration_ms,
                "target action delivered"
            ),
            Some(e) => tracing::warn!(
                rule_id = %trigger.rule_id,
                trigger_id = %trigger.id,
                target = %target,
                index,
                status = ?status,
                error = %e,
                duration_ms,
                "TargetDispatchFailure"
            ),
        }

        DispatchResult {
            index,
            target,
            status,
            error: error.map(|e| e.to_string()),
            duration_ms,
        }
    }
}
