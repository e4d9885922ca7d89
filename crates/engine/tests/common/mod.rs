//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use ifthen_core::{
    Comparator, Condition, DataType, DataValue, Rule, SourceRef, TargetAgentAction, Trigger,
};
use ifthen_engine::{IngestionListener, ListenerConfig, Pipeline};
use ifthen_queue::MemoryQueue;
use ifthen_rules::{CasOutcome, MemoryRuleStore, RuleStore, StoreError};
use ifthen_targets::{
    AgentMetadata, DispatchContext, Dispatcher, TargetAgent, TargetError, TargetRegistry,
};
use ifthen_engine::EngineMetrics;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap()
}

/// `pollenRiskLevel eq Moderate` on `pollen-agent`, 1 minute interval.
pub fn pollen_rule(id: &str, targets: Vec<TargetAgentAction>) -> Rule {
    Rule {
        id: id.to_string(),
        owner: "owner-1".to_string(),
        job_id: String::new(),
        source: SourceRef {
            id: "pollen-agent".to_string(),
            name: "Pollen".to_string(),
        },
        condition: Condition {
            name: "Moderate pollen".to_string(),
            data_point: "pollenRiskLevel".to_string(),
            data_type: DataType::Enum,
            comparator: Comparator::Eq,
            value: DataValue::from("Moderate"),
        },
        execution_interval: 1,
        targets,
        last_executed: None,
    }
}

/// AgentResult wire payload for `pollen-agent`.
pub fn agent_result(level: &str, at: DateTime<Utc>) -> String {
    json!({
        "agentId": "pollen-agent",
        "jobId": "job-1",
        "agentName": "Pollen",
        "data": { "pollenRiskLevel": level },
        "timestamp": at.to_rfc3339(),
    })
    .to_string()
}

#[derive(Clone, Copy, Debug)]
pub enum Behaviour {
    Succeed,
    Fail,
    Sleep(Duration),
}

/// Target agent that records every trigger it processes.
pub struct RecordingAgent {
    action_type: String,
    behaviour: Behaviour,
    seen: Mutex<Vec<Trigger>>,
}

impl RecordingAgent {
    pub fn new(action_type: &str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            action_type: action_type.to_string(),
            behaviour,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn triggers(&self) -> Vec<Trigger> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl TargetAgent for RecordingAgent {
    fn metadata(&self) -> AgentMetadata {
        AgentMetadata {
            action_type: self.action_type.clone(),
            name: format!("recording {}", self.action_type),
            description: "test agent".to_string(),
            settings: Vec::new(),
        }
    }

    async fn process(
        &self,
        _action: &TargetAgentAction,
        context: &DispatchContext,
    ) -> Result<(), TargetError> {
        match self.behaviour {
            Behaviour::Succeed => {}
            Behaviour::Fail => {
                return Err(TargetError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            }
            Behaviour::Sleep(d) => tokio::time::sleep(d).await,
        }
        self.seen.lock().unwrap().push(context.trigger.clone());
        Ok(())
    }
}

/// Store whose backend is always unreachable.
pub struct FailingStore;

#[async_trait]
impl RuleStore for FailingStore {
    async fn rules_by_source(
        &self,
        _source_id: &str,
        _job_id: Option<&str>,
    ) -> Result<Vec<Rule>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn compare_and_set_last_executed(
        &self,
        _rule_id: &str,
        _expected: Option<DateTime<Utc>>,
        _new: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

pub fn registry_with(agents: &[Arc<RecordingAgent>]) -> Arc<TargetRegistry> {
    let mut registry = TargetRegistry::new();
    for agent in agents {
        registry.register(agent.clone());
    }
    Arc::new(registry)
}

pub fn pipeline(store: Arc<dyn RuleStore>, registry: Arc<TargetRegistry>) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        store,
        Dispatcher::new(registry, Duration::from_secs(2)),
    ))
}

pub fn memory_store(rules: Vec<Rule>) -> Arc<MemoryRuleStore> {
    Arc::new(MemoryRuleStore::with_rules(rules))
}

pub fn memory_queue(visibility: Duration) -> Arc<MemoryQueue> {
    Arc::new(MemoryQueue::new(visibility).with_wait_time(Duration::from_millis(20)))
}

pub fn listener_config(max_in_flight: usize, grace: Duration) -> ListenerConfig {
    ListenerConfig {
        max_in_flight,
        poll_batch_size: 10,
        poll_backoff: Duration::from_millis(20),
        shutdown_grace: grace,
    }
}

pub fn listener(
    queue: Arc<MemoryQueue>,
    pipeline: Arc<Pipeline>,
    config: ListenerConfig,
) -> IngestionListener {
    IngestionListener::new(queue, pipeline, Arc::new(EngineMetrics::new()), config)
}

/// Poll `cond` every 10 ms until it holds or [`TIMEOUT`] elapses.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
