//! Rule store contract and the in-memory implementation.
//!
//! The store's single-record conditional write is the only synchronization
//! point for rule state. Implementations must make
//! [`RuleStore::compare_and_set_last_executed`] atomic per rule.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use ifthen_core::Rule;

/// Errors surfaced by a rule store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached. Fatal to the current message.
    #[error("rule store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("corrupt rule record {rule_id}: {reason}")]
    Corrupt { rule_id: String, reason: String },
}

/// Result of a conditional `lastExecuted` update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Updated,
    /// The stored value no longer equals the expected one (or the rule is gone).
    Conflict,
}

/// Persistence contract for rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules listening to `source_id`, optionally narrowed to one job.
    ///
    /// Rules with an empty job id match any job.
    async fn rules_by_source(
        &self,
        source_id: &str,
        job_id: Option<&str>,
    ) -> Result<Vec<Rule>, StoreError>;

    /// Set `last_executed = new` only if it currently equals `expected`.
    async fn compare_and_set_last_executed(
        &self,
        rule_id: &str,
        expected: Option<DateTime<Utc>>,
        new: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError>;
}

// ── In-memory store ─────────────────────────────────────────────────

/// Rule store backed by a process-local map.
///
/// Suitable for tests and single-instance deployments seeded from rule
/// files. The CAS runs under the write lock, so concurrent callers in this
/// process observe exactly one winner per expected value.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<String, Rule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `rules`.
    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let store = Self::new();
        for rule in rules {
            store.upsert(rule);
        }
        store
    }

    /// Insert or replace a rule definition.
    ///
    /// An incoming record without `last_executed` keeps the stored one, so
    /// reloading definitions never reopens a cool-down window.
    pub fn upsert(&self, mut rule: Rule) {
        let mut rules = self.rules.write().expect("rule store lock poisoned");
        if rule.last_executed.is_none() {
            if let Some(existing) = rules.get(&rule.id) {
                rule.last_executed = existing.last_executed;
            }
        }
        rules.insert(rule.id.clone(), rule);
    }

    /// Remove a rule (e.g. its definition file was deleted).
    pub fn remove(&self, rule_id: &str) -> Option<Rule> {
        self.rules
            .write()
            .expect("rule store lock poisoned")
            .remove(rule_id)
    }

    pub fn get(&self, rule_id: &str) -> Option<Rule> {
        self.rules
            .read()
            .expect("rule store lock poisoned")
            .get(rule_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rules.read().expect("rule store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn rules_by_source(
        &self,
        source_id: &str,
        job_id: Option<&str>,
    ) -> Result<Vec<Rule>, StoreError> {
        let rules = self.rules.read().expect("rule store lock poisoned");
        let mut matching: Vec<Rule> = rules
            .values()
            .filter(|r| r.source.id == source_id && r.applies_to_job(job_id))
            .cloned()
            .collect();
        // Deterministic order for logs and tests.
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn compare_and_set_last_executed(
        &self,
        rule_id: &str,
        expected: Option<DateTime<Utc>>,
        new: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        let mut rules = self.rules.write().expect("rule store lock poisoned");
        let Some(rule) = rules.get_mut(rule_id) else {
            debug!(rule_id, "CAS on missing rule");
            return Ok(CasOutcome::Conflict);
        };
        if rule.last_executed != expected {
            return Ok(CasOutcome::Conflict);
        }
        rule.last_executed = Some(new);
        Ok(CasOutcome::Updated)
    }
}
