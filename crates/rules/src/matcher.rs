//! Match one measurement event against the rules of its source.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use ifthen_core::{DataValue, MeasurementEvent, Rule};

use crate::evaluator::{evaluate, Evaluation};
use crate::store::{RuleStore, StoreError};

/// A rule whose condition held for one event. Lives for one evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    /// The rule as read from the store; its `last_executed` is the CAS
    /// expectation for the cool-down gate.
    pub rule: Rule,
    pub observed: DataValue,
    pub event_timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub agent_params: HashMap<String, DataValue>,
}

/// Per-event matching summary, for metrics and logs.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MatchReport {
    pub candidates: Vec<MatchCandidate>,
    /// Rules fetched for the source.
    pub rules_considered: usize,
    /// Rules whose data point was absent from the event.
    pub skipped_absent: usize,
    /// Rules skipped because their definition is invalid.
    pub skipped_invalid: usize,
    /// Rules whose comparison raised a type mismatch.
    pub type_mismatches: usize,
}

/// Looks up rules for an event's source and evaluates their conditions.
pub struct RuleMatcher {
    store: Arc<dyn RuleStore>,
}

impl RuleMatcher {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    /// Produce the match candidates for `event`.
    ///
    /// Only a store failure is an error. Absent data points, invalid rules
    /// and type mismatches are skipped and counted in the report.
    pub async fn match_event(&self, event: &MeasurementEvent) -> Result<MatchReport, StoreError> {
        let rules = self
            .store
            .rules_by_source(&event.agent_id, event.job_filter())
            .await?;

        let mut report = MatchReport {
            rules_considered: rules.len(),
            ..MatchReport::default()
        };

        for rule in rules {
            // Stores may over-fetch; re-check scoping locally.
            if rule.source.id != event.agent_id || !rule.applies_to_job(event.job_filter()) {
                continue;
            }

            if let Err(e) = rule.validate() {
                warn!(rule_id = %rule.id, error = %e, "skipping invalid rule");
                report.skipped_invalid += 1;
                continue;
            }

            let condition = &rule.condition;
            let Some(observed) = event.data.get(&condition.data_point) else {
                debug!(
                    rule_id = %rule.id,
                    data_point = %condition.data_point,
                    "data point absent from event"
                );
                report.skipped_absent += 1;
                continue;
            };

            match evaluate(
                condition.comparator,
                condition.data_type,
                observed,
                &condition.value,
            ) {
                Evaluation::Match => {
                    debug!(rule_id = %rule.id, observed = %observed, "rule matched");
                    report.candidates.push(MatchCandidate {
                        observed: observed.clone(),
                        event_timestamp: event.timestamp,
                        agent_id: event.agent_id.clone(),
                        agent_params: event.data.clone(),
                        rule,
                    });
                }
                Evaluation::Mismatch => {}
                Evaluation::TypeError(reason) => {
                    warn!(
                        rule_id = %rule.id,
                        comparator = %condition.comparator,
                        data_type = %condition.data_type,
                        observed = %observed,
                        reason = %reason,
                        "ComparatorTypeMismatch: skipping rule"
                    );
                    report.type_mismatches += 1;
                }
            }
        }

        Ok(report)
    }
}
