//! One event through Matcher → Gate → Builder → Dispatcher.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info};

use ifthen_core::MeasurementEvent;
use ifthen_rules::{build_trigger, Admission, CooldownGate, MatchCandidate, RuleMatcher, RuleStore, StoreError};
use ifthen_targets::{DispatchResult, Dispatcher};

/// What happened to one dispatched trigger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerOutcome {
    pub trigger_id: String,
    pub rule_id: String,
    pub results: Vec<DispatchResult>,
}

/// Per-event summary, consumed by the listener's metrics.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub rules_considered: usize,
    pub matched: usize,
    pub type_mismatches: usize,
    pub suppressed: usize,
    pub conflicts: usize,
    /// Admitted candidates whose trigger could not be assembled.
    pub build_failures: usize,
    pub triggers: Vec<TriggerOutcome>,
}

impl PipelineReport {
    pub fn dispatched(&self) -> usize {
        self.triggers.len()
    }

    pub fn target_failures(&self) -> usize {
        self.triggers
            .iter()
            .flat_map(|t| &t.results)
            .filter(|r| !r.is_delivered())
            .count()
    }
}

enum CandidateOutcome {
    Dispatched(TriggerOutcome),
    Suppressed,
    Conflict,
    BuildFailed,
}

pub struct Pipeline {
    matcher: RuleMatcher,
    gate: CooldownGate,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(store: Arc<dyn RuleStore>, dispatcher: Dispatcher) -> Self {
        Self {
            matcher: RuleMatcher::new(store.clone()),
            gate: CooldownGate::new(store),
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Evaluate `event` against its rules and dispatch every admitted trigger.
    ///
    /// Candidates are handled concurrently. Only a rule store failure is an
    /// error; everything else is recorded in the report.
    pub async fn process_event(&self, event: &MeasurementEvent) -> Result<PipelineReport, StoreError> {
        let matches = self.matcher.match_event(event).await?;

        let mut report = PipelineReport {
            rules_considered: matches.rules_considered,
            matched: matches.candidates.len(),
            type_mismatches: matches.type_mismatches,
            ..PipelineReport::default()
        };

        let outcomes = join_all(matches.candidates.iter().map(|c| self.handle_candidate(c))).await;

        // Every candidate ran to completion before a store error is surfaced,
        // so triggers that already committed their window were dispatched.
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(CandidateOutcome::Dispatched(t)) => report.triggers.push(t),
                Ok(CandidateOutcome::Suppressed) => report.suppressed += 1,
                Ok(CandidateOutcome::Conflict) => report.conflicts += 1,
                Ok(CandidateOutcome::BuildFailed) => report.build_failures += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        debug!(
            agent_id = %event.agent_id,
            rules = report.rules_considered,
            matched = report.matched,
            dispatched = report.dispatched(),
            suppressed = report.suppressed,
            "event processed"
        );
        Ok(report)
    }

    async fn handle_candidate(&self, candidate: &MatchCandidate) -> Result<CandidateOutcome, StoreError> {
        match self.gate.admit(candidate).await? {
            Admission::Eligible => {}
            Admission::Suppressed { .. } => return Ok(CandidateOutcome::Suppressed),
            Admission::Conflict => return Ok(CandidateOutcome::Conflict),
        }

        // The window is already advanced; a build failure loses this firing.
        let trigger = match build_trigger(candidate) {
            Ok(t) => t,
            Err(e) => {
                error!(rule_id = %candidate.rule.id, error = %e, "failed to build trigger");
                return Ok(CandidateOutcome::BuildFailed);
            }
        };

        info!(
            trigger_id = %trigger.id,
            rule_id = %trigger.rule_id,
            agent_id = %trigger.agent.id,
            matched_value = %trigger.matched_value,
            targets = trigger.targets.len(),
            "rule fired"
        );

        let results = self.dispatcher.dispatch(&trigger).await;
        Ok(CandidateOutcome::Dispatched(TriggerOutcome {
            trigger_id: trigger.id.to_string(),
            rule_id: trigger.rule_id,
            results,
        }))
    }
}
