//! Cool-down gate: at most one dispatch per rule per execution interval.
//!
//! Eligibility is decided against the rule as read at match time, then
//! committed with the store's compare-and-set. Losing the CAS means another
//! delivery already advanced the window. No in-process lock is involved, so
//! the guarantee holds across engine instances sharing a store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use ifthen_core::Rule;

use crate::matcher::MatchCandidate;
use crate::store::{CasOutcome, RuleStore, StoreError};

/// Gate decision for one match candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The window was advanced to the event timestamp; dispatch.
    Eligible,
    /// The interval has not elapsed since the last execution.
    Suppressed { remaining: chrono::Duration },
    /// Another delivery advanced the window first.
    Conflict,
}

/// Time left in the rule's cool-down at `at`, or `None` when it may fire.
///
/// An `at` older than `last_executed` (out-of-order delivery) is still
/// inside the window.
pub fn cooldown_remaining(rule: &Rule, at: DateTime<Utc>) -> Option<chrono::Duration> {
    let last = rule.last_executed?;
    let elapsed = at.signed_duration_since(last);
    let interval = rule.interval();
    if elapsed >= interval {
        None
    } else {
        Some(interval - elapsed)
    }
}

pub struct CooldownGate {
    store: Arc<dyn RuleStore>,
}

impl CooldownGate {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    /// Decide whether `candidate` may dispatch, committing the window on success.
    pub async fn admit(&self, candidate: &MatchCandidate) -> Result<Admission, StoreError> {
        let rule = &candidate.rule;

        if let Some(remaining) = cooldown_remaining(rule, candidate.event_timestamp) {
            debug!(
                rule_id = %rule.id,
                remaining_secs = remaining.num_seconds(),
                "rule still in cool-down"
            );
            return Ok(Admission::Suppressed { remaining });
        }

        let outcome = self
            .store
            .compare_and_set_last_executed(&rule.id, rule.last_executed, candidate.event_timestamp)
            .await?;

        match outcome {
            CasOutcome::Updated => {
                debug!(
                    rule_id = %rule.id,
                    last_executed = %candidate.event_timestamp,
                    "cool-down window advanced"
                );
                Ok(Admission::Eligible)
            }
            CasOutcome::Conflict => {
                debug!(rule_id = %rule.id, "CoolDownConflict: window already advanced");
                Ok(Admission::Conflict)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::RuleMatcher;
    use crate::store::tests::{pollen_rule, t0};
    use crate::store::MemoryRuleStore;
    use chrono::Duration;
    use ifthen_core::{DataValue, MeasurementEvent};

    fn moderate_event(at: DateTime<Utc>) -> MeasurementEvent {
        MeasurementEvent {
            agent_id: "pollen-agent".to_string(),
            job_id: String::new(),
            agent_name: "Pollen".to_string(),
            data: [("pollenRiskLevel".to_string(), DataValue::from("Moderate"))].into(),
            timestamp: at,
        }
    }

    /// Match then admit, the way the pipeline does for a single delivery.
    async fn deliver(store: &Arc<MemoryRuleStore>, at: DateTime<Utc>) -> Vec<Admission> {
        let matcher = RuleMatcher::new(store.clone());
        let gate = CooldownGate::new(store.clone());
        let report = matcher.match_event(&moderate_event(at)).await.unwrap();
        let mut admissions = Vec::new();
        for candidate in &report.candidates {
            admissions.push(gate.admit(candidate).await.unwrap());
        }
        admissions
    }

    #[test]
    fn remaining_is_none_without_history() {
        assert_eq!(cooldown_remaining(&pollen_rule("r1"), t0()), None);
    }

    #[test]
    fn remaining_counts_down_and_rejects_older_events() {
        let mut rule = pollen_rule("r1");
        rule.last_executed = Some(t0());

        assert_eq!(
            cooldown_remaining(&rule, t0() + Duration::minutes(30)),
            Some(Duration::minutes(30))
        );
        assert_eq!(cooldown_remaining(&rule, t0() + Duration::minutes(60)), None);
        assert!(cooldown_remaining(&rule, t0() - Duration::minutes(5)).is_some());
    }

    #[tokio::test]
    async fn interval_rate_limits_dispatches() {
        let store = Arc::new(MemoryRuleStore::with_rules([pollen_rule("r1")]));

        assert_eq!(deliver(&store, t0()).await, vec![Admission::Eligible]);
        assert_eq!(store.get("r1").unwrap().last_executed, Some(t0()));

        let at_30 = deliver(&store, t0() + Duration::minutes(30)).await;
        assert!(matches!(at_30.as_slice(), [Admission::Suppressed { .. }]));

        let t61 = t0() + Duration::minutes(61);
        assert_eq!(deliver(&store, t61).await, vec![Admission::Eligible]);
        assert_eq!(store.get("r1").unwrap().last_executed, Some(t61));
    }

    #[tokio::test]
    async fn duplicate_delivery_is_suppressed() {
        let store = Arc::new(MemoryRuleStore::with_rules([pollen_rule("r1")]));

        assert_eq!(deliver(&store, t0()).await, vec![Admission::Eligible]);
        let again = deliver(&store, t0()).await;
        assert!(matches!(again.as_slice(), [Admission::Suppressed { .. }]));
    }

    #[tokio::test]
    async fn stale_read_loses_the_race() {
        let store = Arc::new(MemoryRuleStore::with_rules([pollen_rule("r1")]));
        let matcher = RuleMatcher::new(store.clone());
        let gate = CooldownGate::new(store.clone());

        // Both deliveries read the rule before either commits.
        let a = matcher.match_event(&moderate_event(t0())).await.unwrap();
        let b = matcher.match_event(&moderate_event(t0())).await.unwrap();

        assert_eq!(gate.admit(&a.candidates[0]).await.unwrap(), Admission::Eligible);
        assert_eq!(gate.admit(&b.candidates[0]).await.unwrap(), Admission::Conflict);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deliveries_admit_exactly_one() {
        const N: usize = 16;
        let store = Arc::new(MemoryRuleStore::with_rules([pollen_rule("r1")]));
        let matcher = RuleMatcher::new(store.clone());

        // Every delivery matched against the same snapshot.
        let candidate = matcher.match_event(&moderate_event(t0())).await.unwrap().candidates[0].clone();

        let mut handles = Vec::with_capacity(N);
        for _ in 0..N {
            let gate = CooldownGate::new(store.clone());
            let candidate = candidate.clone();
            handles.push(tokio::spawn(async move { gate.admit(&candidate).await.unwrap() }));
        }

        let mut eligible = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Admission::Eligible => eligible += 1,
                Admission::Conflict => conflicts += 1,
                other => panic!("unexpected admission: {other:?}"),
            }
        }

        assert_eq!(eligible, 1);
        assert_eq!(conflicts, N - 1);
    }
}
