//! Assemble dispatch-ready triggers from admitted match candidates.

use uuid::Uuid;

use ifthen_core::{Trigger, TriggerAgent, TriggerRule};

use crate::matcher::MatchCandidate;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("cannot build trigger for rule '{rule_id}': missing {field}")]
    MissingField { rule_id: String, field: &'static str },
}

/// Build the trigger for an admitted candidate. Pure assembly.
pub fn build_trigger(candidate: &MatchCandidate) -> Result<Trigger, TriggerError> {
    let rule = &candidate.rule;
    let missing = |field| TriggerError::MissingField {
        rule_id: rule.id.clone(),
        field,
    };

    if rule.id.is_empty() {
        return Err(missing("id"));
    }
    if candidate.agent_id.is_empty() {
        return Err(missing("agent id"));
    }
    if rule.condition.data_point.is_empty() {
        return Err(missing("condition.dataPoint"));
    }

    let condition = &rule.condition;
    Ok(Trigger {
        id: Uuid::new_v4(),
        rule_id: rule.id.clone(),
        owner: rule.owner.clone(),
        agent: TriggerAgent {
            id: candidate.agent_id.clone(),
            params: candidate.agent_params.clone(),
        },
        rule: TriggerRule {
            name: condition.name.clone(),
            data_point: condition.data_point.clone(),
            data_type: condition.data_type,
            comparator: condition.comparator,
            value: condition.value.clone(),
            interval: rule.execution_interval,
        },
        matched_value: candidate.observed.clone(),
        fired_at: candidate.event_timestamp,
        targets: rule.targets.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{pollen_rule, t0};
    use ifthen_core::{Comparator, DataValue};

    fn candidate() -> MatchCandidate {
        MatchCandidate {
            rule: pollen_rule("r1"),
            observed: DataValue::from("Moderate"),
            event_timestamp: t0(),
            agent_id: "pollen-agent".to_string(),
            agent_params: [("pollenRiskLevel".to_string(), DataValue::from("Moderate"))].into(),
        }
    }

    #[test]
    fn copies_rule_condition_and_targets() {
        let trigger = build_trigger(&candidate()).unwrap();

        assert_eq!(trigger.rule_id, "r1");
        assert_eq!(trigger.owner, "owner-1");
        assert_eq!(trigger.agent.id, "pollen-agent");
        assert_eq!(trigger.agent.params["pollenRiskLevel"], DataValue::from("Moderate"));
        assert_eq!(trigger.rule.data_point, "pollenRiskLevel");
        assert_eq!(trigger.rule.comparator, Comparator::Eq);
        assert_eq!(trigger.rule.interval, 60);
        assert_eq!(trigger.matched_value, DataValue::from("Moderate"));
        assert_eq!(trigger.fired_at, t0());
        assert_eq!(trigger.targets.len(), 1);
        assert_eq!(trigger.targets[0].action_type, "log");
    }

    #[test]
    fn each_trigger_gets_a_fresh_id() {
        let a = build_trigger(&candidate()).unwrap();
        let b = build_trigger(&candidate()).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn missing_agent_id_is_rejected() {
        let mut c = candidate();
        c.agent_id.clear();
        let err = build_trigger(&c).unwrap_err();
        assert!(err.to_string().contains("agent id"));
    }
}
