//! PostgreSQL rule store.
//!
//! The cool-down CAS is a single conditional `UPDATE`: the row changes only
//! while `last_executed` still holds the value the caller read, so engine
//! instances sharing the database never double-fire a rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use ifthen_core::config::PostgresConfig;
use ifthen_core::{Condition, Rule, SourceRef, TargetAgentAction};
use ifthen_rules::{CasOutcome, RuleStore, StoreError};

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: String,
    owner: String,
    job_id: String,
    source_id: String,
    source_name: String,
    condition: Json<serde_json::Value>,
    execution_interval: i32,
    targets: Json<serde_json::Value>,
    last_executed: Option<DateTime<Utc>>,
}

impl RuleRow {
    fn into_rule(self) -> Result<Rule, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            rule_id: self.id.clone(),
            reason,
        };
        let condition: Condition = serde_json::from_value(self.condition.0.clone())
            .map_err(|e| corrupt(format!("condition: {e}")))?;
        let targets: Vec<TargetAgentAction> = serde_json::from_value(self.targets.0.clone())
            .map_err(|e| corrupt(format!("targets: {e}")))?;
        let execution_interval = u32::try_from(self.execution_interval)
            .map_err(|_| corrupt(format!("execution_interval {}", self.execution_interval)))?;

        Ok(Rule {
            id: self.id,
            owner: self.owner,
            job_id: self.job_id,
            source: SourceRef {
                id: self.source_id,
                name: self.source_name,
            },
            condition,
            execution_interval,
            targets,
            last_executed: self.last_executed,
        })
    }
}

/// Decode fetched rows, dropping the ones that no longer decode.
///
/// A corrupt record is skipped with a warning so the remaining rules of the
/// source keep firing; only connectivity failures are fatal to a fetch.
fn decode_rows(rows: Vec<RuleRow>) -> Vec<Rule> {
    rows.into_iter()
        .filter_map(|row| match row.into_rule() {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(error = %e, "CorruptRuleRecord: skipping rule row");
                None
            }
        })
        .collect()
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Rule store backed by the `rules` table.
#[derive(Clone)]
pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the engine's Postgres config.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await
            .map_err(unavailable)?;
        info!(host = %config.host, database = %config.database, "PostgreSQL connected");
        Ok(Self::new(pool))
    }

    /// Apply embedded migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;
        info!("Database migrations applied successfully");
        Ok(())
    }

    /// Insert or update a rule definition.
    ///
    /// A rule without `last_executed` keeps the stored value, like the
    /// in-memory store does on reload.
    pub async fn upsert(&self, rule: &Rule) -> Result<(), StoreError> {
        let condition = serde_json::to_value(&rule.condition)
            .map_err(|e| StoreError::Unavailable(format!("serialize condition: {e}")))?;
        let targets = serde_json::to_value(&rule.targets)
            .map_err(|e| StoreError::Unavailable(format!("serialize targets: {e}")))?;

        sqlx::query(
            "INSERT INTO rules (id, owner, job_id, source_id, source_name, condition,
                                execution_interval, targets, last_executed)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                owner = EXCLUDED.owner,
                job_id = EXCLUDED.job_id,
                source_id = EXCLUDED.source_id,
                source_name = EXCLUDED.source_name,
                condition = EXCLUDED.condition,
                execution_interval = EXCLUDED.execution_interval,
                targets = EXCLUDED.targets,
                last_executed = COALESCE(EXCLUDED.last_executed, rules.last_executed),
                updated_at = now()",
        )
        .bind(&rule.id)
        .bind(&rule.owner)
        .bind(&rule.job_id)
        .bind(&rule.source.id)
        .bind(&rule.source.name)
        .bind(Json(condition))
        .bind(i32::try_from(rule.execution_interval).unwrap_or(i32::MAX))
        .bind(Json(targets))
        .bind(rule.last_executed)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        debug!(rule_id = %rule.id, "rule upserted");
        Ok(())
    }
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn rules_by_source(
        &self,
        source_id: &str,
        job_id: Option<&str>,
    ) -> Result<Vec<Rule>, StoreError> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT id, owner, job_id, source_id, source_name, condition,
                    execution_interval, targets, last_executed
             FROM rules
             WHERE source_id = $1
               AND ($2::text IS NULL OR job_id = '' OR job_id = $2)
             ORDER BY id",
        )
        .bind(source_id)
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(decode_rows(rows))
    }

    async fn compare_and_set_last_executed(
        &self,
        rule_id: &str,
        expected: Option<DateTime<Utc>>,
        new: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        let result = sqlx::query(
            "UPDATE rules SET last_executed = $3, updated_at = now()
             WHERE id = $1 AND last_executed IS NOT DISTINCT FROM $2",
        )
        .bind(rule_id)
        .bind(expected)
        .bind(new)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(if result.rows_affected() == 1 {
            CasOutcome::Updated
        } else {
            CasOutcome::Conflict
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, condition: serde_json::Value) -> RuleRow {
        RuleRow {
            id: id.to_string(),
            owner: "owner-1".to_string(),
            job_id: String::new(),
            source_id: "pollen-agent".to_string(),
            source_name: "Pollen".to_string(),
            condition: Json(condition),
            execution_interval: 60,
            targets: Json(json!([{"type": "log", "params": []}])),
            last_executed: None,
        }
    }

    fn moderate() -> serde_json::Value {
        json!({
            "name": "Moderate pollen",
            "dataPoint": "pollenRiskLevel",
            "dataType": "enum",
            "comparator": "eq",
            "value": "Moderate"
        })
    }

    #[test]
    fn corrupt_row_does_not_hide_valid_rules() {
        let rows = vec![
            row("bad", json!({"dataType": "enum", "comparator": "eq"})),
            row("good", moderate()),
        ];

        let rules = decode_rows(rows);

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "good");
        assert_eq!(rules[0].condition.data_point, "pollenRiskLevel");
        assert_eq!(rules[0].targets[0].action_type, "log");
    }

    #[test]
    fn negative_interval_is_corrupt() {
        let mut bad = row("neg", moderate());
        bad.execution_interval = -5;

        assert!(matches!(bad.into_rule(), Err(StoreError::Corrupt { rule_id, .. }) if rule_id == "neg"));
    }
}
