//! Rule evaluation core.
//!
//! This crate provides:
//! - Comparator evaluation over typed data points
//! - The `RuleStore` contract and an in-memory store
//! - Rule matching of measurement events against stored rules
//! - The cool-down gate enforcing one dispatch per execution interval
//! - Trigger assembly for admitted matches

pub mod cooldown;
pub mod evaluator;
pub mod matcher;
pub mod store;
pub mod trigger;

pub use cooldown::{cooldown_remaining, Admission, CooldownGate};
pub use evaluator::{evaluate, Evaluation};
pub use matcher::{MatchCandidate, MatchReport, RuleMatcher};
pub use store::{CasOutcome, MemoryRuleStore, RuleStore, StoreError};
pub use trigger::{build_trigger, TriggerError};
