//! Rule evaluation and dispatch engine.
//!
//! Wires the rule matcher, cool-down gate, trigger builder and dispatcher
//! into a [`Pipeline`], and drives it from an at-least-once queue through the
//! [`IngestionListener`].

pub mod error;
pub mod health;
pub mod listener;
pub mod metrics;
pub mod pipeline;

pub use error::EngineError;
pub use health::{router, spawn_health_server, HealthState};
pub use listener::{IngestionListener, ListenerConfig};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use pipeline::{Pipeline, PipelineReport, TriggerOutcome};
