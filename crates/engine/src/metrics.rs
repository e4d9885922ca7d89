//! Engine counters, exposed as JSON on `GET /metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::pipeline::PipelineReport;

/// Lock-free counters updated by the listener.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub messages_received: AtomicU64,
    pub messages_malformed: AtomicU64,
    pub messages_processed: AtomicU64,
    /// Messages left unacked after a fatal pipeline error.
    pub messages_failed: AtomicU64,
    pub triggers_dispatched: AtomicU64,
    pub triggers_suppressed: AtomicU64,
    pub cooldown_conflicts: AtomicU64,
    pub type_mismatches: AtomicU64,
    pub target_failures: AtomicU64,
    pub poll_errors: AtomicU64,
    pub ack_failures: AtomicU64,
    /// Gauge: messages currently being processed.
    pub in_flight: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_malformed: u64,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub triggers_dispatched: u64,
    pub triggers_suppressed: u64,
    pub cooldown_conflicts: u64,
    pub type_mismatches: u64,
    pub target_failures: u64,
    pub poll_errors: u64,
    pub ack_failures: u64,
    pub in_flight: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one processed event's report into the counters.
    pub fn record_report(&self, report: &PipelineReport) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.triggers_dispatched
            .fetch_add(report.dispatched() as u64, Ordering::Relaxed);
        self.triggers_suppressed
            .fetch_add(report.suppressed as u64, Ordering::Relaxed);
        self.cooldown_conflicts
            .fetch_add(report.conflicts as u64, Ordering::Relaxed);
        self.type_mismatches
            .fetch_add(report.type_mismatches as u64, Ordering::Relaxed);
        self.target_failures
            .fetch_add(report.target_failures() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            messages_received: load(&self.messages_received),
            messages_malformed: load(&self.messages_malformed),
            messages_processed: load(&self.messages_processed),
            messages_failed: load(&self.messages_failed),
            triggers_dispatched: load(&self.triggers_dispatched),
            triggers_suppressed: load(&self.triggers_suppressed),
            cooldown_conflicts: load(&self.cooldown_conflicts),
            type_mismatches: load(&self.type_mismatches),
            target_failures: load(&self.target_failures),
            poll_errors: load(&self.poll_errors),
            ack_failures: load(&self.ack_failures),
            in_flight: load(&self.in_flight),
        }
    }
}

/// Holds one unit of the in-flight gauge for as long as it lives.
pub(crate) struct InFlightGuard<'a>(&'a AtomicU64);

impl<'a> InFlightGuard<'a> {
    pub(crate) fn enter(gauge: &'a AtomicU64) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(gauge)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TriggerOutcome;
    use ifthen_targets::{DispatchResult, DispatchStatus};

    fn result(status: DispatchStatus) -> DispatchResult {
        DispatchResult {
            index: 0,
            target: "webhook".to_string(),
            status,
            error: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn record_report_accumulates() {
        let metrics = EngineMetrics::new();
        let report = PipelineReport {
            rules_considered: 3,
            matched: 2,
            type_mismatches: 1,
            suppressed: 1,
            triggers: vec![TriggerOutcome {
                trigger_id: "t-1".to_string(),
                rule_id: "r1".to_string(),
                results: vec![
                    result(DispatchStatus::Delivered),
                    result(DispatchStatus::TimedOut),
                ],
            }],
            ..PipelineReport::default()
        };

        metrics.record_report(&report);
        metrics.record_report(&report);

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_processed, 2);
        assert_eq!(snap.triggers_dispatched, 2);
        assert_eq!(snap.triggers_suppressed, 2);
        assert_eq!(snap.type_mismatches, 2);
        assert_eq!(snap.target_failures, 2);
    }

    #[test]
    fn in_flight_guard_restores_gauge() {
        let metrics = EngineMetrics::new();
        {
            let _a = InFlightGuard::enter(&metrics.in_flight);
            let _b = InFlightGuard::enter(&metrics.in_flight);
            assert_eq!(metrics.snapshot().in_flight, 2);
        }
        assert_eq!(metrics.snapshot().in_flight, 0);
    }
}
