//! Queue-driven tests for `IngestionListener`: ack policy, redelivery,
//! concurrency and graceful shutdown.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Duration as ChronoDuration;

use ifthen_core::TargetAgentAction;
use ifthen_engine::EngineError;
use ifthen_queue::QueueConsumer;
use ifthen_rules::RuleStore;

use common::*;

#[tokio::test]
async fn processes_events_in_order_and_acks() {
    let agent = RecordingAgent::new("record", Behaviour::Succeed);
    let store = memory_store(vec![pollen_rule("r1", vec![TargetAgentAction::new("record")])]);
    let queue = memory_queue(Duration::from_secs(30));
    let listener = listener(
        queue.clone(),
        pipeline(store, registry_with(&[agent.clone()])),
        listener_config(1, Duration::from_secs(5)),
    );

    queue.send(agent_result("Moderate", t0()));
    queue.send(agent_result("Moderate", t0() + ChronoDuration::seconds(30)));
    queue.send(agent_result("Moderate", t0() + ChronoDuration::seconds(61)));

    listener.start().unwrap();
    assert!(wait_until(|| queue.is_empty()).await);
    listener.stop().await;

    assert_eq!(agent.count(), 2);
    let snap = listener.metrics().snapshot();
    assert_eq!(snap.messages_received, 3);
    assert_eq!(snap.messages_processed, 3);
    assert_eq!(snap.triggers_dispatched, 2);
    assert_eq!(snap.triggers_suppressed, 1);
    assert_eq!(snap.in_flight, 0);
}

#[tokio::test]
async fn malformed_message_is_acked_and_dropped() {
    let agent = RecordingAgent::new("record", Behaviour::Succeed);
    let store = memory_store(vec![pollen_rule("r1", vec![TargetAgentAction::new("record")])]);
    let queue = memory_queue(Duration::from_secs(30));
    let listener = listener(
        queue.clone(),
        pipeline(store, registry_with(&[agent.clone()])),
        listener_config(4, Duration::from_secs(5)),
    );

    queue.send("{not json");
    queue.send(r#"{"agentId": "", "data": {}}"#);

    listener.start().unwrap();
    assert!(wait_until(|| queue.is_empty()).await);
    listener.stop().await;

    let snap = listener.metrics().snapshot();
    assert_eq!(snap.messages_malformed, 2);
    assert_eq!(snap.messages_processed, 0);
    assert_eq!(agent.count(), 0);
}

#[tokio::test]
async fn store_outage_leaves_message_for_redelivery() {
    let store: Arc<dyn RuleStore> = Arc::new(FailingStore);
    let queue = memory_queue(Duration::from_millis(100));
    let listener = listener(
        queue.clone(),
        pipeline(store, registry_with(&[])),
        listener_config(1, Duration::from_secs(5)),
    );

    queue.send(agent_result("Moderate", t0()));
    listener.start().unwrap();

    // Redelivered after the visibility timeout, and still not acked.
    let metrics = listener.metrics().clone();
    assert!(wait_until(|| metrics.snapshot().messages_failed >= 2).await);
    listener.stop().await;

    assert_eq!(queue.len(), 1);
    assert_eq!(metrics.snapshot().messages_processed, 0);
}

#[tokio::test]
async fn store_outage_message_redelivered_with_higher_attempt() {
    let store: Arc<dyn RuleStore> = Arc::new(FailingStore);
    let queue = memory_queue(Duration::from_millis(100));
    let listener = listener(
        queue.clone(),
        pipeline(store, registry_with(&[])),
        listener_config(1, Duration::from_secs(5)),
    );

    queue.send(agent_result("Moderate", t0()));
    listener.start().unwrap();
    let metrics = listener.metrics().clone();
    assert!(wait_until(|| metrics.snapshot().messages_failed >= 1).await);
    listener.stop().await;

    // Once visible again the message comes back with the next attempt.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let batch = queue.poll_batch(1).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert!(batch[0].attempt_count > 1);
}

#[tokio::test]
async fn duplicate_delivery_dispatches_once() {
    let agent = RecordingAgent::new("record", Behaviour::Succeed);
    let store = memory_store(vec![pollen_rule("r1", vec![TargetAgentAction::new("record")])]);
    let queue = memory_queue(Duration::from_secs(30));
    let listener = listener(
        queue.clone(),
        pipeline(store, registry_with(&[agent.clone()])),
        listener_config(8, Duration::from_secs(5)),
    );

    let body = agent_result("Moderate", t0());
    queue.send(body.clone());
    queue.send(body);

    listener.start().unwrap();
    assert!(wait_until(|| queue.is_empty()).await);
    listener.stop().await;

    assert_eq!(agent.count(), 1);
    let snap = listener.metrics().snapshot();
    assert_eq!(snap.messages_processed, 2);
    assert_eq!(snap.triggers_dispatched, 1);
    assert_eq!(snap.triggers_suppressed + snap.cooldown_conflicts, 1);
}

#[tokio::test]
async fn target_failure_still_acks() {
    let bad = RecordingAgent::new("bad", Behaviour::Fail);
    let store = memory_store(vec![pollen_rule("r1", vec![TargetAgentAction::new("bad")])]);
    let queue = memory_queue(Duration::from_secs(30));
    let listener = listener(
        queue.clone(),
        pipeline(store, registry_with(&[bad])),
        listener_config(1, Duration::from_secs(5)),
    );

    queue.send(agent_result("Moderate", t0()));
    listener.start().unwrap();
    assert!(wait_until(|| queue.is_empty()).await);
    listener.stop().await;

    let snap = listener.metrics().snapshot();
    assert_eq!(snap.triggers_dispatched, 1);
    assert_eq!(snap.target_failures, 1);
}

#[tokio::test]
async fn messages_run_concurrently_up_to_the_limit() {
    let slow = RecordingAgent::new("slow", Behaviour::Sleep(Duration::from_millis(300)));
    let mut rules = Vec::new();
    for i in 0..4 {
        let mut rule = pollen_rule(&format!("r{i}"), vec![TargetAgentAction::new("slow")]);
        rule.source.id = format!("agent-{i}");
        rules.push(rule);
    }
    let store = memory_store(rules);
    let queue = memory_queue(Duration::from_secs(30));
    let listener = listener(
        queue.clone(),
        pipeline(store, registry_with(&[slow.clone()])),
        listener_config(4, Duration::from_secs(5)),
    );

    for i in 0..4 {
        let body = agent_result("Moderate", t0()).replace("pollen-agent", &format!("agent-{i}"));
        queue.send(body);
    }

    let started = Instant::now();
    listener.start().unwrap();
    assert!(wait_until(|| slow.count() == 4).await);
    let elapsed = started.elapsed();
    listener.stop().await;

    // Four sequential 300 ms dispatches would take at least 1.2 s.
    assert!(elapsed < Duration::from_millis(1000), "took {elapsed:?}");
}

#[tokio::test]
async fn stop_waits_for_in_flight_pipeline() {
    let slow = RecordingAgent::new("slow", Behaviour::Sleep(Duration::from_millis(300)));
    let store = memory_store(vec![pollen_rule("r1", vec![TargetAgentAction::new("slow")])]);
    let queue = memory_queue(Duration::from_secs(30));
    let listener = listener(
        queue.clone(),
        pipeline(store, registry_with(&[slow.clone()])),
        listener_config(1, Duration::from_secs(5)),
    );

    queue.send(agent_result("Moderate", t0()));
    listener.start().unwrap();
    let metrics = listener.metrics().clone();
    assert!(wait_until(|| metrics.snapshot().in_flight == 1).await);

    listener.stop().await;

    assert_eq!(slow.count(), 1);
    assert!(queue.is_empty());
    assert!(!listener.is_running());
}

#[tokio::test]
async fn stop_detaches_after_grace_period() {
    let slow = RecordingAgent::new("slow", Behaviour::Sleep(Duration::from_millis(1500)));
    let store = memory_store(vec![pollen_rule("r1", vec![TargetAgentAction::new("slow")])]);
    let queue = memory_queue(Duration::from_secs(30));
    let listener = listener(
        queue.clone(),
        pipeline(store, registry_with(&[slow.clone()])),
        listener_config(1, Duration::from_millis(100)),
    );

    queue.send(agent_result("Moderate", t0()));
    listener.start().unwrap();
    let metrics = listener.metrics().clone();
    assert!(wait_until(|| metrics.snapshot().in_flight == 1).await);

    let started = Instant::now();
    listener.stop().await;
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(slow.count(), 0);
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let store = memory_store(Vec::new());
    let queue = memory_queue(Duration::from_secs(30));
    let listener = listener(
        queue,
        pipeline(store, registry_with(&[])),
        listener_config(1, Duration::from_secs(1)),
    );

    listener.start().unwrap();
    assert!(matches!(listener.start(), Err(EngineError::AlreadyStarted)));
    listener.stop().await;
    assert!(matches!(listener.start(), Err(EngineError::AlreadyStarted)));
}

#[tokio::test]
async fn stop_without_start_is_a_noop() {
    let store = memory_store(Vec::new());
    let listener = listener(
        memory_queue(Duration::from_secs(30)),
        pipeline(store, registry_with(&[])),
        listener_config(1, Duration::from_secs(1)),
    );

    listener.stop().await;
    assert!(!listener.is_running());
}
