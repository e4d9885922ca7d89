//! Long-lived consumer of the inbound measurement queue.
//!
//! Each delivered message is decoded and run through the [`Pipeline`] on its
//! own task. A message is acked once its pipeline completes, including when
//! only individual rules or targets failed. Undecodable messages are acked
//! and dropped. A rule store failure leaves the message unacked so the queue
//! redelivers it after the visibility timeout.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use ifthen_core::config::EngineConfig;
use ifthen_queue::{parse_message, QueueConsumer, QueueMessage};

use crate::error::EngineError;
use crate::metrics::{EngineMetrics, InFlightGuard};
use crate::pipeline::Pipeline;

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Upper bound on messages processed concurrently.
    pub max_in_flight: usize,
    pub poll_batch_size: u32,
    /// Pause after a failed poll.
    pub poll_backoff: Duration,
    /// How long `stop()` waits for in-flight pipelines.
    pub shutdown_grace: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ListenerConfig {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            max_in_flight: cfg.max_in_flight.max(1),
            poll_batch_size: cfg.poll_batch_size.max(1),
            poll_backoff: Duration::from_millis(cfg.poll_interval_ms),
            shutdown_grace: Duration::from_secs(cfg.shutdown_grace_secs),
        }
    }
}

pub struct IngestionListener {
    consumer: Arc<dyn QueueConsumer>,
    pipeline: Arc<Pipeline>,
    metrics: Arc<EngineMetrics>,
    config: ListenerConfig,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionListener {
    pub fn new(
        consumer: Arc<dyn QueueConsumer>,
        pipeline: Arc<Pipeline>,
        metrics: Arc<EngineMetrics>,
        config: ListenerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            consumer,
            pipeline,
            metrics,
            config,
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .expect("listener lock poisoned")
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    /// Begin consuming. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut handle = self.handle.lock().expect("listener lock poisoned");
        if handle.is_some() || *self.shutdown_tx.borrow() {
            return Err(EngineError::AlreadyStarted);
        }

        info!(
            max_in_flight = self.config.max_in_flight,
            poll_batch_size = self.config.poll_batch_size,
            "ingestion listener started"
        );

        *handle = Some(tokio::spawn(run_loop(
            self.consumer.clone(),
            self.pipeline.clone(),
            self.metrics.clone(),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        )));
        Ok(())
    }

    /// Stop polling and wait for in-flight pipelines, up to the grace period.
    ///
    /// Pipelines still running at the deadline are detached, not aborted.
    /// Calling `stop()` on a listener that never started is a no-op.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().expect("listener lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "listener loop panicked");
            }
            info!("ingestion listener stopped");
        }
    }
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

async fn run_loop(
    consumer: Arc<dyn QueueConsumer>,
    pipeline: Arc<Pipeline>,
    metrics: Arc<EngineMetrics>,
    config: ListenerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(config.max_in_flight));
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        while let Some(res) = tasks.try_join_next() {
            if let Err(e) = res {
                error!(error = %e, "message task panicked");
            }
        }

        // Only poll once at least one slot is free.
        let first_permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = shutdown_requested(&mut shutdown) => break,
        };
        let free = (semaphore.available_permits() + 1).min(config.poll_batch_size as usize);

        let polled = tokio::select! {
            res = consumer.poll_batch(free as u32) => res,
            _ = shutdown_requested(&mut shutdown) => break,
        };

        let messages = match polled {
            Ok(messages) => messages,
            Err(e) => {
                EngineMetrics::incr(&metrics.poll_errors);
                warn!(error = %e, backoff_ms = config.poll_backoff.as_millis() as u64, "queue poll failed");
                drop(first_permit);
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_backoff) => continue,
                    _ = shutdown_requested(&mut shutdown) => break,
                }
            }
        };

        if messages.is_empty() {
            continue;
        }
        debug!(count = messages.len(), "received messages");

        let mut first_permit = Some(first_permit);
        for msg in messages {
            let permit = match first_permit.take() {
                Some(p) => p,
                None => match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let consumer = consumer.clone();
            let pipeline = pipeline.clone();
            let metrics = metrics.clone();
            tasks.spawn(async move {
                process_message(consumer.as_ref(), &pipeline, &metrics, msg).await;
                drop(permit);
            });
        }
    }

    drain(tasks, config.shutdown_grace).await;
}

async fn drain(mut tasks: JoinSet<()>, grace: Duration) {
    if tasks.is_empty() {
        return;
    }
    info!(in_flight = tasks.len(), grace_secs = grace.as_secs(), "waiting for in-flight messages");

    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Err(e))) => error!(error = %e, "message task panicked"),
            Ok(Some(Ok(()))) => {}
            Ok(None) => break,
            Err(_) => {
                warn!(
                    detached = tasks.len(),
                    "shutdown grace elapsed, detaching in-flight messages"
                );
                tasks.detach_all();
                break;
            }
        }
    }
}

/// Decode, evaluate, dispatch and settle one message.
pub(crate) async fn process_message(
    consumer: &dyn QueueConsumer,
    pipeline: &Pipeline,
    metrics: &EngineMetrics,
    msg: QueueMessage,
) {
    let _in_flight = InFlightGuard::enter(&metrics.in_flight);
    EngineMetrics::incr(&metrics.messages_received);

    let event = match parse_message(&msg) {
        Ok(event) => event,
        Err(e) => {
            EngineMetrics::incr(&metrics.messages_malformed);
            warn!(
                message_id = %msg.id,
                attempt = msg.attempt_count,
                error = %e,
                "MalformedMessage: dropping undecodable payload"
            );
            ack(consumer, metrics, &msg).await;
            return;
        }
    };

    match pipeline.process_event(&event).await {
        Ok(report) => {
            metrics.record_report(&report);
            ack(consumer, metrics, &msg).await;
        }
        Err(e) => {
            EngineMetrics::incr(&metrics.messages_failed);
            error!(
                message_id = %msg.id,
                agent_id = %event.agent_id,
                attempt = msg.attempt_count,
                error = %e,
                "RuleStoreUnavailable: leaving message for redelivery"
            );
        }
    }
}

async fn ack(consumer: &dyn QueueConsumer, metrics: &EngineMetrics, msg: &QueueMessage) {
    if let Err(e) = consumer.ack(&msg.receipt_handle).await {
        EngineMetrics::incr(&metrics.ack_failures);
        warn!(message_id = %msg.id, error = %e, "failed to ack message");
    }
}
