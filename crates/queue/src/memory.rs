//! In-process queue with SQS-like visibility semantics.
//!
//! Backs the `stdin` queue of the engine binary and the integration tests.
//! Received messages become invisible for the visibility timeout; unacked
//! messages reappear afterwards with a higher attempt count.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::debug;

use crate::consumer::{QueueConsumer, QueueHealth, QueueMessage};
use crate::error::QueueError;

struct Entry {
    id: String,
    body: String,
    sent_at: DateTime<Utc>,
    receive_count: u32,
    receipt: Option<String>,
    invisible_until: Option<Instant>,
}

impl Entry {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    entries: Vec<Entry>,
}

pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    visibility_timeout: Duration,
    /// How long `poll_batch` waits for a message before returning empty.
    wait_time: Duration,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            visibility_timeout,
            wait_time: Duration::from_millis(200),
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Enqueue a message body, returning its id.
    pub fn send(&self, body: impl Into<String>) -> String {
        let id = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.next_id += 1;
            let id = format!("mem-{}", inner.next_id);
            inner.entries.push(Entry {
                id: id.clone(),
                body: body.into(),
                sent_at: Utc::now(),
                receive_count: 0,
                receipt: None,
                invisible_until: None,
            });
            id
        };
        self.notify.notify_one();
        id
    }

    /// Messages not yet acked, visible or not.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages received and neither acked nor returned yet.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .entries
            .iter()
            .filter(|e| !e.is_visible(now))
            .count()
    }

    fn receive(&self, max_messages: usize) -> Vec<QueueMessage> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let mut out = Vec::new();
        for entry in inner.entries.iter_mut() {
            if out.len() >= max_messages {
                break;
            }
            if !entry.is_visible(now) {
                continue;
            }
            entry.receive_count += 1;
            let receipt = format!("{}#{}", entry.id, entry.receive_count);
            entry.receipt = Some(receipt.clone());
            entry.invisible_until = Some(now + self.visibility_timeout);
            out.push(QueueMessage {
                id: entry.id.clone(),
                body: entry.body.clone(),
                receipt_handle: receipt,
                timestamp: entry.sent_at,
                attempt_count: entry.receive_count,
            });
        }
        out
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let max = max_messages as usize;
        let batch = self.receive(max);
        if !batch.is_empty() {
            return Ok(batch);
        }
        // Nothing visible: wait for a send, or for the wait time to lapse.
        let _ = tokio::time::timeout(self.wait_time, self.notify.notified()).await;
        Ok(self.receive(max))
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let before = inner.entries.len();
        inner
            .entries
            .retain(|e| e.receipt.as_deref() != Some(receipt_handle));
        if inner.entries.len() == before {
            return Err(QueueError::NotFound(receipt_handle.to_string()));
        }
        debug!(receipt_handle, "Acked in-memory message");
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        Ok(QueueHealth {
            connected: true,
            approximate_message_count: Some(self.len() as u64),
            provider: "memory".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(visibility_ms: u64) -> MemoryQueue {
        MemoryQueue::new(Duration::from_millis(visibility_ms)).with_wait_time(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn received_message_is_invisible_until_acked() {
        let q = queue(60_000);
        q.send("a");

        let batch = q.poll_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].attempt_count, 1);
        assert!(q.poll_batch(10).await.unwrap().is_empty());
        assert_eq!(q.in_flight(), 1);

        q.ack(&batch[0].receipt_handle).await.unwrap();
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_after_visibility_timeout() {
        let q = queue(30);
        let id = q.send("a");

        let first = q.poll_batch(10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = q.poll_batch(10).await.unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, id);
        assert_eq!(second[0].attempt_count, 2);
        assert_ne!(first[0].receipt_handle, second[0].receipt_handle);

        // The superseded receipt no longer acks anything.
        assert!(q.ack(&first[0].receipt_handle).await.is_err());
        q.ack(&second[0].receipt_handle).await.unwrap();
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn poll_respects_max_messages_and_order() {
        let q = queue(60_000);
        for body in ["a", "b", "c"] {
            q.send(body);
        }

        let batch = q.poll_batch(2).await.unwrap();
        let bodies: Vec<&str> = batch.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["a", "b"]);
        assert_eq!(q.poll_batch(2).await.unwrap()[0].body, "c");
    }

    #[tokio::test]
    async fn poll_wakes_on_send() {
        let q = std::sync::Arc::new(
            MemoryQueue::new(Duration::from_secs(60)).with_wait_time(Duration::from_secs(5)),
        );
        let poller = {
            let q = q.clone();
            tokio::spawn(async move { q.poll_batch(1).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.send("late");

        let batch = poller.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }
}
