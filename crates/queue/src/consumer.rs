//! At-least-once channel contract.
//!
//! The engine settles every delivery in exactly one of two ways:
//!
//! * **ack**: the pipeline for the message finished (even if single rules or
//!   targets failed), or the body could not be decoded at all.
//! * **leave unacked**: the rule store was unreachable. The provider hides the
//!   message until its visibility timeout lapses, then delivers it again with
//!   a higher `attempt_count`.
//!
//! There is no explicit "return to queue" call; redelivery always comes from
//! the visibility timeout, so a crashed worker and a store outage look the
//! same to the provider.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// One delivery of an event message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Provider message id; stable across redeliveries.
    pub id: String,
    /// Undecoded body, expected to be an `AgentResult` JSON object.
    pub body: String,
    /// Token for settling this delivery. A redelivery gets a new one.
    pub receipt_handle: String,
    /// Time the producer enqueued the message.
    pub timestamp: DateTime<Utc>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt_count: u32,
}

/// Snapshot reported by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub connected: bool,
    /// Visible backlog, when the provider reports one.
    pub approximate_message_count: Option<u64>,
    /// `"sqs"` or `"memory"`.
    pub provider: String,
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backlog = match self.approximate_message_count {
            Some(n) => n.to_string(),
            None => "unknown".to_string(),
        };
        write!(
            f,
            "{} queue ({}, backlog {backlog})",
            self.provider,
            if self.connected { "connected" } else { "disconnected" }
        )
    }
}

/// Source of event messages for the ingestion listener.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Receive up to `max_messages` deliveries.
    ///
    /// Each returned message stays hidden from other receivers for the
    /// visibility timeout. An empty batch means nothing arrived within the
    /// provider's wait time.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Settle a delivery for good. Fails if the receipt is unknown or was
    /// superseded by a redelivery.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Check connectivity and report the backlog.
    async fn health_check(&self) -> Result<QueueHealth, QueueError>;

    /// Backlog of the dead-letter queue, if one is configured.
    async fn dlq_depth(&self) -> Result<Option<u64>, QueueError> {
        Ok(None)
    }
}
