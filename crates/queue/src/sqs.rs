//! Amazon SQS as the event channel.
//!
//! Settlement maps onto SQS directly: `ack` deletes the message, and a
//! message that is never deleted is redelivered by SQS once the receive-time
//! visibility timeout runs out. `ApproximateReceiveCount` becomes the
//! message's `attempt_count`, so a redrive policy on the queue can move
//! messages that keep failing into the dead-letter queue.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::{BehaviorVersion, Region};
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

use ifthen_core::config::{AwsConfig, QueueConfig};

use crate::consumer::{QueueConsumer, QueueHealth, QueueMessage};
use crate::error::QueueError;

/// Largest batch a single `ReceiveMessage` call returns.
const SQS_MAX_BATCH: u32 = 10;
/// Long-poll wait per receive.
const SQS_WAIT_SECS: i32 = 20;

pub struct SqsConsumer {
    client: Client,
    queue_url: String,
    dlq_url: Option<String>,
    visibility_timeout_secs: i32,
}

impl SqsConsumer {
    /// Build a client for `queue.queue_url`.
    ///
    /// Static keys from the config win; without them the default AWS
    /// provider chain supplies credentials.
    pub async fn new(aws: &AwsConfig, queue: &QueueConfig) -> Result<Self, QueueError> {
        if !queue.is_configured() {
            return Err(QueueError::Connection("QUEUE_URL is not set".into()));
        }

        let region = Region::new(aws.region.clone());
        let mut builder = aws_sdk_sqs::Config::builder()
            .region(region.clone())
            .behavior_version(BehaviorVersion::latest());

        match (&aws.access_key_id, &aws.secret_access_key) {
            (Some(key_id), Some(secret)) => {
                builder = builder.credentials_provider(Credentials::new(
                    key_id,
                    secret,
                    aws.session_token.clone(),
                    None,
                    "ifthen-static",
                ));
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                builder.set_credentials_provider(shared.credentials_provider());
            }
        }

        if let Some(endpoint) = aws.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(with_scheme(endpoint));
        }

        info!(queue_url = %queue.queue_url, region = %aws.region, "SQS event channel ready");

        Ok(Self {
            client: Client::from_conf(builder.build()),
            queue_url: queue.queue_url.clone(),
            dlq_url: queue.dlq_url.clone(),
            visibility_timeout_secs: i32::try_from(queue.visibility_timeout_secs)
                .unwrap_or(i32::MAX),
        })
    }

    /// `ApproximateNumberOfMessages` of the queue at `url`.
    async fn backlog(&self, url: &str) -> Result<Option<u64>, QueueError> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("GetQueueAttributes on {url}: {e:?}")))?;

        Ok(resp
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse().ok()))
    }
}

/// Local endpoints are often given as `host:port`.
fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

fn system_attr<'a>(msg: &'a Message, name: &MessageSystemAttributeName) -> Option<&'a str> {
    msg.attributes()?.get(name).map(String::as_str)
}

/// Convert one SQS delivery, requiring the receipt handle needed to ack it.
fn to_queue_message(msg: Message) -> Result<QueueMessage, QueueError> {
    let receipt_handle = msg
        .receipt_handle()
        .ok_or_else(|| QueueError::Parse("SQS message without receipt handle".into()))?
        .to_string();

    // SentTimestamp is epoch millis.
    let timestamp: DateTime<Utc> = system_attr(&msg, &MessageSystemAttributeName::SentTimestamp)
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    let attempt_count =
        system_attr(&msg, &MessageSystemAttributeName::ApproximateReceiveCount)
            .and_then(|c| c.parse().ok())
            .unwrap_or(1);

    Ok(QueueMessage {
        id: msg.message_id().unwrap_or("unknown").to_string(),
        body: msg.body().unwrap_or_default().to_string(),
        receipt_handle,
        timestamp,
        attempt_count,
    })
}

#[async_trait]
impl QueueConsumer for SqsConsumer {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let batch = max_messages.clamp(1, SQS_MAX_BATCH) as i32;

        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(batch)
            .wait_time_seconds(SQS_WAIT_SECS)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::SentTimestamp)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("ReceiveMessage: {e:?}")))?;

        let messages = resp
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(to_queue_message)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(requested = batch, received = messages.len(), "SQS receive");
        Ok(messages)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Ack(format!("DeleteMessage: {e:?}")))?;
        debug!(receipt_handle, "SQS message deleted");
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        let backlog = self.backlog(&self.queue_url).await?;
        Ok(QueueHealth {
            connected: true,
            approximate_message_count: backlog,
            provider: "sqs".to_string(),
        })
    }

    async fn dlq_depth(&self) -> Result<Option<u64>, QueueError> {
        match &self.dlq_url {
            Some(url) => self.backlog(url).await,
            None => Ok(None),
        }
    }
}
