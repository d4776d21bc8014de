//! AMQP broker adapter: priority queues, dead-letter exchange, and
//! TTL-based delayed redelivery.
//!
//! Topology: three durable priority queues (`jobs.high`, `jobs.medium`,
//! `jobs.low`, max priority 10) wired to a `dlx` exchange that feeds
//! `jobs.dead_letter` for messages the broker itself cannot deliver.
//! Each band also gets a consumer-less `jobs.<band>.delayed` queue that
//! dead-letters expired messages back into the live queue, which is how
//! a delayed republish becomes deliverable no earlier than
//! `now + delay`.

use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{JobId, JobPriority, JobType};
use crate::Result;

/// Exchange receiving messages the broker could not deliver
pub const DEAD_LETTER_EXCHANGE: &str = "dlx";

/// Queue bound to the dead-letter exchange
pub const DEAD_LETTER_QUEUE: &str = "jobs.dead_letter";

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Wire body for a job message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
    pub job_type: JobType,
    pub payload: Value,
}

impl JobMessage {
    pub fn new(job_id: JobId, job_type: JobType, payload: Value) -> Self {
        Self {
            job_id,
            job_type,
            payload,
        }
    }

    pub fn for_job(job: &crate::models::Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            payload: job.payload.clone(),
        }
    }
}

/// AMQP broker handle. Consumers get their own channel; publishes go
/// through the connection-owned publish channel.
#[derive(Clone)]
pub struct Broker {
    connection: std::sync::Arc<Connection>,
    channel: Channel,
}

impl Broker {
    /// Connect and declare the full topology. Connection establishment
    /// is retried with exponential backoff; transient connectivity
    /// never surfaces as a job failure.
    pub async fn connect(broker_url: &str) -> Result<Self> {
        let mut attempt = 0;
        let connection = loop {
            attempt += 1;
            match Connection::connect(broker_url, ConnectionProperties::default()).await {
                Ok(connection) => break connection,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    let delay = CONNECT_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Broker connection attempt {} failed: {}; retrying in {:?}",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let channel = connection.create_channel().await?;
        declare_topology(&channel).await?;

        info!("Connected to broker at {}", broker_url);

        Ok(Self {
            connection: std::sync::Arc::new(connection),
            channel,
        })
    }

    /// Publish a job message to its priority band. A positive `delay`
    /// routes through the band's delay queue with a per-message TTL.
    pub async fn publish_job(
        &self,
        message: &JobMessage,
        priority: JobPriority,
        delay: Duration,
    ) -> Result<()> {
        let body = serde_json::to_vec(message)?;

        let mut properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into())
            .with_priority(priority.broker_priority());

        let queue = if delay > Duration::ZERO {
            properties = properties.with_expiration(delay.as_millis().to_string().into());
            priority.delayed_queue_name()
        } else {
            priority.queue_name()
        };

        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;

        debug!(
            "Published job {} to {} (delay {:?})",
            message.job_id, queue, delay
        );

        Ok(())
    }

    /// Start consuming a queue on a dedicated channel with per-consumer
    /// prefetch. Deliveries carry their acker; ack/nack is manual.
    pub async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<Consumer> {
        let channel = self.connection.create_channel().await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("Consuming {} (prefetch {})", queue, prefetch);

        Ok(consumer)
    }
}

async fn declare_topology(channel: &Channel) -> Result<()> {
    let durable = QueueDeclareOptions {
        durable: true,
        ..Default::default()
    };

    channel
        .exchange_declare(
            DEAD_LETTER_EXCHANGE,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(DEAD_LETTER_QUEUE, durable, FieldTable::default())
        .await?;

    for priority in JobPriority::ALL {
        // Dead-lettered messages keep their original routing key, so
        // the queue is bound once per band
        channel
            .queue_bind(
                DEAD_LETTER_QUEUE,
                DEAD_LETTER_EXCHANGE,
                priority.queue_name(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let mut args = FieldTable::default();
        args.insert("x-max-priority".into(), AMQPValue::LongInt(10));
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
        );
        channel
            .queue_declare(priority.queue_name(), durable, args)
            .await?;

        // Expired messages dead-letter through the default exchange
        // straight back into the live queue
        let mut delay_args = FieldTable::default();
        delay_args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString("".into()));
        delay_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(priority.queue_name().into()),
        );
        channel
            .queue_declare(priority.delayed_queue_name(), durable, delay_args)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_message_wire_format() {
        let message = JobMessage::new(
            Uuid::new_v4(),
            JobType::SendEmail,
            json!({"to": "a@b", "subject": "s", "body": "x"}),
        );

        let wire: Value = serde_json::from_slice(&serde_json::to_vec(&message).unwrap()).unwrap();

        assert_eq!(wire["job_id"], message.job_id.to_string());
        assert_eq!(wire["job_type"], "send_email");
        assert_eq!(wire["payload"]["to"], "a@b");
    }

    #[test]
    fn test_message_round_trip() {
        let message = JobMessage::new(Uuid::new_v4(), JobType::ProcessVideo, json!({"k": 1}));

        let bytes = serde_json::to_vec(&message).unwrap();
        let parsed: JobMessage = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed, message);
    }

    #[test]
    fn test_unparseable_body_is_rejected() {
        let result = serde_json::from_slice::<JobMessage>(b"not json at all");
        assert!(result.is_err());

        // A valid JSON body with an unregistered type is also poison
        let result =
            serde_json::from_slice::<JobMessage>(br#"{"job_id":"x","job_type":"mine","payload":{}}"#);
        assert!(result.is_err());
    }
}
