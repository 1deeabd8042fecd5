use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use std::time::Duration;

use super::{EventPublisher, OutboxMessage};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes order events to a Redpanda/Kafka topic, keyed by order id so all
/// events of one order land on the same partition in commit order.
pub struct RedpandaPublisher {
    producer: FutureProducer,
    topic: String,
    circuit_breaker: CircuitBreaker,
}

impl RedpandaPublisher {
    pub fn new(brokers: &str, topic: &str) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            topic: topic.to_string(),
            circuit_breaker: CircuitBreaker::new("redpanda", cb_config),
        })
    }
}

#[async_trait]
impl EventPublisher for RedpandaPublisher {
    async fn publish(&self, message: &OutboxMessage) -> anyhow::Result<()> {
        self.circuit_breaker.check()?;

        let key = message.aggregate_id.to_string();
        let payload = serde_json::to_string(&message.payload)?;
        let event_id = message.id.to_string();
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "event_type",
                value: Some(message.event_type.as_str()),
            })
            .insert(Header {
                key: "event_id",
                value: Some(event_id.as_str()),
            });

        let record = FutureRecord::to(&self.topic)
            .key(&key)
            .payload(&payload)
            .headers(headers);

        match self.producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok(_) => {
                self.circuit_breaker.record_success();
                tracing::debug!(
                    topic = %self.topic,
                    event_id = %message.id,
                    event_type = %message.event_type,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err((e, _)) => {
                self.circuit_breaker.record_failure();
                tracing::error!(
                    error = %e,
                    topic = %self.topic,
                    event_id = %message.id,
                    "Failed to publish to Redpanda"
                );
                Err(anyhow::anyhow!("Kafka send error: {}", e))
            }
        }
    }
}
