// ============================================================================
// Messaging - event sink for committed order events
// ============================================================================
//
// Events reach the sink only through the outbox relay, after the transaction
// that produced them has committed. Delivery is at-least-once.
//
// ============================================================================

mod outbox;
mod redpanda;

use async_trait::async_trait;
use parking_lot::Mutex;

pub use outbox::OutboxMessage;
pub use redpanda::RedpandaPublisher;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: &OutboxMessage) -> anyhow::Result<()>;
}

/// Writes events to the log. Used when no broker is configured.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, message: &OutboxMessage) -> anyhow::Result<()> {
        tracing::info!(
            event_id = %message.id,
            event_type = %message.event_type,
            order_id = %message.aggregate_id,
            payload = %message.payload,
            "Order event"
        );
        Ok(())
    }
}

/// Keeps published events in memory, optionally failing every publish.
#[derive(Default)]
pub struct InMemoryPublisher {
    published: Mutex<Vec<OutboxMessage>>,
    failing: Mutex<bool>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn published(&self) -> Vec<OutboxMessage> {
        self.published.lock().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.published.lock().iter().map(|m| m.event_type.clone()).collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, message: &OutboxMessage) -> anyhow::Result<()> {
        if *self.failing.lock() {
            anyhow::bail!("publisher unavailable");
        }
        self.published.lock().push(message.clone());
        Ok(())
    }
}
