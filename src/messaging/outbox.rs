use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::OrderEvent;

/// A domain event persisted in the same transaction as the state change that
/// produced it, waiting to be relayed to the event sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: i32,
}

impl OutboxMessage {
    pub fn from_event(event: &OrderEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::now_v7(),
            aggregate_id: event.order_id(),
            event_type: event.name().to_string(),
            payload: serde_json::to_value(event)?,
            created_at: Utc::now(),
            attempts: 0,
        })
    }

    /// Decode the payload back into the typed event.
    pub fn event(&self) -> Result<OrderEvent, serde_json::Error> {
        OrderEvent::deserialize(&self.payload)
    }
}
