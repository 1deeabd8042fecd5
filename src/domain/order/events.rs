use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{ActorRole, OrderStatus};

// ============================================================================
// Order Events - published after the owning transaction commits
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    #[serde(rename = "order.created")]
    Created(OrderCreated),
    #[serde(rename = "order.status.changed")]
    StatusChanged(OrderStatusChanged),
    #[serde(rename = "order.provider.assigned")]
    ProviderAssigned(ProviderAssigned),
    #[serde(rename = "order.cancelled")]
    Cancelled(OrderCancelled),
    #[serde(rename = "order.completed")]
    Completed(OrderCompleted),
}

impl OrderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => "order.created",
            OrderEvent::StatusChanged(_) => "order.status.changed",
            OrderEvent::ProviderAssigned(_) => "order.provider.assigned",
            OrderEvent::Cancelled(_) => "order.cancelled",
            OrderEvent::Completed(_) => "order.completed",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::Created(e) => e.order_id,
            OrderEvent::StatusChanged(e) => e.order_id,
            OrderEvent::ProviderAssigned(e) => e.order_id,
            OrderEvent::Cancelled(e) => e.order_id,
            OrderEvent::Completed(e) => e.order_id,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCreated {
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub vendor_id: Uuid,
    pub service_id: Uuid,
    pub quantity: i32,
    pub total_price: Decimal,
    pub status: OrderStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderStatusChanged {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub changed_by: Uuid,
    pub changed_by_role: ActorRole,
    pub notes: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProviderAssigned {
    pub order_id: Uuid,
    pub vendor_id: Uuid,
    pub provider_id: Uuid,
    pub assigned_by: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCancelled {
    pub order_id: Uuid,
    pub previous_status: OrderStatus,
    pub cancelled_by: Uuid,
    pub cancelled_by_role: ActorRole,
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCompleted {
    pub order_id: Uuid,
    pub vendor_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged_with_public_name() {
        let event = OrderEvent::Cancelled(OrderCancelled {
            order_id: Uuid::new_v4(),
            previous_status: OrderStatus::Assigned,
            cancelled_by: Uuid::new_v4(),
            cancelled_by_role: ActorRole::Vendor,
            reason: Some("out of stock".to_string()),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
        assert_eq!(json["data"]["previous_status"], "ASSIGNED");
        assert_eq!(json["data"]["cancelled_by_role"], "vendor");
        assert_eq!(json["data"]["order_id"], event.order_id().to_string());
    }
}
