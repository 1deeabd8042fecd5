use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pricing::PriceSnapshot;
use super::value_objects::{ActorContext, ActorRole, OrderStatus, PaymentMethod, PaymentStatus};
use crate::geo::Coordinates;

// ============================================================================
// Order records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub vendor_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub address_id: Uuid,
    pub service_id: Uuid,
    pub status: OrderStatus,
    pub quantity: i32,

    // Price snapshot, never recomputed after creation
    pub unit_price: Decimal,
    pub service_fee: Decimal,
    pub total_price: Decimal,

    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,

    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn price_snapshot(&self) -> PriceSnapshot {
        PriceSnapshot {
            unit_price: self.unit_price,
            service_fee: self.service_fee,
            total_price: self.total_price,
        }
    }

    /// Whether `actor` is a party to this order.
    pub fn involves(&self, actor: &ActorContext) -> bool {
        match actor.role {
            ActorRole::Customer => self.customer_id == actor.id,
            ActorRole::Vendor => self.vendor_id == actor.id,
            ActorRole::Provider => self.provider_id == Some(actor.id),
            ActorRole::Admin => true,
        }
    }
}

/// Append-only audit record of one status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub changed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn new(order_id: Uuid, status: OrderStatus, notes: Option<String>, changed_by: Option<Uuid>) -> Self {
        Self {
            id: Uuid::now_v7(),
            order_id,
            status,
            notes,
            changed_by,
            created_at: Utc::now(),
        }
    }
}

/// A customer-owned delivery address, as seen by the order core.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub coordinates: Coordinates,
}

/// Result of order creation: the stored order plus the matched vendor's distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub order: Order,
    pub vendor_distance_km: f64,
}

/// Listing criteria. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub customer_id: Option<Uuid>,
    pub vendor_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.customer_id.map_or(true, |id| order.customer_id == id)
            && self.vendor_id.map_or(true, |id| order.vendor_id == id)
            && self.provider_id.map_or(true, |id| order.provider_id == Some(id))
            && self.status.map_or(true, |status| order.status == status)
    }
}
