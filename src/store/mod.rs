// ============================================================================
// Store - storage collaborator boundary
// ============================================================================
//
// Every mutating call is one atomic unit of work: the order row, its new
// status history entry, any counter increments and the outbox message for
// the resulting event are committed together or not at all.
//
// Status writes are conditional on the status the caller validated against.
// A lost race surfaces as `StoreError::StatusConflict`.
//
// ============================================================================

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::order::{DeliveryAddress, Order, OrderFilter, OrderStatus, StatusHistoryEntry};
use crate::domain::vendor::{Provider, RatingSubject, Vendor, VendorOffer};
use crate::messaging::OutboxMessage;
use crate::utils::IsTransient;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("order {order_id} is no longer in status {expected}")]
    StatusConflict { order_id: Uuid, expected: OrderStatus },

    #[error("order number {0} already exists")]
    DuplicateOrderNumber(String),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        let message: String = message.into();
        StoreError::Backend(message.into())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

/// A new order with its first history entry and `order.created` event.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order: Order,
    pub history: StatusHistoryEntry,
    pub outbox: OutboxMessage,
}

/// Completed-job counters incremented alongside a completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobCredit {
    pub vendor_id: Uuid,
    pub provider_id: Option<Uuid>,
}

/// One status change of one order.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub order_id: Uuid,
    /// Status the change was validated against
    pub expected_status: OrderStatus,
    pub new_status: OrderStatus,
    /// Set the assigned provider
    pub provider_id: Option<Uuid>,
    /// Stamp completion time, only if not already stamped
    pub completed_at: Option<DateTime<Utc>>,
    pub job_credit: Option<JobCredit>,
    pub history: StatusHistoryEntry,
    pub outbox: OutboxMessage,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    // Reads
    async fn address(&self, address_id: Uuid) -> Result<DeliveryAddress, StoreError>;
    async fn vendor(&self, vendor_id: Uuid) -> Result<Vendor, StoreError>;
    async fn provider(&self, provider_id: Uuid) -> Result<Provider, StoreError>;
    async fn active_vendors(&self) -> Result<Vec<Vendor>, StoreError>;
    /// Active vendors with a price link for `service_id`
    async fn active_offers(&self, service_id: Uuid) -> Result<Vec<VendorOffer>, StoreError>;
    async fn order(&self, order_id: Uuid) -> Result<Order, StoreError>;
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;
    /// Oldest first
    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, StoreError>;

    // Units of work
    async fn insert_order(&self, new_order: NewOrder) -> Result<Order, StoreError>;
    async fn commit_status_change(&self, change: StatusChange) -> Result<Order, StoreError>;

    // Ratings
    async fn rating_scores(&self, subject: RatingSubject) -> Result<Vec<i16>, StoreError>;
    async fn set_rating(&self, subject: RatingSubject, rating: Option<Decimal>) -> Result<(), StoreError>;

    // Outbox
    /// Unpublished, non-dead-lettered messages in commit order
    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError>;
    async fn mark_outbox_published(&self, message_id: Uuid) -> Result<(), StoreError>;
    /// Returns true when the message was dead-lettered by this failure
    async fn record_outbox_failure(
        &self,
        message_id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> Result<bool, StoreError>;
}
