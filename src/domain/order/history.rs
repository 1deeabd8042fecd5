use std::sync::Arc;
use uuid::Uuid;

use super::errors::LifecycleError;
use super::model::StatusHistoryEntry;
use super::value_objects::OrderStatus;
use crate::store::OrderStore;

// ============================================================================
// Status History Log
// ============================================================================
//
// Append-only audit trail of order status changes. Entries are written by
// the store in the same unit of work as the order update, so this type only
// builds entries and reads them back. Nothing here updates or deletes rows.
//
// ============================================================================

#[derive(Clone)]
pub struct StatusHistoryLog {
    store: Arc<dyn OrderStore>,
}

impl StatusHistoryLog {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Build the entry for a status change, to be committed with the order.
    pub fn record(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        notes: Option<String>,
        changed_by: Option<Uuid>,
    ) -> StatusHistoryEntry {
        StatusHistoryEntry::new(order_id, status, notes, changed_by)
    }

    /// All entries for an order, oldest first.
    pub async fn entries(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, LifecycleError> {
        Ok(self.store.status_history(order_id).await?)
    }

    pub async fn latest(&self, order_id: Uuid) -> Result<Option<StatusHistoryEntry>, LifecycleError> {
        Ok(self.entries(order_id).await?.pop())
    }
}
