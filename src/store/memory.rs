use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{NewOrder, OrderStore, StatusChange, StoreError};
use crate::domain::order::{DeliveryAddress, Order, OrderFilter, StatusHistoryEntry};
use crate::domain::vendor::{Provider, RatingSubject, ServicePrice, Vendor, VendorOffer};
use crate::messaging::OutboxMessage;

// ============================================================================
// In-memory store
// ============================================================================
//
// A single mutex guards all state, so each unit of work is trivially atomic
// and serialized. Used by tests and by the binary when no database is set.
//
// ============================================================================

struct OutboxRow {
    message: OutboxMessage,
    published: bool,
    dead_lettered: bool,
}

impl OutboxRow {
    fn new(message: OutboxMessage) -> Self {
        Self {
            message,
            published: false,
            dead_lettered: false,
        }
    }
}

#[derive(Default)]
struct State {
    vendors: HashMap<Uuid, Vendor>,
    prices: HashMap<(Uuid, Uuid), ServicePrice>,
    providers: HashMap<Uuid, Provider>,
    addresses: HashMap<Uuid, DeliveryAddress>,
    orders: HashMap<Uuid, Order>,
    order_numbers: HashSet<String>,
    history: Vec<StatusHistoryEntry>,
    ratings: Vec<(RatingSubject, i16)>,
    outbox: Vec<OutboxRow>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    fail_rating_writes: Mutex<bool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vendor(&self, vendor: Vendor) {
        self.state.lock().vendors.insert(vendor.id, vendor);
    }

    pub fn set_service_price(&self, vendor_id: Uuid, service_id: Uuid, unit_price: Decimal, service_fee: Decimal) {
        self.state.lock().prices.insert(
            (vendor_id, service_id),
            ServicePrice {
                service_id,
                unit_price,
                service_fee,
            },
        );
    }

    pub fn add_provider(&self, provider: Provider) {
        self.state.lock().providers.insert(provider.id, provider);
    }

    pub fn set_provider_available(&self, provider_id: Uuid, available: bool) {
        if let Some(provider) = self.state.lock().providers.get_mut(&provider_id) {
            provider.is_available = available;
        }
    }

    pub fn add_address(&self, address: DeliveryAddress) {
        self.state.lock().addresses.insert(address.id, address);
    }

    pub fn add_rating(&self, subject: RatingSubject, score: i16) {
        self.state.lock().ratings.push((subject, score));
    }

    /// Make every rating write fail with a backend error.
    pub fn fail_rating_writes(&self, fail: bool) {
        *self.fail_rating_writes.lock() = fail;
    }

    /// Claim an order number as if another order already used it.
    pub fn reserve_order_number(&self, order_number: &str) {
        self.state.lock().order_numbers.insert(order_number.to_string());
    }

    pub fn outbox_len(&self) -> usize {
        self.state.lock().outbox.len()
    }

    pub fn dead_lettered(&self) -> usize {
        self.state.lock().outbox.iter().filter(|row| row.dead_lettered).count()
    }
}

fn order_not_found(id: Uuid) -> StoreError {
    StoreError::NotFound { entity: "order", id }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn address(&self, address_id: Uuid) -> Result<DeliveryAddress, StoreError> {
        self.state
            .lock()
            .addresses
            .get(&address_id)
            .copied()
            .ok_or(StoreError::NotFound { entity: "address", id: address_id })
    }

    async fn vendor(&self, vendor_id: Uuid) -> Result<Vendor, StoreError> {
        self.state
            .lock()
            .vendors
            .get(&vendor_id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "vendor", id: vendor_id })
    }

    async fn provider(&self, provider_id: Uuid) -> Result<Provider, StoreError> {
        self.state
            .lock()
            .providers
            .get(&provider_id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "provider", id: provider_id })
    }

    async fn active_vendors(&self) -> Result<Vec<Vendor>, StoreError> {
        Ok(self.state.lock().vendors.values().filter(|v| v.is_active).cloned().collect())
    }

    async fn active_offers(&self, service_id: Uuid) -> Result<Vec<VendorOffer>, StoreError> {
        let state = self.state.lock();
        let offers = state
            .prices
            .iter()
            .filter(|((_, sid), _)| *sid == service_id)
            .filter_map(|((vendor_id, _), price)| {
                state
                    .vendors
                    .get(vendor_id)
                    .filter(|v| v.is_active)
                    .map(|vendor| VendorOffer {
                        vendor: vendor.clone(),
                        price: *price,
                    })
            })
            .collect();
        Ok(offers)
    }

    async fn order(&self, order_id: Uuid) -> Result<Order, StoreError> {
        self.state
            .lock()
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| order_not_found(order_id))
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock();
        let mut orders: Vec<Order> = state.orders.values().filter(|o| filter.matches(o)).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            orders.truncate(limit.max(0) as usize);
        }
        Ok(orders)
    }

    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        let state = self.state.lock();
        if !state.orders.contains_key(&order_id) {
            return Err(order_not_found(order_id));
        }
        // insertion order is commit order
        Ok(state.history.iter().filter(|e| e.order_id == order_id).cloned().collect())
    }

    async fn insert_order(&self, new_order: NewOrder) -> Result<Order, StoreError> {
        let mut state = self.state.lock();
        let NewOrder { order, history, outbox } = new_order;

        if !state.order_numbers.insert(order.order_number.clone()) {
            return Err(StoreError::DuplicateOrderNumber(order.order_number));
        }

        state.history.push(history);
        state.outbox.push(OutboxRow::new(outbox));
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn commit_status_change(&self, change: StatusChange) -> Result<Order, StoreError> {
        let mut state = self.state.lock();

        let order = state.orders.get(&change.order_id).ok_or_else(|| order_not_found(change.order_id))?;
        if order.status != change.expected_status {
            return Err(StoreError::StatusConflict {
                order_id: change.order_id,
                expected: change.expected_status,
            });
        }

        // check every target before mutating anything
        if let Some(credit) = change.job_credit {
            if !state.vendors.contains_key(&credit.vendor_id) {
                return Err(StoreError::NotFound { entity: "vendor", id: credit.vendor_id });
            }
            if let Some(provider_id) = credit.provider_id {
                if !state.providers.contains_key(&provider_id) {
                    return Err(StoreError::NotFound { entity: "provider", id: provider_id });
                }
            }
        }

        if let Some(credit) = change.job_credit {
            if let Some(vendor) = state.vendors.get_mut(&credit.vendor_id) {
                vendor.completed_jobs += 1;
            }
            if let Some(provider) = credit.provider_id.and_then(|id| state.providers.get_mut(&id)) {
                provider.completed_jobs += 1;
            }
        }

        let order = state
            .orders
            .get_mut(&change.order_id)
            .ok_or_else(|| order_not_found(change.order_id))?;
        order.status = change.new_status;
        if change.provider_id.is_some() {
            order.provider_id = change.provider_id;
        }
        if order.completed_at.is_none() {
            order.completed_at = change.completed_at;
        }
        order.updated_at = Utc::now();
        let updated = order.clone();

        state.history.push(change.history);
        state.outbox.push(OutboxRow::new(change.outbox));

        Ok(updated)
    }

    async fn rating_scores(&self, subject: RatingSubject) -> Result<Vec<i16>, StoreError> {
        Ok(self
            .state
            .lock()
            .ratings
            .iter()
            .filter(|(s, _)| *s == subject)
            .map(|(_, score)| *score)
            .collect())
    }

    async fn set_rating(&self, subject: RatingSubject, rating: Option<Decimal>) -> Result<(), StoreError> {
        if *self.fail_rating_writes.lock() {
            return Err(StoreError::backend("rating write rejected"));
        }

        let mut state = self.state.lock();
        match subject {
            RatingSubject::Vendor(id) => {
                let vendor = state.vendors.get_mut(&id).ok_or(StoreError::NotFound { entity: "vendor", id })?;
                vendor.rating = rating;
            }
            RatingSubject::Provider(id) => {
                let provider = state
                    .providers
                    .get_mut(&id)
                    .ok_or(StoreError::NotFound { entity: "provider", id })?;
                provider.rating = rating;
            }
        }
        Ok(())
    }

    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        Ok(self
            .state
            .lock()
            .outbox
            .iter()
            .filter(|row| !row.published && !row.dead_lettered)
            .map(|row| row.message.clone())
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn mark_outbox_published(&self, message_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let row = find_outbox_row(&mut state, message_id)?;
        row.published = true;
        Ok(())
    }

    async fn record_outbox_failure(
        &self,
        message_id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let row = find_outbox_row(&mut state, message_id)?;

        row.message.attempts += 1;
        row.dead_lettered = row.message.attempts >= max_attempts;
        tracing::debug!(
            event_id = %message_id,
            attempts = row.message.attempts,
            error = error,
            "Outbox publish failure recorded"
        );
        Ok(row.dead_lettered)
    }
}

fn find_outbox_row(state: &mut State, message_id: Uuid) -> Result<&mut OutboxRow, StoreError> {
    state
        .outbox
        .iter_mut()
        .find(|row| row.message.id == message_id)
        .ok_or(StoreError::NotFound { entity: "outbox message", id: message_id })
}
