use actix::Recipient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::errors::LifecycleError;
use super::events::{OrderCancelled, OrderCompleted, OrderCreated, OrderEvent, OrderStatusChanged, ProviderAssigned};
use super::history::StatusHistoryLog;
use super::model::{CreatedOrder, Order, OrderFilter, StatusHistoryEntry};
use super::pricing::{generate_order_number, EtaPolicy, PriceSnapshot};
use super::state_machine::OrderStateMachine;
use super::value_objects::{ActorContext, ActorRole, OrderStatus, PaymentMethod, PaymentStatus, Quantity};
use crate::actors::RefreshRatings;
use crate::domain::vendor::{RankedVendor, VendorMatcher};
use crate::geo::{Coordinates, ServiceRegion};
use crate::messaging::OutboxMessage;
use crate::metrics::Metrics;
use crate::store::{JobCredit, NewOrder, OrderStore, StatusChange, StoreError};

// ============================================================================
// Order Lifecycle Orchestrator
// ============================================================================
//
// Each mutating operation is:
//   1. load the order
//   2. authorize the actor and validate against the state machine
//   3. commit order update + history entry + outbox event in one store call
//
// The commit is conditional on the status read in step 1. When another
// writer got there first the store reports a conflict and the whole cycle
// runs again against the fresh row, up to `transition_attempts` times.
//
// Work after the commit (rating refresh) is handed to a background actor
// and can never undo the committed change.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecycleConfig {
    pub eta: EtaPolicy,
    /// Attempts at generating an unused order number
    pub order_number_attempts: u32,
    /// Attempts at committing a status change that keeps losing races
    pub transition_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            eta: EtaPolicy::default(),
            order_number_attempts: 3,
            transition_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    pub address_id: Uuid,
    pub service_id: Uuid,
    pub quantity: i32,
    pub payment_method: PaymentMethod,
}

type OrderNumberGenerator = Arc<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;

pub struct OrderLifecycle {
    store: Arc<dyn OrderStore>,
    matcher: VendorMatcher,
    history: StatusHistoryLog,
    rating_refresh: Option<Recipient<RefreshRatings>>,
    metrics: Option<Arc<Metrics>>,
    order_numbers: OrderNumberGenerator,
    config: LifecycleConfig,
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn OrderStore>, region: ServiceRegion, config: LifecycleConfig) -> Self {
        Self {
            matcher: VendorMatcher::new(store.clone(), region),
            history: StatusHistoryLog::new(store.clone()),
            store,
            rating_refresh: None,
            metrics: None,
            order_numbers: Arc::new(generate_order_number),
            config,
        }
    }

    pub fn with_rating_refresh(mut self, recipient: Recipient<RefreshRatings>) -> Self {
        self.rating_refresh = Some(recipient);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_order_number_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(DateTime<Utc>) -> String + Send + Sync + 'static,
    {
        self.order_numbers = Arc::new(generator);
        self
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub async fn create(
        &self,
        request: CreateOrderRequest,
        actor: &ActorContext,
    ) -> Result<CreatedOrder, LifecycleError> {
        let started = Instant::now();
        let result = self.create_order(request, actor).await;
        self.finish("create", started, result)
    }

    /// Move an order along the transition table.
    ///
    /// `COMPLETED` and `CANCELLED` are routed to [`Self::complete`] and
    /// [`Self::cancel`]. `ASSIGNED` through here leaves the provider empty;
    /// use [`Self::assign_provider`] to set one. Requesting the status the
    /// order already has succeeds without writing history or emitting an
    /// event, so a successful call does not always add a history entry.
    pub async fn transition(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &ActorContext,
        notes: Option<String>,
    ) -> Result<Order, LifecycleError> {
        match new_status {
            OrderStatus::Completed => return self.complete(order_id, actor).await,
            OrderStatus::Cancelled => return self.cancel(order_id, actor, notes).await,
            _ => {}
        }

        let started = Instant::now();
        let result = self.transition_order(order_id, new_status, actor, notes).await;
        self.finish("transition", started, result)
    }

    pub async fn assign_provider(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        actor: &ActorContext,
    ) -> Result<Order, LifecycleError> {
        let started = Instant::now();
        let result = self.assign(order_id, provider_id, actor).await;
        self.finish("assign_provider", started, result)
    }

    pub async fn cancel(
        &self,
        order_id: Uuid,
        actor: &ActorContext,
        reason: Option<String>,
    ) -> Result<Order, LifecycleError> {
        let started = Instant::now();
        let result = self.cancel_order(order_id, actor, reason).await;
        self.finish("cancel", started, result)
    }

    pub async fn complete(&self, order_id: Uuid, actor: &ActorContext) -> Result<Order, LifecycleError> {
        let started = Instant::now();
        let result = self.complete_order(order_id, actor).await;
        if let Ok(order) = &result {
            self.request_rating_refresh(order);
        }
        self.finish("complete", started, result)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_order(&self, order_id: Uuid, actor: &ActorContext) -> Result<Order, LifecycleError> {
        let order = self.store.order(order_id).await?;
        ensure_involved(&order, actor)?;
        Ok(order)
    }

    pub async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, LifecycleError> {
        self.history.entries(order_id).await
    }

    /// Newest first.
    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, LifecycleError> {
        Ok(self.store.list_orders(filter).await?)
    }

    pub async fn nearby_vendors(&self, at: Coordinates, limit: usize) -> Result<Vec<RankedVendor>, LifecycleError> {
        self.matcher.find_nearest(at, limit).await
    }

    // ========================================================================
    // Operation bodies
    // ========================================================================

    async fn create_order(
        &self,
        request: CreateOrderRequest,
        actor: &ActorContext,
    ) -> Result<CreatedOrder, LifecycleError> {
        let quantity = Quantity::new(request.quantity).ok_or(LifecycleError::InvalidQuantity(request.quantity))?;

        let acting_for_self = actor.role == ActorRole::Customer && actor.id == request.customer_id;
        if !acting_for_self && actor.role != ActorRole::Admin {
            return Err(LifecycleError::Forbidden(format!(
                "{} cannot place orders for customer {}",
                actor, request.customer_id
            )));
        }

        let address = self.store.address(request.address_id).await?;
        if address.customer_id != request.customer_id {
            return Err(LifecycleError::Forbidden(format!(
                "address {} does not belong to customer {}",
                address.id, request.customer_id
            )));
        }

        let nearest = self
            .matcher
            .find_nearest_for_service(request.service_id, address.coordinates, 1)
            .await?
            .into_iter()
            .next();
        let (vendor, distance_km, price) = match nearest {
            Some(RankedVendor {
                vendor,
                distance_km,
                price: Some(price),
            }) => (vendor, distance_km, price),
            _ => {
                return Err(LifecycleError::NoVendorAvailable {
                    service_id: request.service_id,
                })
            }
        };

        let snapshot = PriceSnapshot::compute(price.unit_price, price.service_fee, quantity);
        let order_id = Uuid::now_v7();
        let mut attempt = 0;

        let order = loop {
            attempt += 1;
            let now = Utc::now();

            let order = Order {
                id: order_id,
                order_number: (self.order_numbers)(now),
                customer_id: request.customer_id,
                vendor_id: vendor.id,
                provider_id: None,
                address_id: address.id,
                service_id: request.service_id,
                status: OrderStatus::Pending,
                quantity: quantity.get(),
                unit_price: snapshot.unit_price,
                service_fee: snapshot.service_fee,
                total_price: snapshot.total_price,
                payment_method: request.payment_method,
                payment_status: PaymentStatus::Pending,
                estimated_delivery_time: Some(self.config.eta.estimate(now, distance_km)),
                completed_at: None,
                created_at: now,
                updated_at: now,
            };

            let event = OrderEvent::Created(OrderCreated {
                order_id,
                order_number: order.order_number.clone(),
                customer_id: order.customer_id,
                vendor_id: order.vendor_id,
                service_id: order.service_id,
                quantity: order.quantity,
                total_price: order.total_price,
                status: order.status,
            });
            let new_order = NewOrder {
                history: self
                    .history
                    .record(order_id, OrderStatus::Pending, Some("Order created".to_string()), Some(actor.id)),
                outbox: outbox_message(&event)?,
                order,
            };

            match self.store.insert_order(new_order).await {
                Ok(order) => break order,
                Err(StoreError::DuplicateOrderNumber(number)) if attempt < self.config.order_number_attempts => {
                    tracing::warn!(order_number = %number, attempt, "Order number collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_order_created();
        }

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            vendor_id = %order.vendor_id,
            distance_km = distance_km,
            total_price = %order.total_price,
            actor = %actor,
            "Order created"
        );

        Ok(CreatedOrder {
            order,
            vendor_distance_km: distance_km,
        })
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &ActorContext,
        notes: Option<String>,
    ) -> Result<Order, LifecycleError> {
        let order = self
            .commit_with_retry(order_id, |order| {
                ensure_can_push_status(order, actor)?;
                if order.status == new_status {
                    return Ok(None);
                }
                OrderStateMachine::validate_transition(order.status, new_status)?;

                let now = Utc::now();
                let notes = notes
                    .clone()
                    .or_else(|| Some(format!("Status changed from {} to {}", order.status, new_status)));
                let event = OrderEvent::StatusChanged(OrderStatusChanged {
                    order_id,
                    from: order.status,
                    to: new_status,
                    changed_by: actor.id,
                    changed_by_role: actor.role,
                    notes: notes.clone(),
                });

                Ok(Some(StatusChange {
                    order_id,
                    expected_status: order.status,
                    new_status,
                    provider_id: None,
                    completed_at: (new_status == OrderStatus::Delivered).then_some(now),
                    job_credit: None,
                    history: self.history.record(order_id, new_status, notes, Some(actor.id)),
                    outbox: outbox_message(&event)?,
                }))
            })
            .await?;

        tracing::info!(order_id = %order.id, status = %order.status, actor = %actor, "Order status updated");
        Ok(order)
    }

    async fn assign(&self, order_id: Uuid, provider_id: Uuid, actor: &ActorContext) -> Result<Order, LifecycleError> {
        let provider = self.store.provider(provider_id).await?;

        let order = self
            .commit_with_retry(order_id, |order| {
                if !matches!(actor.role, ActorRole::Vendor | ActorRole::Admin) || !order.involves(actor) {
                    return Err(LifecycleError::Forbidden(format!(
                        "{} cannot assign providers to order {}",
                        actor, order.id
                    )));
                }
                if order.status != OrderStatus::Accepted {
                    return Err(LifecycleError::InvalidTransition {
                        from: order.status,
                        to: OrderStatus::Assigned,
                        allowed: OrderStateMachine::valid_next_states(order.status).to_vec(),
                    });
                }
                if provider.vendor_id != order.vendor_id {
                    return Err(LifecycleError::ProviderUnavailable {
                        provider_id,
                        reason: format!("belongs to vendor {}, not {}", provider.vendor_id, order.vendor_id),
                    });
                }
                if !provider.is_available {
                    return Err(LifecycleError::ProviderUnavailable {
                        provider_id,
                        reason: "not currently available".to_string(),
                    });
                }

                let event = OrderEvent::ProviderAssigned(ProviderAssigned {
                    order_id,
                    vendor_id: order.vendor_id,
                    provider_id,
                    assigned_by: actor.id,
                });
                let notes = format!("Provider {} assigned", provider.name);

                Ok(Some(StatusChange {
                    order_id,
                    expected_status: order.status,
                    new_status: OrderStatus::Assigned,
                    provider_id: Some(provider_id),
                    completed_at: None,
                    job_credit: None,
                    history: self
                        .history
                        .record(order_id, OrderStatus::Assigned, Some(notes), Some(actor.id)),
                    outbox: outbox_message(&event)?,
                }))
            })
            .await?;

        tracing::info!(order_id = %order.id, provider_id = %provider_id, actor = %actor, "Provider assigned");
        Ok(order)
    }

    async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: &ActorContext,
        reason: Option<String>,
    ) -> Result<Order, LifecycleError> {
        let order = self
            .commit_with_retry(order_id, |order| {
                ensure_involved(order, actor)?;

                if actor.role == ActorRole::Admin {
                    // admins are bound by the transition table only
                    if order.status == OrderStatus::Cancelled {
                        return Ok(None);
                    }
                    OrderStateMachine::validate_transition(order.status, OrderStatus::Cancelled)?;
                } else {
                    OrderStateMachine::validate_cancellation(order.status, actor.role)?;
                }

                let notes = match &reason {
                    Some(reason) => format!("Cancelled by {}: {}", actor.role, reason),
                    None => format!("Cancelled by {}", actor.role),
                };
                let event = OrderEvent::Cancelled(OrderCancelled {
                    order_id,
                    previous_status: order.status,
                    cancelled_by: actor.id,
                    cancelled_by_role: actor.role,
                    reason: reason.clone(),
                });

                Ok(Some(StatusChange {
                    order_id,
                    expected_status: order.status,
                    new_status: OrderStatus::Cancelled,
                    provider_id: None,
                    completed_at: None,
                    job_credit: None,
                    history: self
                        .history
                        .record(order_id, OrderStatus::Cancelled, Some(notes), Some(actor.id)),
                    outbox: outbox_message(&event)?,
                }))
            })
            .await?;

        tracing::info!(order_id = %order.id, actor = %actor, reason = ?reason, "Order cancelled");
        Ok(order)
    }

    async fn complete_order(&self, order_id: Uuid, actor: &ActorContext) -> Result<Order, LifecycleError> {
        let order = self
            .commit_with_retry(order_id, |order| {
                ensure_involved(order, actor)?;
                if order.status != OrderStatus::Delivered {
                    return Err(LifecycleError::InvalidTransition {
                        from: order.status,
                        to: OrderStatus::Completed,
                        allowed: OrderStateMachine::valid_next_states(order.status).to_vec(),
                    });
                }

                let now = Utc::now();
                let event = OrderEvent::Completed(OrderCompleted {
                    order_id,
                    vendor_id: order.vendor_id,
                    provider_id: order.provider_id,
                    completed_at: order.completed_at.unwrap_or(now),
                });

                Ok(Some(StatusChange {
                    order_id,
                    expected_status: order.status,
                    new_status: OrderStatus::Completed,
                    provider_id: None,
                    completed_at: Some(now),
                    job_credit: Some(JobCredit {
                        vendor_id: order.vendor_id,
                        provider_id: order.provider_id,
                    }),
                    history: self.history.record(
                        order_id,
                        OrderStatus::Completed,
                        Some("Order completed".to_string()),
                        Some(actor.id),
                    ),
                    outbox: outbox_message(&event)?,
                }))
            })
            .await?;

        tracing::info!(order_id = %order.id, vendor_id = %order.vendor_id, actor = %actor, "Order completed");
        Ok(order)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Load, plan, commit. `plan` returns `None` when the order is already
    /// where the caller wants it.
    async fn commit_with_retry<F>(&self, order_id: Uuid, mut plan: F) -> Result<Order, LifecycleError>
    where
        F: FnMut(&Order) -> Result<Option<StatusChange>, LifecycleError>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let order = self.store.order(order_id).await?;
            let Some(change) = plan(&order)? else {
                tracing::debug!(order_id = %order_id, status = %order.status, "Order already in requested status");
                return Ok(order);
            };

            match self.store.commit_status_change(change).await {
                Ok(updated) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_transition(updated.status);
                    }
                    return Ok(updated);
                }
                Err(StoreError::StatusConflict { expected, .. }) if attempt < self.config.transition_attempts => {
                    tracing::debug!(
                        order_id = %order_id,
                        expected = %expected,
                        attempt,
                        "Order changed underneath us, re-validating"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn request_rating_refresh(&self, order: &Order) {
        let Some(recipient) = &self.rating_refresh else {
            tracing::debug!(order_id = %order.id, "No rating worker attached, skipping refresh");
            return;
        };

        let message = RefreshRatings {
            vendor_id: order.vendor_id,
            provider_id: order.provider_id,
        };
        if let Err(e) = recipient.try_send(message) {
            tracing::warn!(order_id = %order.id, error = %e, "Could not queue rating refresh");
        }
    }

    fn finish<T>(
        &self,
        operation: &'static str,
        started: Instant,
        result: Result<T, LifecycleError>,
    ) -> Result<T, LifecycleError> {
        if let Some(metrics) = &self.metrics {
            metrics.observe_operation(operation, started.elapsed().as_secs_f64());
        }

        if let Err(err) = &result {
            if err.is_business() {
                tracing::warn!(operation, kind = err.kind(), error = %err, "Request refused");
                if let Some(metrics) = &self.metrics {
                    metrics.record_refusal(err.kind());
                }
            } else {
                tracing::error!(operation, error = %err, "Operation failed");
            }
        }

        result
    }
}

fn outbox_message(event: &OrderEvent) -> Result<OutboxMessage, LifecycleError> {
    OutboxMessage::from_event(event).map_err(|e| LifecycleError::Infrastructure(e.into()))
}

fn ensure_involved(order: &Order, actor: &ActorContext) -> Result<(), LifecycleError> {
    if order.involves(actor) {
        Ok(())
    } else {
        Err(LifecycleError::Forbidden(format!("{} has no access to order {}", actor, order.id)))
    }
}

/// Status pushes come from the fulfilment side: the order's vendor, its
/// assigned provider, or an admin.
fn ensure_can_push_status(order: &Order, actor: &ActorContext) -> Result<(), LifecycleError> {
    if actor.role == ActorRole::Customer {
        return Err(LifecycleError::Forbidden(format!(
            "customers cannot change the status of order {}",
            order.id
        )));
    }
    ensure_involved(order, actor)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::DeliveryAddress;
    use crate::domain::vendor::{Provider, RatingSubject, Vendor, VendorOffer};
    use crate::store::InMemoryStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        store: Arc<InMemoryStore>,
        lifecycle: OrderLifecycle,
        customer: ActorContext,
        vendor: Vendor,
        provider: Provider,
        address_id: Uuid,
        service_id: Uuid,
    }

    impl Fixture {
        fn vendor_actor(&self) -> ActorContext {
            ActorContext::vendor(self.vendor.id)
        }

        fn provider_actor(&self) -> ActorContext {
            ActorContext::provider(self.provider.id)
        }

        fn request(&self, quantity: i32) -> CreateOrderRequest {
            CreateOrderRequest {
                customer_id: self.customer.id,
                address_id: self.address_id,
                service_id: self.service_id,
                quantity,
                payment_method: PaymentMethod::Cash,
            }
        }

        async fn create(&self, quantity: i32) -> Order {
            self.lifecycle.create(self.request(quantity), &self.customer).await.unwrap().order
        }

        async fn create_accepted(&self) -> Order {
            let order = self.create(1).await;
            self.lifecycle
                .transition(order.id, OrderStatus::Accepted, &self.vendor_actor(), None)
                .await
                .unwrap()
        }

        async fn create_assigned(&self) -> Order {
            let order = self.create_accepted().await;
            self.lifecycle
                .assign_provider(order.id, self.provider.id, &self.vendor_actor())
                .await
                .unwrap()
        }

        async fn create_delivered(&self) -> Order {
            let order = self.create_assigned().await;
            let provider = self.provider_actor();
            self.lifecycle
                .transition(order.id, OrderStatus::EnRoute, &provider, None)
                .await
                .unwrap();
            self.lifecycle
                .transition(order.id, OrderStatus::Delivered, &provider, None)
                .await
                .unwrap()
        }
    }

    fn region() -> ServiceRegion {
        ServiceRegion::new(-2.0, 36.0, 0.0, 38.0)
    }

    fn fixture_with(configure: impl FnOnce(OrderLifecycle) -> OrderLifecycle) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let service_id = Uuid::new_v4();
        let customer = ActorContext::customer(Uuid::new_v4());

        let vendor = Vendor {
            id: Uuid::new_v4(),
            name: "Westlands Gas".to_string(),
            coordinates: Coordinates::new(-1.2676, 36.8108),
            is_active: true,
            completed_jobs: 0,
            rating: None,
        };
        store.add_vendor(vendor.clone());
        store.set_service_price(vendor.id, service_id, dec!(8.50), dec!(2.00));

        let provider = Provider {
            id: Uuid::new_v4(),
            vendor_id: vendor.id,
            name: "Otieno".to_string(),
            is_available: true,
            completed_jobs: 0,
            rating: None,
        };
        store.add_provider(provider.clone());

        let address_id = Uuid::new_v4();
        store.add_address(DeliveryAddress {
            id: address_id,
            customer_id: customer.id,
            coordinates: Coordinates::new(-1.2921, 36.8219),
        });

        let lifecycle = configure(OrderLifecycle::new(store.clone(), region(), LifecycleConfig::default()));

        Fixture {
            store,
            lifecycle,
            customer,
            vendor,
            provider,
            address_id,
            service_id,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|lifecycle| lifecycle)
    }

    async fn history_len(fx: &Fixture, order_id: Uuid) -> usize {
        fx.lifecycle.history(order_id).await.unwrap().len()
    }

    async fn event_types(store: &InMemoryStore) -> Vec<String> {
        store
            .pending_outbox(100)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.event_type)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_prices_and_logs_new_order() {
        let fx = fixture();
        let created = fx.lifecycle.create(fx.request(2), &fx.customer).await.unwrap();
        let order = &created.order;

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.vendor_id, fx.vendor.id);
        assert_eq!(order.unit_price, dec!(8.50));
        assert_eq!(order.service_fee, dec!(2.00));
        assert_eq!(order.total_price, dec!(19.00));
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert!(order.order_number.starts_with("ORD-"));
        assert!(created.vendor_distance_km > 0.0);

        // ~3 km away: 30 min base + 3 min travel
        let eta = order.estimated_delivery_time.unwrap() - order.created_at;
        assert_eq!(eta.num_minutes(), 33);

        let history = fx.lifecycle.history(order.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, OrderStatus::Pending);
        assert_eq!(history[0].notes.as_deref(), Some("Order created"));

        assert_eq!(event_types(&fx.store).await, vec!["order.created"]);
    }

    #[tokio::test]
    async fn test_price_snapshot_survives_catalog_change() {
        let fx = fixture();
        let order = fx.create(2).await;

        fx.store
            .set_service_price(fx.vendor.id, fx.service_id, dec!(12.00), dec!(3.00));
        let accepted = fx
            .lifecycle
            .transition(order.id, OrderStatus::Accepted, &fx.vendor_actor(), None)
            .await
            .unwrap();

        assert_eq!(accepted.price_snapshot(), order.price_snapshot());
        assert_eq!(accepted.total_price, dec!(19.00));
    }

    #[tokio::test]
    async fn test_create_picks_nearest_vendor() {
        let fx = fixture();
        let closer = Vendor {
            id: Uuid::new_v4(),
            name: "CBD Gas".to_string(),
            coordinates: Coordinates::new(-1.2925, 36.8220),
            is_active: true,
            completed_jobs: 0,
            rating: None,
        };
        fx.store.add_vendor(closer.clone());
        fx.store
            .set_service_price(closer.id, fx.service_id, dec!(9.00), dec!(1.00));

        let created = fx.lifecycle.create(fx.request(1), &fx.customer).await.unwrap();

        assert_eq!(created.order.vendor_id, closer.id);
        assert_eq!(created.order.total_price, dec!(10.00));
        assert!(created.vendor_distance_km < 0.1);
    }

    #[tokio::test]
    async fn test_create_rejects_foreign_address() {
        let fx = fixture();
        let stranger = ActorContext::customer(Uuid::new_v4());
        let request = CreateOrderRequest {
            customer_id: stranger.id,
            ..fx.request(1)
        };

        let result = fx.lifecycle.create(request, &stranger).await;

        assert!(matches!(result, Err(LifecycleError::Forbidden(_))));
        assert_eq!(fx.store.outbox_len(), 0);
    }

    #[tokio::test]
    async fn test_create_on_behalf_of_another_customer_is_forbidden() {
        let fx = fixture();
        let other = ActorContext::customer(Uuid::new_v4());

        let result = fx.lifecycle.create(fx.request(1), &other).await;
        assert!(matches!(result, Err(LifecycleError::Forbidden(_))));

        let admin = ActorContext::admin(Uuid::new_v4());
        assert!(fx.lifecycle.create(fx.request(1), &admin).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_without_vendor_for_service() {
        let fx = fixture();
        let request = CreateOrderRequest {
            service_id: Uuid::new_v4(),
            ..fx.request(1)
        };

        let result = fx.lifecycle.create(request.clone(), &fx.customer).await;

        match result {
            Err(LifecycleError::NoVendorAvailable { service_id }) => assert_eq!(service_id, request.service_id),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fx.store.outbox_len(), 0);
    }

    #[tokio::test]
    async fn test_create_ignores_inactive_vendor() {
        let fx = fixture();
        fx.store.add_vendor(Vendor {
            is_active: false,
            ..fx.vendor.clone()
        });

        let result = fx.lifecycle.create(fx.request(1), &fx.customer).await;
        assert!(matches!(result, Err(LifecycleError::NoVendorAvailable { .. })));
    }

    #[tokio::test]
    async fn test_create_rejects_address_outside_region() {
        let fx = fixture();
        let address_id = Uuid::new_v4();
        fx.store.add_address(DeliveryAddress {
            id: address_id,
            customer_id: fx.customer.id,
            coordinates: Coordinates::new(51.5074, -0.1278),
        });
        let request = CreateOrderRequest {
            address_id,
            ..fx.request(1)
        };

        let result = fx.lifecycle.create(request, &fx.customer).await;
        assert!(matches!(result, Err(LifecycleError::InvalidCoordinates { .. })));
    }

    #[tokio::test]
    async fn test_create_rejects_quantity_out_of_bounds() {
        let fx = fixture();

        for quantity in [0, -1, 11] {
            let result = fx.lifecycle.create(fx.request(quantity), &fx.customer).await;
            assert!(matches!(result, Err(LifecycleError::InvalidQuantity(q)) if q == quantity));
        }
        assert!(fx.lifecycle.create(fx.request(10), &fx.customer).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_unknown_address() {
        let fx = fixture();
        let request = CreateOrderRequest {
            address_id: Uuid::new_v4(),
            ..fx.request(1)
        };

        let result = fx.lifecycle.create(request, &fx.customer).await;
        assert!(matches!(result, Err(LifecycleError::NotFound { entity: "address", .. })));
    }

    #[tokio::test]
    async fn test_create_regenerates_colliding_order_number() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let fx = fixture_with(move |lifecycle| {
            lifecycle.with_order_number_generator(move |now| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    "ORD-TAKEN".to_string()
                } else {
                    generate_order_number(now)
                }
            })
        });
        fx.store.reserve_order_number("ORD-TAKEN");

        let order = fx.create(1).await;

        assert_ne!(order.order_number, "ORD-TAKEN");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(history_len(&fx, order.id).await, 1);
    }

    #[tokio::test]
    async fn test_create_gives_up_after_order_number_budget() {
        let fx = fixture_with(|lifecycle| lifecycle.with_order_number_generator(|_| "ORD-TAKEN".to_string()));
        fx.store.reserve_order_number("ORD-TAKEN");

        let result = fx.lifecycle.create(fx.request(1), &fx.customer).await;

        match result {
            Err(LifecycleError::Infrastructure(StoreError::DuplicateOrderNumber(number))) => {
                assert_eq!(number, "ORD-TAKEN")
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fx.store.outbox_len(), 0);
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_happy_path_to_delivered() {
        let fx = fixture();
        let order = fx.create(1).await;
        let vendor = fx.vendor_actor();
        let provider = fx.provider_actor();

        let steps = [
            (OrderStatus::Accepted, &vendor),
            (OrderStatus::EnRoute, &provider),
            (OrderStatus::Delivered, &provider),
        ];

        let mut expected_len = 1;
        for (i, (status, actor)) in steps.into_iter().enumerate() {
            if i == 1 {
                fx.lifecycle
                    .assign_provider(order.id, fx.provider.id, &vendor)
                    .await
                    .unwrap();
                expected_len += 1;
            }

            let updated = fx.lifecycle.transition(order.id, status, actor, None).await.unwrap();
            expected_len += 1;

            assert_eq!(updated.status, status);
            let history = fx.lifecycle.history(order.id).await.unwrap();
            assert_eq!(history.len(), expected_len);
            assert_eq!(history.last().unwrap().status, status);
        }

        let delivered = fx.lifecycle.get_order(order.id, &fx.customer).await.unwrap();
        assert!(delivered.completed_at.is_some());
        assert_eq!(delivered.provider_id, Some(fx.provider.id));
    }

    #[tokio::test]
    async fn test_skipping_states_is_rejected() {
        let fx = fixture();
        let order = fx.create(1).await;

        let result = fx
            .lifecycle
            .transition(order.id, OrderStatus::Delivered, &fx.vendor_actor(), None)
            .await;

        match result {
            Err(LifecycleError::InvalidTransition { from, to, allowed }) => {
                assert_eq!(from, OrderStatus::Pending);
                assert_eq!(to, OrderStatus::Delivered);
                assert_eq!(
                    allowed,
                    vec![OrderStatus::Accepted, OrderStatus::Rejected, OrderStatus::Cancelled]
                );
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(history_len(&fx, order.id).await, 1);
    }

    #[tokio::test]
    async fn test_same_status_is_a_noop() {
        let fx = fixture();
        let order = fx.create(1).await;

        let unchanged = fx
            .lifecycle
            .transition(order.id, OrderStatus::Pending, &fx.vendor_actor(), None)
            .await
            .unwrap();

        assert_eq!(unchanged, order);
        assert_eq!(history_len(&fx, order.id).await, 1);
        assert_eq!(fx.store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn test_vendor_rejects_pending_order() {
        let fx = fixture();
        let order = fx.create(1).await;

        let rejected = fx
            .lifecycle
            .transition(order.id, OrderStatus::Rejected, &fx.vendor_actor(), Some("out of stock".to_string()))
            .await
            .unwrap();

        assert_eq!(rejected.status, OrderStatus::Rejected);
        let latest = fx.lifecycle.history(order.id).await.unwrap().pop().unwrap();
        assert_eq!(latest.notes.as_deref(), Some("out of stock"));
        assert_eq!(latest.changed_by, Some(fx.vendor.id));
        assert_eq!(event_types(&fx.store).await, vec!["order.created", "order.status.changed"]);
    }

    #[tokio::test]
    async fn test_customer_cannot_push_status() {
        let fx = fixture();
        let order = fx.create(1).await;

        let result = fx
            .lifecycle
            .transition(order.id, OrderStatus::Accepted, &fx.customer, None)
            .await;
        assert!(matches!(result, Err(LifecycleError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_other_vendor_cannot_touch_order() {
        let fx = fixture();
        let order = fx.create(1).await;
        let other = ActorContext::vendor(Uuid::new_v4());

        let result = fx.lifecycle.transition(order.id, OrderStatus::Accepted, &other, None).await;
        assert!(matches!(result, Err(LifecycleError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_vendor_walks_order_to_delivered_by_status() {
        let fx = fixture();
        let order = fx.create(1).await;
        let vendor = fx.vendor_actor();

        for status in [
            OrderStatus::Accepted,
            OrderStatus::Assigned,
            OrderStatus::EnRoute,
            OrderStatus::Delivered,
        ] {
            let updated = fx.lifecycle.transition(order.id, status, &vendor, None).await.unwrap();
            assert_eq!(updated.status, status);
        }

        let statuses: Vec<_> = fx
            .lifecycle
            .history(order.id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                OrderStatus::Pending,
                OrderStatus::Accepted,
                OrderStatus::Assigned,
                OrderStatus::EnRoute,
                OrderStatus::Delivered,
            ]
        );

        let delivered = fx.lifecycle.get_order(order.id, &vendor).await.unwrap();
        assert_eq!(delivered.provider_id, None);
        assert!(delivered.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_assigned_by_status_keeps_provider_empty() {
        let fx = fixture();
        let order = fx.create_accepted().await;

        let assigned = fx
            .lifecycle
            .transition(order.id, OrderStatus::Assigned, &ActorContext::admin(Uuid::new_v4()), None)
            .await
            .unwrap();

        assert_eq!(assigned.status, OrderStatus::Assigned);
        assert_eq!(assigned.provider_id, None);
        assert_eq!(
            event_types(&fx.store).await,
            vec!["order.created", "order.status.changed", "order.status.changed"]
        );
    }

    #[tokio::test]
    async fn test_assigned_requires_accepted_order() {
        let fx = fixture();
        let order = fx.create(1).await;

        let result = fx
            .lifecycle
            .transition(order.id, OrderStatus::Assigned, &fx.vendor_actor(), None)
            .await;
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidTransition { from: OrderStatus::Pending, to: OrderStatus::Assigned, .. })
        ));
        assert_eq!(history_len(&fx, order.id).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let fx = fixture();
        let result = fx
            .lifecycle
            .transition(Uuid::new_v4(), OrderStatus::Accepted, &fx.vendor_actor(), None)
            .await;
        assert!(matches!(result, Err(LifecycleError::NotFound { entity: "order", .. })));
    }

    /// Commits the next queued status change to the order right before
    /// forwarding each caller commit, so the caller always loses the race.
    struct RacingStore {
        inner: Arc<InMemoryStore>,
        competitor: ActorContext,
        competing: parking_lot::Mutex<Vec<OrderStatus>>,
    }

    impl RacingStore {
        fn new(inner: Arc<InMemoryStore>, competing: Vec<OrderStatus>) -> Self {
            Self {
                inner,
                competitor: ActorContext::admin(Uuid::new_v4()),
                competing: parking_lot::Mutex::new(competing),
            }
        }

        async fn commit_competing_change(&self, order_id: Uuid) -> Result<(), StoreError> {
            let next = {
                let mut competing = self.competing.lock();
                if competing.is_empty() {
                    return Ok(());
                }
                competing.remove(0)
            };

            let current = self.inner.order(order_id).await?;
            let event = OrderEvent::StatusChanged(OrderStatusChanged {
                order_id,
                from: current.status,
                to: next,
                changed_by: self.competitor.id,
                changed_by_role: self.competitor.role,
                notes: None,
            });
            self.inner
                .commit_status_change(StatusChange {
                    order_id,
                    expected_status: current.status,
                    new_status: next,
                    provider_id: None,
                    completed_at: None,
                    job_credit: None,
                    history: StatusHistoryEntry::new(order_id, next, None, Some(self.competitor.id)),
                    outbox: OutboxMessage::from_event(&event)?,
                })
                .await?;
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl OrderStore for RacingStore {
        async fn address(&self, address_id: Uuid) -> Result<DeliveryAddress, StoreError> {
            self.inner.address(address_id).await
        }

        async fn vendor(&self, vendor_id: Uuid) -> Result<Vendor, StoreError> {
            self.inner.vendor(vendor_id).await
        }

        async fn provider(&self, provider_id: Uuid) -> Result<Provider, StoreError> {
            self.inner.provider(provider_id).await
        }

        async fn active_vendors(&self) -> Result<Vec<Vendor>, StoreError> {
            self.inner.active_vendors().await
        }

        async fn active_offers(&self, service_id: Uuid) -> Result<Vec<VendorOffer>, StoreError> {
            self.inner.active_offers(service_id).await
        }

        async fn order(&self, order_id: Uuid) -> Result<Order, StoreError> {
            self.inner.order(order_id).await
        }

        async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
            self.inner.list_orders(filter).await
        }

        async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, StoreError> {
            self.inner.status_history(order_id).await
        }

        async fn insert_order(&self, new_order: NewOrder) -> Result<Order, StoreError> {
            self.inner.insert_order(new_order).await
        }

        async fn commit_status_change(&self, change: StatusChange) -> Result<Order, StoreError> {
            self.commit_competing_change(change.order_id).await?;
            self.inner.commit_status_change(change).await
        }

        async fn rating_scores(&self, subject: RatingSubject) -> Result<Vec<i16>, StoreError> {
            self.inner.rating_scores(subject).await
        }

        async fn set_rating(&self, subject: RatingSubject, rating: Option<Decimal>) -> Result<(), StoreError> {
            self.inner.set_rating(subject, rating).await
        }

        async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
            self.inner.pending_outbox(limit).await
        }

        async fn mark_outbox_published(&self, message_id: Uuid) -> Result<(), StoreError> {
            self.inner.mark_outbox_published(message_id).await
        }

        async fn record_outbox_failure(
            &self,
            message_id: Uuid,
            error: &str,
            max_attempts: i32,
        ) -> Result<bool, StoreError> {
            self.inner.record_outbox_failure(message_id, error, max_attempts).await
        }
    }

    fn racing_lifecycle(fx: &Fixture, competing: Vec<OrderStatus>) -> OrderLifecycle {
        let store = Arc::new(RacingStore::new(fx.store.clone(), competing));
        OrderLifecycle::new(store, region(), LifecycleConfig::default())
    }

    async fn history_statuses(fx: &Fixture, order_id: Uuid) -> Vec<OrderStatus> {
        fx.lifecycle
            .history(order_id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.status)
            .collect()
    }

    async fn assert_latest_history_matches_order(fx: &Fixture, order_id: Uuid) {
        let log = StatusHistoryLog::new(fx.store.clone());
        let latest = log.latest(order_id).await.unwrap().unwrap();
        let current = fx.store.order(order_id).await.unwrap();
        assert_eq!(latest.status, current.status);
    }

    #[tokio::test]
    async fn test_lost_race_is_revalidated_against_new_status() {
        let fx = fixture();
        let order = fx.create(1).await;
        let racing = racing_lifecycle(&fx, vec![OrderStatus::Cancelled]);

        let result = racing
            .transition(order.id, OrderStatus::Accepted, &fx.vendor_actor(), None)
            .await;

        match result {
            Err(LifecycleError::InvalidTransition { from, to, allowed }) => {
                assert_eq!(from, OrderStatus::Cancelled);
                assert_eq!(to, OrderStatus::Accepted);
                assert!(allowed.is_empty());
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            history_statuses(&fx, order.id).await,
            vec![OrderStatus::Pending, OrderStatus::Cancelled]
        );
        assert_latest_history_matches_order(&fx, order.id).await;
    }

    #[tokio::test]
    async fn test_lost_race_retries_and_commits() {
        let fx = fixture();
        let order = fx.create(1).await;
        let racing = racing_lifecycle(&fx, vec![OrderStatus::Accepted]);
        let admin = ActorContext::admin(Uuid::new_v4());

        let cancelled = racing.cancel(order.id, &admin, None).await.unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(
            history_statuses(&fx, order.id).await,
            vec![OrderStatus::Pending, OrderStatus::Accepted, OrderStatus::Cancelled]
        );
        assert_latest_history_matches_order(&fx, order.id).await;
    }

    #[tokio::test]
    async fn test_concurrent_update_after_retry_budget() {
        let fx = fixture();
        let order = fx.create(1).await;
        let racing = racing_lifecycle(
            &fx,
            vec![OrderStatus::Accepted, OrderStatus::Assigned, OrderStatus::EnRoute],
        );
        let admin = ActorContext::admin(Uuid::new_v4());

        let result = racing.cancel(order.id, &admin, None).await;

        match result {
            Err(LifecycleError::ConcurrentUpdate { order_id }) => assert_eq!(order_id, order.id),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            history_statuses(&fx, order.id).await,
            vec![
                OrderStatus::Pending,
                OrderStatus::Accepted,
                OrderStatus::Assigned,
                OrderStatus::EnRoute,
            ]
        );
        assert_latest_history_matches_order(&fx, order.id).await;
    }

    // ------------------------------------------------------------------------
    // Provider assignment
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_assign_provider_to_accepted_order() {
        let fx = fixture();
        let order = fx.create_assigned().await;

        assert_eq!(order.status, OrderStatus::Assigned);
        assert_eq!(order.provider_id, Some(fx.provider.id));

        let latest = fx.lifecycle.history(order.id).await.unwrap().pop().unwrap();
        assert_eq!(latest.status, OrderStatus::Assigned);
        assert_eq!(latest.notes.as_deref(), Some("Provider Otieno assigned"));
        assert_eq!(
            event_types(&fx.store).await.last().map(String::as_str),
            Some("order.provider.assigned")
        );
    }

    #[tokio::test]
    async fn test_assign_on_pending_order_leaves_it_untouched() {
        let fx = fixture();
        let order = fx.create(1).await;

        let result = fx
            .lifecycle
            .assign_provider(order.id, fx.provider.id, &fx.vendor_actor())
            .await;

        assert!(matches!(
            result,
            Err(LifecycleError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Assigned,
                ..
            })
        ));
        let stored = fx.lifecycle.get_order(order.id, &fx.customer).await.unwrap();
        assert_eq!(stored, order);
        assert_eq!(history_len(&fx, order.id).await, 1);
    }

    #[tokio::test]
    async fn test_assign_provider_from_other_vendor() {
        let fx = fixture();
        let order = fx.create_accepted().await;
        let outsider = Provider {
            id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            ..fx.provider.clone()
        };
        fx.store.add_provider(outsider.clone());

        let result = fx
            .lifecycle
            .assign_provider(order.id, outsider.id, &fx.vendor_actor())
            .await;

        assert!(matches!(result, Err(LifecycleError::ProviderUnavailable { provider_id, .. }) if provider_id == outsider.id));
    }

    #[tokio::test]
    async fn test_assign_unavailable_provider() {
        let fx = fixture();
        let order = fx.create_accepted().await;
        fx.store.set_provider_available(fx.provider.id, false);

        let result = fx
            .lifecycle
            .assign_provider(order.id, fx.provider.id, &fx.vendor_actor())
            .await;

        assert!(matches!(result, Err(LifecycleError::ProviderUnavailable { .. })));
        assert_eq!(history_len(&fx, order.id).await, 2);
    }

    #[tokio::test]
    async fn test_assign_unknown_provider() {
        let fx = fixture();
        let order = fx.create_accepted().await;

        let result = fx
            .lifecycle
            .assign_provider(order.id, Uuid::new_v4(), &fx.vendor_actor())
            .await;
        assert!(matches!(result, Err(LifecycleError::NotFound { entity: "provider", .. })));
    }

    // ------------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_assigned_order_by_role() {
        let fx = fixture();
        let order = fx.create_assigned().await;

        let denied = fx.lifecycle.cancel(order.id, &fx.customer, None).await;
        match denied {
            Err(LifecycleError::CancellationDenied { actor, status }) => {
                assert_eq!(actor, ActorRole::Customer);
                assert_eq!(status, OrderStatus::Assigned);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(history_len(&fx, order.id).await, 3);

        let cancelled = fx
            .lifecycle
            .cancel(order.id, &fx.vendor_actor(), Some("truck broke down".to_string()))
            .await
            .unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        let history = fx.lifecycle.history(order.id).await.unwrap();
        assert_eq!(history.len(), 4);
        let latest = history.last().unwrap();
        assert_eq!(latest.status, OrderStatus::Cancelled);
        assert_eq!(latest.notes.as_deref(), Some("Cancelled by vendor: truck broke down"));
        assert_eq!(latest.changed_by, Some(fx.vendor.id));
    }

    #[tokio::test]
    async fn test_customer_cancels_pending_order() {
        let fx = fixture();
        let order = fx.create(1).await;

        let cancelled = fx.lifecycle.cancel(order.id, &fx.customer, None).await.unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(event_types(&fx.store).await, vec!["order.created", "order.cancelled"]);
    }

    #[tokio::test]
    async fn test_provider_cancel_window() {
        let fx = fixture();
        let order = fx.create_assigned().await;
        fx.lifecycle
            .transition(order.id, OrderStatus::EnRoute, &fx.provider_actor(), None)
            .await
            .unwrap();

        let result = fx.lifecycle.cancel(order.id, &fx.provider_actor(), None).await;
        assert!(matches!(
            result,
            Err(LifecycleError::CancellationDenied {
                actor: ActorRole::Provider,
                status: OrderStatus::EnRoute
            })
        ));
    }

    #[tokio::test]
    async fn test_cancel_through_transition_applies_actor_policy() {
        let fx = fixture();
        let order = fx.create_assigned().await;

        let result = fx
            .lifecycle
            .transition(order.id, OrderStatus::Cancelled, &fx.customer, None)
            .await;
        assert!(matches!(result, Err(LifecycleError::CancellationDenied { .. })));
    }

    #[tokio::test]
    async fn test_admin_cancel_follows_transition_table() {
        let fx = fixture();
        let order = fx.create_assigned().await;
        let admin = ActorContext::admin(Uuid::new_v4());
        fx.lifecycle
            .transition(order.id, OrderStatus::EnRoute, &fx.provider_actor(), None)
            .await
            .unwrap();

        let cancelled = fx.lifecycle.cancel(order.id, &admin, None).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let again = fx.lifecycle.cancel(order.id, &admin, None).await.unwrap();
        assert_eq!(again.status, OrderStatus::Cancelled);
        assert_eq!(history_len(&fx, order.id).await, 5);
    }

    #[tokio::test]
    async fn test_cancelled_order_is_terminal() {
        let fx = fixture();
        let order = fx.create(1).await;
        fx.lifecycle.cancel(order.id, &fx.customer, None).await.unwrap();

        let result = fx
            .lifecycle
            .transition(order.id, OrderStatus::Accepted, &fx.vendor_actor(), None)
            .await;
        match result {
            Err(LifecycleError::InvalidTransition { allowed, .. }) => assert!(allowed.is_empty()),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    // ------------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_complete_credits_vendor_and_provider() {
        let fx = fixture();
        let order = fx.create_delivered().await;
        let delivered_at = order.completed_at;

        let completed = fx.lifecycle.complete(order.id, &fx.customer).await.unwrap();

        assert_eq!(completed.status, OrderStatus::Completed);
        assert_eq!(completed.completed_at, delivered_at);
        assert_eq!(fx.store.vendor(fx.vendor.id).await.unwrap().completed_jobs, 1);
        assert_eq!(fx.store.provider(fx.provider.id).await.unwrap().completed_jobs, 1);

        let latest = fx.lifecycle.history(order.id).await.unwrap().pop().unwrap();
        assert_eq!(latest.status, OrderStatus::Completed);
        assert_eq!(
            event_types(&fx.store).await.last().map(String::as_str),
            Some("order.completed")
        );
    }

    #[tokio::test]
    async fn test_complete_requires_delivered() {
        let fx = fixture();
        let order = fx.create_assigned().await;

        let result = fx.lifecycle.complete(order.id, &fx.vendor_actor()).await;

        assert!(matches!(
            result,
            Err(LifecycleError::InvalidTransition {
                from: OrderStatus::Assigned,
                to: OrderStatus::Completed,
                ..
            })
        ));
        assert_eq!(fx.store.vendor(fx.vendor.id).await.unwrap().completed_jobs, 0);
    }

    #[tokio::test]
    async fn test_complete_twice_credits_once() {
        let fx = fixture();
        let order = fx.create_delivered().await;

        fx.lifecycle.complete(order.id, &fx.vendor_actor()).await.unwrap();
        let second = fx.lifecycle.complete(order.id, &fx.vendor_actor()).await;

        assert!(matches!(second, Err(LifecycleError::InvalidTransition { .. })));
        assert_eq!(fx.store.vendor(fx.vendor.id).await.unwrap().completed_jobs, 1);
    }

    #[tokio::test]
    async fn test_transition_to_completed_runs_completion() {
        let fx = fixture();
        let order = fx.create_delivered().await;

        let completed = fx
            .lifecycle
            .transition(order.id, OrderStatus::Completed, &fx.provider_actor(), None)
            .await
            .unwrap();

        assert_eq!(completed.status, OrderStatus::Completed);
        assert_eq!(fx.store.provider(fx.provider.id).await.unwrap().completed_jobs, 1);
    }

    #[actix::test]
    async fn test_completion_survives_failed_rating_refresh() {
        use crate::actors::RatingRefreshActor;
        use crate::utils::RetryConfig;
        use actix::Actor;

        let fx = fixture();
        let worker = RatingRefreshActor::new(fx.store.clone(), RetryConfig::no_delay(2)).start();
        let lifecycle = OrderLifecycle::new(fx.store.clone(), region(), LifecycleConfig::default())
            .with_rating_refresh(worker.recipient());
        fx.store.add_rating(RatingSubject::Vendor(fx.vendor.id), 4);
        fx.store.fail_rating_writes(true);

        let order = fx.create_delivered().await;
        let completed = lifecycle.complete(order.id, &fx.customer).await.unwrap();
        assert_eq!(completed.status, OrderStatus::Completed);

        // let the worker run its attempts
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let stored = lifecycle.get_order(order.id, &fx.customer).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        let vendor = fx.store.vendor(fx.vendor.id).await.unwrap();
        assert_eq!(vendor.rating, None);
        assert_eq!(vendor.completed_jobs, 1);
        assert_eq!(fx.store.provider(fx.provider.id).await.unwrap().completed_jobs, 1);
    }

    #[actix::test]
    async fn test_completion_refreshes_ratings() {
        use crate::actors::RatingRefreshActor;
        use crate::utils::RetryConfig;
        use actix::Actor;

        let fx = fixture();
        let worker = RatingRefreshActor::new(fx.store.clone(), RetryConfig::no_delay(1)).start();
        let lifecycle = OrderLifecycle::new(fx.store.clone(), region(), LifecycleConfig::default())
            .with_rating_refresh(worker.recipient());
        fx.store.add_rating(RatingSubject::Vendor(fx.vendor.id), 5);
        fx.store.add_rating(RatingSubject::Vendor(fx.vendor.id), 4);
        fx.store.add_rating(RatingSubject::Provider(fx.provider.id), 3);

        let order = fx.create_delivered().await;
        lifecycle.complete(order.id, &fx.vendor_actor()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(fx.store.vendor(fx.vendor.id).await.unwrap().rating, Some(dec!(4.5)));
        assert_eq!(fx.store.provider(fx.provider.id).await.unwrap().rating, Some(dec!(3.0)));
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_get_order_checks_access() {
        let fx = fixture();
        let order = fx.create(1).await;

        assert!(fx.lifecycle.get_order(order.id, &fx.customer).await.is_ok());
        assert!(fx.lifecycle.get_order(order.id, &fx.vendor_actor()).await.is_ok());
        assert!(fx
            .lifecycle
            .get_order(order.id, &ActorContext::admin(Uuid::new_v4()))
            .await
            .is_ok());

        // not assigned yet
        let result = fx.lifecycle.get_order(order.id, &fx.provider_actor()).await;
        assert!(matches!(result, Err(LifecycleError::Forbidden(_))));

        let result = fx
            .lifecycle
            .get_order(order.id, &ActorContext::customer(Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(LifecycleError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_list_orders_by_customer_and_status() {
        let fx = fixture();
        let first = fx.create(1).await;
        let second = fx.create(2).await;
        fx.lifecycle.cancel(first.id, &fx.customer, None).await.unwrap();

        let all = fx
            .lifecycle
            .list_orders(&OrderFilter {
                customer_id: Some(fx.customer.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let pending = fx
            .lifecycle
            .list_orders(&OrderFilter {
                vendor_id: Some(fx.vendor.id),
                status: Some(OrderStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[tokio::test]
    async fn test_nearby_vendors() {
        let fx = fixture();

        let nearby = fx
            .lifecycle
            .nearby_vendors(Coordinates::new(-1.2921, 36.8219), 5)
            .await
            .unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].vendor.id, fx.vendor.id);
        assert!(nearby[0].price.is_none());

        let outside = fx.lifecycle.nearby_vendors(Coordinates::new(10.0, 10.0), 5).await;
        assert!(matches!(outside, Err(LifecycleError::InvalidCoordinates { .. })));
    }

    #[tokio::test]
    async fn test_metrics_track_operations() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let shared = metrics.clone();
        let fx = fixture_with(move |lifecycle| lifecycle.with_metrics(shared));

        let order = fx.create(1).await;
        fx.lifecycle
            .transition(order.id, OrderStatus::Accepted, &fx.vendor_actor(), None)
            .await
            .unwrap();
        let _ = fx.lifecycle.cancel(order.id, &fx.provider_actor(), None).await;

        assert_eq!(metrics.orders_created.get(), 1);
        assert_eq!(metrics.transitions.with_label_values(&["ACCEPTED"]).get(), 1);
        assert_eq!(metrics.refusals.with_label_values(&["forbidden"]).get(), 1);
    }
}
