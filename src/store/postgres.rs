use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::{NewOrder, OrderStore, StatusChange, StoreError};
use crate::domain::order::{DeliveryAddress, Order, OrderFilter, StatusHistoryEntry};
use crate::domain::vendor::{Provider, RatingSubject, ServicePrice, Vendor, VendorOffer};
use crate::geo::Coordinates;
use crate::messaging::OutboxMessage;

// ============================================================================
// PostgreSQL store
// ============================================================================
//
// Units of work run in one transaction each. Status updates are guarded by
// `WHERE status = <expected>`; the row lock taken by the UPDATE serializes
// concurrent writers on the same order, and the loser sees zero rows.
//
// ============================================================================

pub const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const ORDER_NUMBER_CONSTRAINT: &str = "orders_order_number_key";

const ORDER_COLUMNS: &str = "id, order_number, customer_id, vendor_id, provider_id, address_id, service_id, \
     status, quantity, unit_price, service_fee, total_price, payment_method, payment_status, \
     estimated_delivery_time, completed_at, created_at, updated_at";

const VENDOR_COLUMNS: &str = "v.id, v.name, v.latitude, v.longitude, v.is_active, v.completed_jobs, v.rating";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Database schema ensured");
        Ok(())
    }
}

fn corrupt(err: impl std::fmt::Display) -> StoreError {
    StoreError::backend(format!("corrupt row: {}", err))
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = row.try_get("status")?;
    let payment_method: String = row.try_get("payment_method")?;
    let payment_status: String = row.try_get("payment_status")?;

    Ok(Order {
        id: row.try_get("id")?,
        order_number: row.try_get("order_number")?,
        customer_id: row.try_get("customer_id")?,
        vendor_id: row.try_get("vendor_id")?,
        provider_id: row.try_get("provider_id")?,
        address_id: row.try_get("address_id")?,
        service_id: row.try_get("service_id")?,
        status: status.parse().map_err(corrupt)?,
        quantity: row.try_get("quantity")?,
        unit_price: row.try_get("unit_price")?,
        service_fee: row.try_get("service_fee")?,
        total_price: row.try_get("total_price")?,
        payment_method: payment_method.parse().map_err(corrupt)?,
        payment_status: payment_status.parse().map_err(corrupt)?,
        estimated_delivery_time: row.try_get("estimated_delivery_time")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn vendor_from_row(row: &PgRow) -> Result<Vendor, StoreError> {
    Ok(Vendor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        coordinates: Coordinates::new(row.try_get("latitude")?, row.try_get("longitude")?),
        is_active: row.try_get("is_active")?,
        completed_jobs: row.try_get("completed_jobs")?,
        rating: row.try_get("rating")?,
    })
}

fn history_from_row(row: &PgRow) -> Result<StatusHistoryEntry, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(StatusHistoryEntry {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        status: status.parse().map_err(corrupt)?,
        notes: row.try_get("notes")?,
        changed_by: row.try_get("changed_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxMessage, StoreError> {
    Ok(OutboxMessage {
        id: row.try_get("id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
        attempts: row.try_get("attempts")?,
    })
}

fn map_insert_error(err: sqlx::Error, order_number: &str) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() && db_err.constraint() == Some(ORDER_NUMBER_CONSTRAINT) {
            return StoreError::DuplicateOrderNumber(order_number.to_string());
        }
    }
    err.into()
}

async fn insert_history(tx: &mut Transaction<'_, Postgres>, entry: &StatusHistoryEntry) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO order_status_history (id, order_id, status, notes, changed_by, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(entry.id)
    .bind(entry.order_id)
    .bind(entry.status.as_str())
    .bind(&entry.notes)
    .bind(entry.changed_by)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_outbox(tx: &mut Transaction<'_, Postgres>, message: &OutboxMessage) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO outbox_messages (id, aggregate_id, event_type, payload, created_at, attempts)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(message.id)
    .bind(message.aggregate_id)
    .bind(&message.event_type)
    .bind(&message.payload)
    .bind(message.created_at)
    .bind(message.attempts)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl OrderStore for PgStore {
    async fn address(&self, address_id: Uuid) -> Result<DeliveryAddress, StoreError> {
        let row = sqlx::query("SELECT id, customer_id, latitude, longitude FROM customer_addresses WHERE id = $1")
            .bind(address_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { entity: "address", id: address_id })?;

        Ok(DeliveryAddress {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            coordinates: Coordinates::new(row.try_get("latitude")?, row.try_get("longitude")?),
        })
    }

    async fn vendor(&self, vendor_id: Uuid) -> Result<Vendor, StoreError> {
        let query = format!("SELECT {VENDOR_COLUMNS} FROM vendors v WHERE v.id = $1");
        let row = sqlx::query(&query)
            .bind(vendor_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { entity: "vendor", id: vendor_id })?;
        vendor_from_row(&row)
    }

    async fn provider(&self, provider_id: Uuid) -> Result<Provider, StoreError> {
        let row = sqlx::query(
            "SELECT id, vendor_id, name, is_available, completed_jobs, rating FROM providers WHERE id = $1",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { entity: "provider", id: provider_id })?;

        Ok(Provider {
            id: row.try_get("id")?,
            vendor_id: row.try_get("vendor_id")?,
            name: row.try_get("name")?,
            is_available: row.try_get("is_available")?,
            completed_jobs: row.try_get("completed_jobs")?,
            rating: row.try_get("rating")?,
        })
    }

    async fn active_vendors(&self) -> Result<Vec<Vendor>, StoreError> {
        let query = format!("SELECT {VENDOR_COLUMNS} FROM vendors v WHERE v.is_active");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(vendor_from_row).collect()
    }

    async fn active_offers(&self, service_id: Uuid) -> Result<Vec<VendorOffer>, StoreError> {
        let query = format!(
            "SELECT {VENDOR_COLUMNS}, s.service_id, s.unit_price, s.service_fee
             FROM vendors v
             JOIN vendor_services s ON s.vendor_id = v.id
             WHERE v.is_active AND s.service_id = $1"
        );
        let rows = sqlx::query(&query).bind(service_id).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                Ok(VendorOffer {
                    vendor: vendor_from_row(row)?,
                    price: ServicePrice {
                        service_id: row.try_get("service_id")?,
                        unit_price: row.try_get("unit_price")?,
                        service_fee: row.try_get("service_fee")?,
                    },
                })
            })
            .collect()
    }

    async fn order(&self, order_id: Uuid) -> Result<Order, StoreError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { entity: "order", id: order_id })?;
        order_from_row(&row)
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE ($1::uuid IS NULL OR customer_id = $1)
               AND ($2::uuid IS NULL OR vendor_id = $2)
               AND ($3::uuid IS NULL OR provider_id = $3)
               AND ($4::text IS NULL OR status = $4)
             ORDER BY created_at DESC, id DESC
             LIMIT $5"
        );
        let rows = sqlx::query(&query)
            .bind(filter.customer_id)
            .bind(filter.vendor_id)
            .bind(filter.provider_id)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, order_id, status, notes, changed_by, created_at
             FROM order_status_history WHERE order_id = $1 ORDER BY seq ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            // every stored order has at least its creation entry
            return Err(StoreError::NotFound { entity: "order", id: order_id });
        }
        rows.iter().map(history_from_row).collect()
    }

    async fn insert_order(&self, new_order: NewOrder) -> Result<Order, StoreError> {
        let NewOrder { order, history, outbox } = new_order;
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "INSERT INTO orders ({ORDER_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        );
        sqlx::query(&query)
            .bind(order.id)
            .bind(&order.order_number)
            .bind(order.customer_id)
            .bind(order.vendor_id)
            .bind(order.provider_id)
            .bind(order.address_id)
            .bind(order.service_id)
            .bind(order.status.as_str())
            .bind(order.quantity)
            .bind(order.unit_price)
            .bind(order.service_fee)
            .bind(order.total_price)
            .bind(order.payment_method.as_str())
            .bind(order.payment_status.as_str())
            .bind(order.estimated_delivery_time)
            .bind(order.completed_at)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_insert_error(e, &order.order_number))?;

        insert_history(&mut tx, &history).await?;
        insert_outbox(&mut tx, &outbox).await?;
        tx.commit().await?;

        Ok(order)
    }

    async fn commit_status_change(&self, change: StatusChange) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "UPDATE orders
             SET status = $1,
                 provider_id = COALESCE($2, provider_id),
                 completed_at = COALESCE(completed_at, $3),
                 updated_at = NOW()
             WHERE id = $4 AND status = $5
             RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(change.new_status.as_str())
            .bind(change.provider_id)
            .bind(change.completed_at)
            .bind(change.order_id)
            .bind(change.expected_status.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
                .bind(change.order_id)
                .fetch_one(&mut *tx)
                .await?;
            return Err(if exists {
                StoreError::StatusConflict {
                    order_id: change.order_id,
                    expected: change.expected_status,
                }
            } else {
                StoreError::NotFound { entity: "order", id: change.order_id }
            });
        };
        let order = order_from_row(&row)?;

        if let Some(credit) = change.job_credit {
            let updated = sqlx::query("UPDATE vendors SET completed_jobs = completed_jobs + 1 WHERE id = $1")
                .bind(credit.vendor_id)
                .execute(&mut *tx)
                .await?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::NotFound { entity: "vendor", id: credit.vendor_id });
            }

            if let Some(provider_id) = credit.provider_id {
                let updated = sqlx::query("UPDATE providers SET completed_jobs = completed_jobs + 1 WHERE id = $1")
                    .bind(provider_id)
                    .execute(&mut *tx)
                    .await?;
                if updated.rows_affected() == 0 {
                    return Err(StoreError::NotFound { entity: "provider", id: provider_id });
                }
            }
        }

        insert_history(&mut tx, &change.history).await?;
        insert_outbox(&mut tx, &change.outbox).await?;
        tx.commit().await?;

        tracing::debug!(
            order_id = %order.id,
            from = %change.expected_status,
            to = %order.status,
            "Committed status change"
        );

        Ok(order)
    }

    async fn rating_scores(&self, subject: RatingSubject) -> Result<Vec<i16>, StoreError> {
        let (query, id) = match subject {
            RatingSubject::Vendor(id) => ("SELECT score FROM ratings WHERE vendor_id = $1", id),
            RatingSubject::Provider(id) => ("SELECT score FROM ratings WHERE provider_id = $1", id),
        };
        Ok(sqlx::query_scalar(query).bind(id).fetch_all(&self.pool).await?)
    }

    async fn set_rating(&self, subject: RatingSubject, rating: Option<Decimal>) -> Result<(), StoreError> {
        let (query, entity, id) = match subject {
            RatingSubject::Vendor(id) => ("UPDATE vendors SET rating = $2 WHERE id = $1", "vendor", id),
            RatingSubject::Provider(id) => ("UPDATE providers SET rating = $2 WHERE id = $1", "provider", id),
        };
        let updated = sqlx::query(query).bind(id).bind(rating).execute(&self.pool).await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity, id });
        }
        Ok(())
    }

    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, aggregate_id, event_type, payload, created_at, attempts
             FROM outbox_messages
             WHERE published_at IS NULL AND dead_lettered_at IS NULL
             ORDER BY seq ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(outbox_from_row).collect()
    }

    async fn mark_outbox_published(&self, message_id: Uuid) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE outbox_messages SET published_at = NOW() WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "outbox message", id: message_id });
        }
        Ok(())
    }

    async fn record_outbox_failure(
        &self,
        message_id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> Result<bool, StoreError> {
        let dead: Option<bool> = sqlx::query_scalar(
            "UPDATE outbox_messages
             SET attempts = attempts + 1,
                 last_error = $2,
                 dead_lettered_at = CASE WHEN attempts + 1 >= $3 THEN NOW() ELSE NULL END
             WHERE id = $1
             RETURNING dead_lettered_at IS NOT NULL",
        )
        .bind(message_id)
        .bind(error)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        dead.ok_or(StoreError::NotFound { entity: "outbox message", id: message_id })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
//
// Queries themselves need a live PostgreSQL instance; these tests only pin
// the pieces that must agree with the schema file.
//
// ============================================================================
