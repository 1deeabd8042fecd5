use chrono::{DateTime, Duration, Utc};
use rand::{distr::Alphanumeric, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::value_objects::Quantity;

// ============================================================================
// Pricing, ETA and order numbers - computed once at creation
// ============================================================================

/// Unit price, fee and total frozen on the order at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub unit_price: Decimal,
    pub service_fee: Decimal,
    pub total_price: Decimal,
}

impl PriceSnapshot {
    /// total = unit price * quantity + service fee
    pub fn compute(unit_price: Decimal, service_fee: Decimal, quantity: Quantity) -> Self {
        Self {
            unit_price,
            service_fee,
            total_price: unit_price * Decimal::from(quantity.get()) + service_fee,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaPolicy {
    pub base_minutes: i64,
    pub minutes_per_km: f64,
    pub max_minutes: i64,
}

impl Default for EtaPolicy {
    fn default() -> Self {
        Self {
            base_minutes: 30,
            minutes_per_km: 1.0,
            max_minutes: 60,
        }
    }
}

impl EtaPolicy {
    pub fn minutes_for(&self, distance_km: f64) -> i64 {
        let travel = (distance_km.max(0.0) * self.minutes_per_km).round();
        let total = self.base_minutes.saturating_add(travel as i64);
        total.min(self.max_minutes)
    }

    pub fn estimate(&self, from: DateTime<Utc>, distance_km: f64) -> DateTime<Utc> {
        from + Duration::minutes(self.minutes_for(distance_km))
    }
}

const ORDER_NUMBER_SUFFIX_LEN: usize = 4;

/// `ORD-YYYYMMDD-HHMMSS-XXXX` with a random alphanumeric suffix.
/// Uniqueness is enforced by the store; callers retry on collision.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ORDER_NUMBER_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();

    format!("ORD-{}-{}", now.format("%Y%m%d-%H%M%S"), suffix)
}
