use uuid::Uuid;

use super::value_objects::{ActorRole, OrderStatus};
use crate::store::StoreError;

// ============================================================================
// Order Lifecycle Errors
// ============================================================================
//
// Every variant except `Infrastructure` is a business refusal and carries
// enough context for the caller to explain it. `Infrastructure` wraps storage
// failures untouched so the transport layer can decide on retry.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(
        "Invalid status transition from {from} to {to}; allowed next states: {}",
        format_states(.allowed)
    )]
    InvalidTransition {
        from: OrderStatus,
        to: OrderStatus,
        allowed: Vec<OrderStatus>,
    },

    #[error("A {actor} cannot cancel an order in status {status}")]
    CancellationDenied { actor: ActorRole, status: OrderStatus },

    #[error("No vendor available for service {service_id}")]
    NoVendorAvailable { service_id: Uuid },

    #[error("Coordinates ({latitude}, {longitude}) are outside the service region")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("Provider {provider_id} is unavailable: {reason}")]
    ProviderUnavailable { provider_id: Uuid, reason: String },

    #[error("Invalid quantity {0}: must be between 1 and 10")]
    InvalidQuantity(i32),

    #[error("Order {order_id} was modified concurrently, reload and retry")]
    ConcurrentUpdate { order_id: Uuid },

    #[error("Infrastructure failure: {0}")]
    Infrastructure(#[source] StoreError),
}

impl LifecycleError {
    /// True for refusals the caller can act on, false for storage failures.
    pub fn is_business(&self) -> bool {
        !matches!(self, LifecycleError::Infrastructure(_))
    }

    /// Stable label, used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::NotFound { .. } => "not_found",
            LifecycleError::Forbidden(_) => "forbidden",
            LifecycleError::InvalidTransition { .. } => "invalid_transition",
            LifecycleError::CancellationDenied { .. } => "cancellation_denied",
            LifecycleError::NoVendorAvailable { .. } => "no_vendor_available",
            LifecycleError::InvalidCoordinates { .. } => "invalid_coordinates",
            LifecycleError::ProviderUnavailable { .. } => "provider_unavailable",
            LifecycleError::InvalidQuantity(_) => "invalid_quantity",
            LifecycleError::ConcurrentUpdate { .. } => "concurrent_update",
            LifecycleError::Infrastructure(_) => "infrastructure",
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => LifecycleError::NotFound { entity, id },
            StoreError::StatusConflict { order_id, .. } => LifecycleError::ConcurrentUpdate { order_id },
            other => LifecycleError::Infrastructure(other),
        }
    }
}

fn format_states(states: &[OrderStatus]) -> String {
    if states.is_empty() {
        return "none (terminal state)".to_string();
    }
    states.iter().map(OrderStatus::as_str).collect::<Vec<_>>().join(", ")
}
