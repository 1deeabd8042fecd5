// ============================================================================
// Order Domain - Business Logic for the Order Lifecycle
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (OrderStatus, ActorContext, PaymentMethod, Quantity)
// - State machine (legal status edges and who may cancel)
// - Records (Order, StatusHistoryEntry) and the price snapshot
// - Events (order.created, order.status.changed, ...)
// - Errors (LifecycleError)
// - Status history log
// - Lifecycle orchestrator (OrderLifecycle)
//
// ============================================================================

pub mod errors;
pub mod events;
pub mod history;
pub mod lifecycle;
pub mod model;
pub mod pricing;
pub mod state_machine;
pub mod value_objects;

// Re-export for convenience
pub use errors::*;
pub use events::*;
pub use history::StatusHistoryLog;
pub use lifecycle::{CreateOrderRequest, LifecycleConfig, OrderLifecycle};
pub use model::*;
pub use pricing::{generate_order_number, EtaPolicy, PriceSnapshot};
pub use state_machine::OrderStateMachine;
pub use value_objects::*;
