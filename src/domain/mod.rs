// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// - order/  - order records, state machine, history log and the lifecycle
//             orchestrator
// - vendor/ - vendors, providers, service prices and geo-matching
//
// Storage and event delivery are reached only through the `store` and
// `messaging` boundaries.
//
// ============================================================================

pub mod order;
pub mod vendor;
