// ============================================================================
// dispatch_core - order lifecycle for a local delivery marketplace
// ============================================================================
//
// - geo       - great-circle distance and the service region
// - domain    - order state machine, history log, geo-matcher, orchestrator
// - store     - storage boundary (PostgreSQL and in-memory)
// - messaging - event sink, outbox records, Redpanda publisher
// - actors    - outbox relay and rating refresh workers
// - metrics   - Prometheus registry and exposition server
// - utils     - retry and circuit breaker
// - config    - environment configuration
//
// ============================================================================

pub mod actors;
pub mod config;
pub mod domain;
pub mod geo;
pub mod messaging;
pub mod metrics;
pub mod store;
pub mod utils;
