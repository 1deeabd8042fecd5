// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

use crate::domain::order::OrderStatus;

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the order lifecycle
// ============================================================================
//
// Provides metrics for:
// - Orders created and status transitions
// - Business refusals by kind
// - Rating refresh outcomes
// - Outbox publish outcomes
// - Orchestrator operation latency
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Lifecycle Metrics
    pub orders_created: IntCounter,
    pub transitions: IntCounterVec,
    pub refusals: IntCounterVec,
    pub operation_duration: HistogramVec,

    // Background Work Metrics
    pub rating_refresh: IntCounterVec,
    pub outbox_published: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("orders_created_total", "Total orders created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Committed order status changes by target status"),
            &["status"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let refusals = IntCounterVec::new(
            Opts::new("order_refusals_total", "Requests refused by a business rule"),
            &["kind"],
        )?;
        registry.register(Box::new(refusals.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new("order_operation_duration_seconds", "Orchestrator operation duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let rating_refresh = IntCounterVec::new(
            Opts::new("rating_refresh_total", "Rating recomputations by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(rating_refresh.clone()))?;

        let outbox_published = IntCounterVec::new(
            Opts::new("outbox_messages_total", "Outbox relay results by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(outbox_published.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            transitions,
            refusals,
            operation_duration,
            rating_refresh,
            outbox_published,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_created(&self) {
        self.orders_created.inc();
    }

    pub fn record_transition(&self, status: OrderStatus) {
        self.transitions.with_label_values(&[status.as_str()]).inc();
    }

    pub fn record_refusal(&self, kind: &str) {
        self.refusals.with_label_values(&[kind]).inc();
    }

    pub fn observe_operation(&self, operation: &str, duration_secs: f64) {
        self.operation_duration.with_label_values(&[operation]).observe(duration_secs);
    }

    /// `outcome` is "updated" or "failed"
    pub fn record_rating_refresh(&self, outcome: &str) {
        self.rating_refresh.with_label_values(&[outcome]).inc();
    }

    /// `outcome` is "published", "failed" or "dead_lettered"
    pub fn record_outbox(&self, outcome: &str) {
        self.outbox_published.with_label_values(&[outcome]).inc();
    }
}
