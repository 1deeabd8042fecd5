use actix::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use crate::messaging::EventPublisher;
use crate::metrics::Metrics;
use crate::store::OrderStore;

// ============================================================================
// Outbox Relay Actor - Polls the outbox and publishes committed events
// ============================================================================
//
// 1. Fetches unpublished outbox rows in commit order
// 2. Publishes each through the configured EventPublisher
// 3. Marks it published, or records the failure
//
// A failed publish ends the batch so later events of the same order cannot
// overtake it. After `max_attempts` failures the row is dead-lettered: kept
// in storage, excluded from polling, logged at error.
//
// Delivery is at-least-once. A crash between publish and mark republishes.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_attempts: i32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 100,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// Relay one batch of pending outbox messages.
pub async fn relay_once(
    store: &dyn OrderStore,
    publisher: &dyn EventPublisher,
    config: &RelayConfig,
    metrics: Option<&Metrics>,
) -> anyhow::Result<RelayReport> {
    let pending = store.pending_outbox(config.batch_size).await?;
    let mut report = RelayReport::default();

    for message in pending {
        match publisher.publish(&message).await {
            Ok(()) => {
                store.mark_outbox_published(message.id).await?;
                report.published += 1;
                if let Some(metrics) = metrics {
                    metrics.record_outbox("published");
                }

                tracing::debug!(
                    event_id = %message.id,
                    event_type = %message.event_type,
                    order_id = %message.aggregate_id,
                    "Published outbox message"
                );
            }
            Err(e) => {
                let dead_lettered = store
                    .record_outbox_failure(message.id, &e.to_string(), config.max_attempts)
                    .await?;

                if dead_lettered {
                    report.dead_lettered += 1;
                    tracing::error!(
                        event_id = %message.id,
                        event_type = %message.event_type,
                        order_id = %message.aggregate_id,
                        attempts = message.attempts + 1,
                        error = %e,
                        "💀 Outbox message dead-lettered"
                    );
                } else {
                    report.failed += 1;
                    tracing::warn!(
                        event_id = %message.id,
                        event_type = %message.event_type,
                        attempts = message.attempts + 1,
                        error = %e,
                        "Failed to publish outbox message, will retry"
                    );
                }

                if let Some(metrics) = metrics {
                    metrics.record_outbox(if dead_lettered { "dead_lettered" } else { "failed" });
                }
                break;
            }
        }
    }

    Ok(report)
}

pub struct OutboxRelayActor {
    store: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
    metrics: Option<Arc<Metrics>>,
    draining: bool,
}

impl OutboxRelayActor {
    pub fn new(store: Arc<dyn OrderStore>, publisher: Arc<dyn EventPublisher>, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics: None,
            draining: false,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn poll(&mut self, ctx: &mut Context<Self>) {
        // one batch at a time
        if self.draining {
            return;
        }
        self.draining = true;

        let store = self.store.clone();
        let publisher = self.publisher.clone();
        let config = self.config;
        let metrics = self.metrics.clone();

        ctx.spawn(
            async move { relay_once(store.as_ref(), publisher.as_ref(), &config, metrics.as_deref()).await }
                .into_actor(self)
                .map(|result, act, _ctx| {
                    act.draining = false;
                    match result {
                        Ok(report) if report.published > 0 => {
                            tracing::info!(
                                published = report.published,
                                failed = report.failed,
                                dead_lettered = report.dead_lettered,
                                "📬 Relayed outbox batch"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Failed to relay outbox batch"),
                    }
                }),
        );
    }
}

impl Actor for OutboxRelayActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "OutboxRelayActor started"
        );
        ctx.run_interval(self.config.poll_interval, |act, ctx| act.poll(ctx));
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Relay one batch now instead of waiting for the next tick.
#[derive(Message, Debug)]
#[rtype(result = "anyhow::Result<RelayReport>")]
pub struct FlushOutbox;

impl Handler<FlushOutbox> for OutboxRelayActor {
    type Result = ResponseFuture<anyhow::Result<RelayReport>>;

    fn handle(&mut self, _msg: FlushOutbox, _: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let publisher = self.publisher.clone();
        let config = self.config;
        let metrics = self.metrics.clone();

        Box::pin(async move { relay_once(store.as_ref(), publisher.as_ref(), &config, metrics.as_deref()).await })
    }
}
