use actix::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::vendor::{refresh_rating, RatingSubject};
use crate::metrics::Metrics;
use crate::store::OrderStore;
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// Rating Refresh Actor
// ============================================================================
//
// Recomputes vendor and provider average ratings after an order completes.
// The completion is already committed when the message arrives; failures
// here are retried with backoff, logged and counted, and never propagate.
//
// ============================================================================

pub struct RatingRefreshActor {
    store: Arc<dyn OrderStore>,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl RatingRefreshActor {
    pub fn new(store: Arc<dyn OrderStore>, retry: RetryConfig) -> Self {
        Self {
            store,
            retry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Actor for RatingRefreshActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("RatingRefreshActor started");
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message, Debug, Clone, Copy, PartialEq)]
#[rtype(result = "()")]
pub struct RefreshRatings {
    pub vendor_id: Uuid,
    pub provider_id: Option<Uuid>,
}

// ============================================================================
// Handlers
// ============================================================================

impl Handler<RefreshRatings> for RatingRefreshActor {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, msg: RefreshRatings, _: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let retry = self.retry.clone();
        let metrics = self.metrics.clone();

        Box::pin(async move {
            let subjects =
                std::iter::once(RatingSubject::Vendor(msg.vendor_id)).chain(msg.provider_id.map(RatingSubject::Provider));

            for subject in subjects {
                let result = retry_on_transient(&retry, "refresh_rating", |_attempt| {
                    let store = store.clone();
                    async move { refresh_rating(store.as_ref(), subject).await }
                })
                .await;

                let outcome = match result {
                    Ok(rating) => {
                        tracing::info!(subject = %subject, rating = ?rating, "Rating updated");
                        "updated"
                    }
                    Err(e) => {
                        tracing::warn!(subject = %subject, error = %e, "Rating refresh failed, keeping previous value");
                        "failed"
                    }
                };

                if let Some(metrics) = &metrics {
                    metrics.record_rating_refresh(outcome);
                }
            }
        })
    }
}
