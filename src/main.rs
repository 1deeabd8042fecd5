use actix::prelude::*;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use dispatch_core::actors::{FlushOutbox, OutboxRelayActor, RatingRefreshActor};
use dispatch_core::config::AppConfig;
use dispatch_core::domain::order::{
    ActorContext, CreateOrderRequest, DeliveryAddress, LifecycleConfig, OrderLifecycle, OrderStatus, PaymentMethod,
};
use dispatch_core::domain::vendor::{Provider, RatingSubject, Vendor};
use dispatch_core::geo::Coordinates;
use dispatch_core::messaging::{EventPublisher, LogPublisher, RedpandaPublisher};
use dispatch_core::metrics::{self, Metrics};
use dispatch_core::store::{InMemoryStore, OrderStore, PgStore};
use dispatch_core::utils::RetryConfig;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dispatch_core=debug")))
        .init();

    tracing::info!("🚀 Starting dispatch core");

    let config = AppConfig::from_env()?;

    // === 1. Initialize Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // Start metrics HTTP server in background thread
    let metrics_registry = metrics.registry().clone();
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        }),
        Err(e) => tracing::error!("Could not start metrics runtime: {}", e),
    });

    // === 2. Storage ===
    let demo_store = match &config.database_url {
        Some(_) => None,
        None => {
            tracing::warn!("DATABASE_URL not set, running against an in-memory store with demo data");
            Some(Arc::new(InMemoryStore::new()))
        }
    };
    let store: Arc<dyn OrderStore> = match (&config.database_url, &demo_store) {
        (Some(url), _) => {
            tracing::info!("Connecting to PostgreSQL...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await?;
            let store = PgStore::new(pool);
            store.migrate().await?;
            Arc::new(store)
        }
        (None, Some(memory)) => memory.clone(),
        (None, None) => anyhow::bail!("no store configured"),
    };

    // === 3. Event publisher (with circuit breaker when Redpanda is configured) ===
    let publisher: Arc<dyn EventPublisher> = match &config.redpanda_brokers {
        Some(brokers) => Arc::new(RedpandaPublisher::new(brokers, &config.events_topic)?),
        None => {
            tracing::warn!("REDPANDA_BROKERS not set, order events will be logged only");
            Arc::new(LogPublisher)
        }
    };

    // === 4. Start background actors ===
    let relay = OutboxRelayActor::new(store.clone(), publisher, config.relay)
        .with_metrics(metrics.clone())
        .start();
    let ratings = RatingRefreshActor::new(store.clone(), RetryConfig::default())
        .with_metrics(metrics.clone())
        .start();

    let lifecycle = OrderLifecycle::new(store.clone(), config.service_region, LifecycleConfig::default())
        .with_rating_refresh(ratings.recipient())
        .with_metrics(metrics.clone());

    // === 5. Demonstrate the order lifecycle on demo data ===
    if let Some(memory) = &demo_store {
        run_demo(memory, &lifecycle).await?;
        let report = relay.send(FlushOutbox).await??;
        tracing::info!(published = report.published, "✅ Demo events relayed");
    }

    tracing::info!("⏳ Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    // Publish whatever committed since the last tick
    match relay.send(FlushOutbox).await {
        Ok(Ok(report)) => tracing::info!(published = report.published, "Final outbox flush"),
        Ok(Err(e)) => tracing::error!(error = %e, "Final outbox flush failed"),
        Err(e) => tracing::error!(error = %e, "Outbox relay unavailable"),
    }

    tracing::info!("👋 Shutting down");
    System::current().stop();
    Ok(())
}

/// Seed one vendor with a provider and a customer address, then walk an
/// order from creation to completion.
async fn run_demo(store: &InMemoryStore, lifecycle: &OrderLifecycle) -> anyhow::Result<()> {
    let service_id = Uuid::new_v4();
    let vendor = ActorContext::vendor(Uuid::new_v4());
    let provider = ActorContext::provider(Uuid::new_v4());
    let customer = ActorContext::customer(Uuid::new_v4());
    let address_id = Uuid::new_v4();

    store.add_vendor(Vendor {
        id: vendor.id,
        name: "Westlands Gas".to_string(),
        coordinates: Coordinates::new(-1.2676, 36.8108),
        is_active: true,
        completed_jobs: 0,
        rating: None,
    });
    store.set_service_price(vendor.id, service_id, Decimal::new(850, 2), Decimal::new(200, 2));
    store.add_provider(Provider {
        id: provider.id,
        vendor_id: vendor.id,
        name: "Otieno".to_string(),
        is_available: true,
        completed_jobs: 0,
        rating: None,
    });
    store.add_address(DeliveryAddress {
        id: address_id,
        customer_id: customer.id,
        coordinates: Coordinates::new(-1.2921, 36.8219),
    });
    store.add_rating(RatingSubject::Vendor(vendor.id), 5);
    store.add_rating(RatingSubject::Provider(provider.id), 4);

    tracing::info!("📝 Demonstrating order lifecycle with outbox pattern");

    let created = lifecycle
        .create(
            CreateOrderRequest {
                customer_id: customer.id,
                address_id,
                service_id,
                quantity: 2,
                payment_method: PaymentMethod::MobileMoney,
            },
            &customer,
        )
        .await?;
    let order_id = created.order.id;
    tracing::info!(
        order_number = %created.order.order_number,
        total_price = %created.order.total_price,
        distance_km = created.vendor_distance_km,
        "✅ Order created"
    );

    lifecycle.transition(order_id, OrderStatus::Accepted, &vendor, None).await?;
    lifecycle.assign_provider(order_id, provider.id, &vendor).await?;
    lifecycle.transition(order_id, OrderStatus::EnRoute, &provider, None).await?;
    lifecycle.transition(order_id, OrderStatus::Delivered, &provider, None).await?;

    if let Err(e) = lifecycle.cancel(order_id, &customer, None).await {
        tracing::info!(refused = e.is_business(), "Customer cancel after delivery refused: {}", e);
    }

    let completed = lifecycle.complete(order_id, &customer).await?;
    tracing::info!(order_id = %completed.id, status = %completed.status, "✅ Order completed");

    for entry in lifecycle.history(order_id).await? {
        tracing::info!(status = %entry.status, notes = ?entry.notes, at = %entry.created_at, "History");
    }

    Ok(())
}
