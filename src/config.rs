use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::actors::RelayConfig;
use crate::geo::{RegionParseError, ServiceRegion};

// ============================================================================
// Application Configuration
// ============================================================================
//
// Read from the environment, with a `.env` file loaded first when present.
// Every variable has a default except the database URL, which is optional:
// without it the binary runs against the in-memory store.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Invalid SERVICE_REGION: {0}")]
    Region(#[from] RegionParseError),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub service_region: ServiceRegion,
    pub redpanda_brokers: Option<String>,
    pub events_topic: String,
    pub metrics_port: u16,
    pub relay: RelayConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let service_region = match non_empty("SERVICE_REGION") {
            Some(raw) => raw.parse()?,
            None => ServiceRegion::global(),
        };

        let relay = RelayConfig {
            poll_interval: Duration::from_millis(parse_or(&lookup, "OUTBOX_POLL_INTERVAL_MS", 2000u64)?),
            batch_size: parse_or(&lookup, "OUTBOX_BATCH_SIZE", 100i64)?,
            max_attempts: parse_or(&lookup, "OUTBOX_MAX_ATTEMPTS", 5i32)?,
        };
        if relay.batch_size < 1 || relay.max_attempts < 1 {
            return Err(ConfigError::Invalid {
                name: "OUTBOX_BATCH_SIZE/OUTBOX_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        let config = Self {
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?,
            service_region,
            redpanda_brokers: non_empty("REDPANDA_BROKERS"),
            events_topic: non_empty("EVENTS_TOPIC").unwrap_or_else(|| "order-events".to_string()),
            metrics_port: parse_or(&lookup, "METRICS_PORT", 9090u16)?,
            relay,
        };

        tracing::info!(
            database = config.database_url.is_some(),
            brokers = config.redpanda_brokers.is_some(),
            events_topic = %config.events_topic,
            metrics_port = config.metrics_port,
            "Configuration loaded"
        );

        Ok(config)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}
