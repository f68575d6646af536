//! Aggregator configuration from environment variables

use std::env;

/// Configuration for the aggregator binary.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the SQLite view store
    pub db_path: String,

    /// Kafka bootstrap servers
    pub kafka_bootstrap: String,

    /// Topic carrying PriceEvents
    pub topic: String,

    /// Consumer group id
    pub group_id: String,

    /// Channel buffer between consumer and engine (events)
    pub channel_buffer: usize,

    /// View flush interval in milliseconds
    pub flush_interval_ms: u64,

    /// Target lag: maximum age of events guaranteed to be reflected
    /// in the views (seconds). Also controls when buckets settle.
    pub target_lag_secs: i64,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `QUOTEFLOW_DB_PATH` (default: quoteflow.db)
    /// - `KAFKA_BOOTSTRAP` (default: localhost:9092)
    /// - `QUOTES_TOPIC` (default: quotes.v1)
    /// - `KAFKA_GROUP_ID` (default: aggregator.v1)
    /// - `EVENT_CHANNEL_BUFFER` (default: 10000)
    /// - `VIEW_FLUSH_INTERVAL_MS` (default: 5000)
    /// - `TARGET_LAG_SECS` (default: 60)
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("QUOTEFLOW_DB_PATH").unwrap_or_else(|_| "quoteflow.db".to_string()),

            kafka_bootstrap: env::var("KAFKA_BOOTSTRAP")
                .unwrap_or_else(|_| "localhost:9092".to_string()),

            topic: env::var("QUOTES_TOPIC").unwrap_or_else(|_| "quotes.v1".to_string()),

            group_id: env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "aggregator.v1".to_string()),

            channel_buffer: env::var("EVENT_CHANNEL_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),

            flush_interval_ms: env::var("VIEW_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),

            target_lag_secs: env::var("TARGET_LAG_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        }
    }
}
