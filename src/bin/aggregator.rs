//! Aggregator - continuous aggregation engine binary
//!
//! Consumes PriceEvents from Kafka and maintains the derived views
//! (latest prices, moving averages, anomalies, leaderboard) in the
//! SQLite view store. The presentation layer reads that store; this
//! process is its only writer.
//!
//! Usage:
//!   cargo run --release --bin aggregator
//!
//! Environment variables: see `EngineConfig::from_env`.

use dotenv::dotenv;
use log::{error, info};
use quoteflow::pipeline::config::EngineConfig;
use quoteflow::pipeline::consumer::{build_consumer, run_consumer};
use quoteflow::pipeline::db::{SqliteViewStore, ViewStore};
use quoteflow::pipeline::engine::AggregationEngine;
use quoteflow::pipeline::ingestion::start_view_maintenance;
use quoteflow::pipeline::types::PriceEvent;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    env_logger::init();

    let config = EngineConfig::from_env();

    info!("🚀 quoteflow aggregator");
    info!("   ├─ kafka: {}", config.kafka_bootstrap);
    info!("   ├─ topic: {} (group {})", config.topic, config.group_id);
    info!("   ├─ view store: {}", config.db_path);
    info!("   ├─ flush interval: {}ms", config.flush_interval_ms);
    info!("   └─ target lag: {}s", config.target_lag_secs);

    let store: Arc<dyn ViewStore> = Arc::new(SqliteViewStore::open(&config.db_path)?);
    let engine = Arc::new(Mutex::new(AggregationEngine::new(config.target_lag_secs)));

    let (tx, rx) = mpsc::channel::<PriceEvent>(config.channel_buffer);

    let consumer = build_consumer(&config)?;
    let consumer_handle = tokio::spawn(run_consumer(consumer, tx));

    let maintenance_handle = tokio::spawn(start_view_maintenance(
        rx,
        engine.clone(),
        store,
        config.flush_interval_ms,
    ));

    info!("🔄 press CTRL+C to shut down gracefully");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  CTRL+C received, shutting down..."),
        Err(e) => error!("❌ failed to listen for CTRL+C: {}", e),
    }

    // Stopping the consumer closes the channel; the maintenance loop
    // runs its final flush and exits
    consumer_handle.abort();
    if let Err(e) = maintenance_handle.await {
        error!("❌ view maintenance task failed: {}", e);
    }

    info!("✅ aggregator stopped");
    Ok(())
}
