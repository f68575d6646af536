//! Poller - ingestion scheduler binary
//!
//! Polls the quote source for every tracked symbol on a fixed cadence
//! and publishes PriceEvents onto Kafka, keyed by symbol.
//!
//! Usage:
//!   cargo run --release --bin poller
//!
//! Environment variables: see `PollerConfig::from_env`.

use dotenv::dotenv;
use log::{error, info};
use quoteflow::config::PollerConfig;
use quoteflow::ingest::{KafkaEventPublisher, PollScheduler, YahooQuoteSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let config = PollerConfig::from_env();

    info!("🚀 quoteflow poller");
    info!("   ├─ symbols: {:?}", config.symbols);
    info!("   ├─ interval: {}s", config.poll_interval_secs);
    info!("   ├─ quote api: {}", config.quote_api_url);
    info!("   ├─ kafka: {}", config.kafka_bootstrap);
    info!("   ├─ topic: {}", config.topic);
    info!("   └─ publish retry: {:?}", config.retry_policy);

    let source = Arc::new(YahooQuoteSource::new(config.quote_api_url.clone())?);
    let publisher = Arc::new(KafkaEventPublisher::new(
        &config.kafka_bootstrap,
        config.topic.clone(),
    )?);

    let scheduler = Arc::new(PollScheduler::new(
        config.symbols.clone(),
        Duration::from_secs(config.poll_interval_secs),
        source,
        publisher,
        config.retry_policy,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    info!("🔄 press CTRL+C to shut down gracefully");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  CTRL+C received, finishing current cycle..."),
        Err(e) => error!("❌ failed to listen for CTRL+C: {}", e),
    }

    // The loop drains the in-flight cycle's acks before it stops
    let _ = shutdown_tx.send(true);
    if let Err(e) = loop_handle.await {
        error!("❌ poll loop task failed: {}", e);
    }

    info!("✅ poller stopped");
    Ok(())
}
