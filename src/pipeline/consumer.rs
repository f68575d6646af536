//! Event log consumer
//!
//! Tails the quotes topic and forwards decoded PriceEvents to the view
//! maintenance loop. Per-symbol ordering comes from keyed partitioning
//! in the log itself; nothing here reorders records.
//!
//! Failure posture: a malformed record is skipped with a warning (never
//! a poison loop), and an unreadable log backs off and retries forever
//! while the engine keeps serving its last computed views.

use super::config::EngineConfig;
use super::types::PriceEvent;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::ClientConfig;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// The log cannot be read right now. Non-fatal on the engine side:
/// views go stale-but-available, never blank.
#[derive(Debug, Error)]
#[error("event log unavailable: {0}")]
pub struct LogUnavailableError(#[from] pub KafkaError);

const RECONNECT_INITIAL_SECS: u64 = 1;
const RECONNECT_MAX_SECS: u64 = 30;

/// Build a consumer subscribed to the quotes topic.
///
/// Offsets auto-commit; redelivered records after a restart are absorbed
/// by the engine's duplicate guard.
pub fn build_consumer(config: &EngineConfig) -> Result<StreamConsumer, KafkaError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_bootstrap)
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", "earliest")
        .create()?;

    consumer.subscribe(&[config.topic.as_str()])?;
    Ok(consumer)
}

/// Consume until the engine channel closes.
pub async fn run_consumer(consumer: StreamConsumer, tx: mpsc::Sender<PriceEvent>) {
    let mut retry_delay_secs = RECONNECT_INITIAL_SECS;

    loop {
        match consumer.recv().await {
            Ok(msg) => {
                retry_delay_secs = RECONNECT_INITIAL_SECS;

                let payload = match msg.payload_view::<str>() {
                    Some(Ok(s)) => s,
                    _ => {
                        log::warn!("skipping record with empty/invalid payload");
                        continue;
                    }
                };

                let event: PriceEvent = match serde_json::from_str(payload) {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("bad event json, skipping: {} payload={}", e, payload);
                        continue;
                    }
                };

                if tx.send(event).await.is_err() {
                    log::warn!("engine channel closed, stopping consumer");
                    break;
                }
            }
            Err(e) => {
                let err = LogUnavailableError(e);
                log::warn!(
                    "⚠️  {} - serving last computed views, retrying in {}s",
                    err,
                    retry_delay_secs
                );
                tokio::time::sleep(Duration::from_secs(retry_delay_secs)).await;
                retry_delay_secs = (retry_delay_secs * 2).min(RECONNECT_MAX_SECS);
            }
        }
    }
}
