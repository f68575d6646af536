//! Event publisher - the producer seam onto the event log
//!
//! Records are keyed by symbol, so the log's keyed partitioning keeps
//! per-symbol order; there is no cross-symbol ordering. `publish`
//! resolves only once the log acknowledges delivery (partition+offset)
//! or reports the failure cause.

use crate::pipeline::types::PriceEvent;
use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use thiserror::Error;

/// Broker acknowledgment for one published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Per-event publish failure. Non-fatal: the event is logged and
/// dropped once the retry policy is exhausted.
#[derive(Debug, Error)]
pub enum PublishAckError {
    #[error("serialize failed for {symbol}: {source}")]
    Serialize {
        symbol: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("event log rejected {symbol}: {source}")]
    Rejected {
        symbol: String,
        #[source]
        source: KafkaError,
    },

    #[error("publish retries exhausted for {symbol} after {attempts} attempts")]
    RetriesExhausted { symbol: String, attempts: u32 },
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event and wait for its delivery acknowledgment.
    async fn publish(&self, event: &PriceEvent) -> Result<Delivery, PublishAckError>;
}

/// Kafka-backed publisher.
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventPublisher {
    pub fn new(bootstrap: &str, topic: impl Into<String>) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.into(),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &PriceEvent) -> Result<Delivery, PublishAckError> {
        let payload =
            serde_json::to_string(event).map_err(|e| PublishAckError::Serialize {
                symbol: event.symbol.clone(),
                source: e,
            })?;

        // Key by symbol to preserve per-symbol ordering in the log
        let record = FutureRecord::to(&self.topic)
            .key(&event.symbol)
            .payload(&payload);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok((partition, offset)) => Ok(Delivery { partition, offset }),
            Err((e, _msg)) => Err(PublishAckError::Rejected {
                symbol: event.symbol.clone(),
                source: e,
            }),
        }
    }
}
