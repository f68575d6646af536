//! Poll scheduler - the ingestion cycle
//!
//! One cycle: fetch every tracked symbol concurrently (fixed iteration
//! order), build a PriceEvent per successful fetch, publish them all,
//! then block on every outstanding acknowledgment before sleeping out
//! the rest of the interval. The barrier bounds unacknowledged backlog
//! to one cycle's worth and guarantees no event is left dangling at
//! shutdown.

use super::publisher::{Delivery, EventPublisher, PublishAckError};
use super::quote_source::QuoteSource;
use super::retry::{ExponentialBackoff, RetryPolicy, FIXED_RETRY_DELAY};
use crate::pipeline::types::PriceEvent;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// What one poll cycle accomplished.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleOutcome {
    pub published: usize,
    pub fetch_failures: usize,
    pub publish_failures: usize,
}

pub struct PollScheduler {
    symbols: Vec<String>,
    interval: Duration,
    source: Arc<dyn QuoteSource>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
}

impl PollScheduler {
    pub fn new(
        symbols: Vec<String>,
        interval: Duration,
        source: Arc<dyn QuoteSource>,
        publisher: Arc<dyn EventPublisher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            symbols,
            interval,
            source,
            publisher,
            retry,
        }
    }

    /// Run one poll cycle to completion (including the ack barrier).
    pub async fn run_cycle(&self) -> CycleOutcome {
        // Fetch phase: one task per symbol so a slow or failing source
        // for one symbol never stalls the others
        let mut fetches = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let source = Arc::clone(&self.source);
            let owned = symbol.clone();
            fetches.push((
                symbol.clone(),
                tokio::spawn(async move { source.fetch_quote(&owned).await }),
            ));
        }

        let mut events = Vec::new();
        let mut fetch_failures = 0;
        for (symbol, handle) in fetches {
            match handle.await {
                Ok(Ok(snapshot)) => events.push(PriceEvent {
                    symbol,
                    price: snapshot.price,
                    currency: snapshot.currency,
                    observed_at: Utc::now(),
                }),
                Ok(Err(e)) => {
                    log::warn!("⚠️  skipping {} this cycle: {}", symbol, e);
                    fetch_failures += 1;
                }
                Err(e) => {
                    log::warn!("⚠️  fetch task for {} died: {}", symbol, e);
                    fetch_failures += 1;
                }
            }
        }

        // Publish phase: issue every publish, then the ack barrier
        let mut deliveries = Vec::with_capacity(events.len());
        for event in events {
            let publisher = Arc::clone(&self.publisher);
            let retry = self.retry;
            let symbol = event.symbol.clone();
            deliveries.push((
                symbol,
                tokio::spawn(async move {
                    publish_with_retry(publisher.as_ref(), &event, retry).await
                }),
            ));
        }

        let mut published = 0;
        let mut publish_failures = 0;
        for (symbol, handle) in deliveries {
            match handle.await {
                Ok(Ok(delivery)) => {
                    log::info!(
                        "published {} to partition {} @ offset {}",
                        symbol,
                        delivery.partition,
                        delivery.offset
                    );
                    published += 1;
                }
                Ok(Err(e)) => {
                    log::warn!("❌ dropping event for {}: {}", symbol, e);
                    publish_failures += 1;
                }
                Err(e) => {
                    log::warn!("❌ publish task for {} died: {}", symbol, e);
                    publish_failures += 1;
                }
            }
        }

        CycleOutcome {
            published,
            fetch_failures,
            publish_failures,
        }
    }

    /// Poll until shutdown is signalled.
    ///
    /// Shutdown is only honored between cycles: the in-flight cycle
    /// always drains its acknowledgments first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "🚀 poll loop started: {} symbols every {}s",
            self.symbols.len(),
            self.interval.as_secs()
        );

        loop {
            let cycle_start = Instant::now();
            let outcome = self.run_cycle().await;
            log::info!(
                "🔁 cycle complete: {} published, {} fetch failures, {} publish failures ({}ms)",
                outcome.published,
                outcome.fetch_failures,
                outcome.publish_failures,
                cycle_start.elapsed().as_millis()
            );

            if *shutdown.borrow() {
                break;
            }

            // Sleep out the remainder of the interval, floored at zero
            let sleep_for = self.interval.saturating_sub(cycle_start.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
        }

        log::info!("✅ poll loop stopped, all in-flight publishes resolved");
    }
}

/// Publish one event under the configured retry policy.
async fn publish_with_retry(
    publisher: &dyn EventPublisher,
    event: &PriceEvent,
    policy: RetryPolicy,
) -> Result<Delivery, PublishAckError> {
    match policy {
        RetryPolicy::None => publisher.publish(event).await,

        RetryPolicy::Fixed { attempts } => {
            let mut tried = 0;
            loop {
                match publisher.publish(event).await {
                    Ok(delivery) => return Ok(delivery),
                    Err(e) => {
                        tried += 1;
                        if tried > attempts {
                            log::warn!("giving up on {}: {}", event.symbol, e);
                            return Err(PublishAckError::RetriesExhausted {
                                symbol: event.symbol.clone(),
                                attempts: tried,
                            });
                        }
                        log::warn!(
                            "publish failed for {} ({}), retry {}/{}",
                            event.symbol,
                            e,
                            tried,
                            attempts
                        );
                        tokio::time::sleep(FIXED_RETRY_DELAY).await;
                    }
                }
            }
        }

        RetryPolicy::Backoff {
            initial_secs,
            max_secs,
            retries,
        } => {
            let mut backoff = ExponentialBackoff::new(initial_secs, max_secs, retries);
            let mut tried = 0;
            loop {
                match publisher.publish(event).await {
                    Ok(delivery) => return Ok(delivery),
                    Err(e) => {
                        tried += 1;
                        log::warn!("publish failed for {}: {}", event.symbol, e);
                        if backoff.sleep().await.is_err() {
                            return Err(PublishAckError::RetriesExhausted {
                                symbol: event.symbol.clone(),
                                attempts: tried,
                            });
                        }
                    }
                }
            }
        }
    }
}
