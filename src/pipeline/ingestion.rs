//! View maintenance loop - channel ingestion plus unified flush
//!
//! The only place engine state is mutated and the only flush mechanism:
//! 1. Receives PriceEvents from the consumer via an mpsc channel
//! 2. Applies each event to the engine (single lock acquisition)
//! 3. On every flush tick, builds a snapshot under the lock, releases
//!    it, then writes the snapshot to the view store
//!
//! When the channel closes (consumer shutdown) a final flush runs before
//! the loop exits, so nothing observed is left unpublished.

use super::db::ViewStore;
use super::engine::AggregationEngine;
use super::types::PriceEvent;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

pub async fn start_view_maintenance(
    mut rx: mpsc::Receiver<PriceEvent>,
    engine: Arc<Mutex<AggregationEngine>>,
    store: Arc<dyn ViewStore>,
    flush_interval_ms: u64,
) {
    log::info!(
        "🚀 view maintenance started (flush every {}ms)",
        flush_interval_ms
    );

    let mut flush_timer = interval(Duration::from_millis(flush_interval_ms));
    let mut event_count = 0u64;
    let mut last_log = Instant::now();

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(event) => {
                        {
                            let mut guard = engine.lock().unwrap();
                            guard.process_event(event);
                        }
                        event_count += 1;

                        if last_log.elapsed().as_secs() >= 10 {
                            let rate = event_count as f64 / last_log.elapsed().as_secs_f64();
                            log::info!("📊 ingestion rate: {:.1} events/sec", rate);
                            last_log = Instant::now();
                            event_count = 0;
                        }
                    }
                    None => {
                        log::info!("event channel closed, running final flush");
                        flush_views(&engine, store.as_ref()).await;
                        break;
                    }
                }
            }

            _ = flush_timer.tick() => {
                flush_views(&engine, store.as_ref()).await;
            }
        }
    }

    log::info!("✅ view maintenance stopped");
}

/// One refresh cycle: snapshot under the lock, write unlocked.
///
/// A computation failure is fatal to this cycle only; a write failure
/// re-queues the drained anomalies. Either way the store keeps serving
/// the previous refresh.
async fn flush_views(engine: &Arc<Mutex<AggregationEngine>>, store: &dyn ViewStore) {
    let snapshot = {
        let mut guard = engine.lock().unwrap();
        if guard.is_empty() {
            return; // nothing observed yet, nothing to publish
        }
        guard.build_snapshot()
    };

    match snapshot {
        Ok(snapshot) => match store.write_snapshot(&snapshot).await {
            Ok(()) => {
                log::debug!(
                    "✅ flushed views: {} symbols, {} avg rows, {} anomalies, {} ranked",
                    snapshot.latest_prices.len(),
                    snapshot.moving_avg.len(),
                    snapshot.anomalies.len(),
                    snapshot.leaderboard.len()
                );
            }
            Err(e) => {
                log::error!("❌ view store write failed: {} (previous views retained)", e);
                let mut guard = engine.lock().unwrap();
                guard.requeue_anomalies(snapshot.anomalies);
            }
        },
        Err(e) => {
            log::error!(
                "❌ refresh computation failed: {} (previous views retained)",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::SqliteViewStore;
    use chrono::{TimeZone, Utc};
    use tempfile::NamedTempFile;

    fn event(symbol: &str, price: f64, ts: i64) -> PriceEvent {
        PriceEvent {
            symbol: symbol.to_string(),
            price: Some(price),
            currency: Some("USD".to_string()),
            observed_at: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    fn open_store() -> (NamedTempFile, Arc<SqliteViewStore>) {
        let temp = NamedTempFile::new().unwrap();
        let store = Arc::new(SqliteViewStore::open(temp.path().to_str().unwrap()).unwrap());
        (temp, store)
    }

    #[tokio::test]
    async fn test_events_flow_into_store() {
        let (tx, rx) = mpsc::channel(100);
        let engine = Arc::new(Mutex::new(AggregationEngine::new(60)));
        let (_temp, store) = open_store();

        let handle = tokio::spawn(start_view_maintenance(
            rx,
            engine.clone(),
            store.clone(),
            50,
        ));

        tx.send(event("SNOW", 171.0, 1_700_000_000)).await.unwrap();
        tx.send(event("AMZN", 200.0, 1_700_000_000)).await.unwrap();

        // Closing the channel triggers the final flush and loop exit
        drop(tx);
        handle.await.unwrap();

        let latest = store.latest_prices().unwrap();
        assert_eq!(latest.len(), 2);

        let board = store.leaderboard().unwrap();
        assert_eq!(board[0].symbol, "AMZN");
        assert_eq!(board[0].price_rank, 1);
        assert_eq!(board[1].symbol, "SNOW");
        assert_eq!(board[1].price_rank, 2);
    }

    #[tokio::test]
    async fn test_no_flush_before_first_event() {
        let (tx, rx) = mpsc::channel::<PriceEvent>(10);
        let engine = Arc::new(Mutex::new(AggregationEngine::new(60)));
        let (_temp, store) = open_store();

        let handle = tokio::spawn(start_view_maintenance(
            rx,
            engine.clone(),
            store.clone(),
            10,
        ));

        // Let a few flush ticks pass with an empty engine
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
        handle.await.unwrap();

        assert!(store.latest_prices().unwrap().is_empty());
        assert!(store.view_health().unwrap().is_empty());
    }
}
