//! Aggregation engine - per-symbol arena and view snapshots
//!
//! The engine owns one `SymbolState` per symbol (created on the first
//! event, kept forever) and turns the arena into immutable
//! `ViewSnapshot`s on each refresh. Snapshots are assembled under the
//! engine lock and written to the store afterwards, so readers never
//! observe a partially updated view and the views never reflect fewer
//! events than a previous refresh exposed.

use super::state::SymbolState;
use super::types::{AnomalyRow, LatestPriceRow, LeaderboardRow, MovingAvgRow, PriceEvent};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

/// A refresh-cycle computation failure. Fatal to that refresh only:
/// the caller keeps the previous view state and tries again next tick.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("non-finite {view} value computed for {symbol}")]
    NonFiniteValue { view: &'static str, symbol: String },
}

/// Point-in-time copy of all derived views plus the freshness metadata
/// the view store exposes to readers.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub latest_prices: Vec<LatestPriceRow>,
    pub moving_avg: Vec<MovingAvgRow>,
    /// Anomalies flagged since the previous snapshot (append-only rows).
    pub anomalies: Vec<AnomalyRow>,
    pub leaderboard: Vec<LeaderboardRow>,
    /// When this snapshot was computed (epoch seconds).
    pub computed_at: i64,
    /// `observed_at` of the newest event reflected, if any.
    pub last_event_at: Option<i64>,
    /// Monotone count of distinct events reflected.
    pub events_reflected: u64,
}

/// Continuous aggregation engine.
///
/// Single writer: only the ingestion loop mutates it. Consumers get
/// `ViewSnapshot`s, never references into the arena.
pub struct AggregationEngine {
    states: HashMap<String, SymbolState>,
    pending_anomalies: Vec<AnomalyRow>,
    last_event_at: Option<i64>,
    events_reflected: u64,
    target_lag_secs: i64,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl AggregationEngine {
    /// Engine on system time.
    pub fn new(target_lag_secs: i64) -> Self {
        Self::new_with_timestamp_fn(target_lag_secs, Box::new(|| chrono::Utc::now().timestamp()))
    }

    /// Engine on an injected clock, for deterministic tests.
    pub fn new_with_timestamp_fn(
        target_lag_secs: i64,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            states: HashMap::new(),
            pending_anomalies: Vec::new(),
            last_event_at: None,
            events_reflected: 0,
            target_lag_secs,
            now_fn,
        }
    }

    /// Apply one event from the log to the per-symbol state.
    ///
    /// Redeliveries (equal `observed_at` for the symbol) are dropped and
    /// do not advance the event counter.
    pub fn process_event(&mut self, event: PriceEvent) {
        let state = self
            .states
            .entry(event.symbol.clone())
            .or_insert_with(|| SymbolState::new(event.symbol.clone()));

        let outcome = state.apply_event(&event);

        if outcome.duplicate {
            log::debug!(
                "duplicate event dropped: {} @ {}",
                event.symbol,
                event.observed_at
            );
            return;
        }

        if outcome.first_event {
            log::info!("📈 symbol {} is now active", event.symbol);
        }

        let ts = event.observed_at.timestamp();
        self.last_event_at = Some(self.last_event_at.map_or(ts, |cur| cur.max(ts)));
        self.events_reflected += 1;

        if let Some(anomaly) = outcome.anomaly {
            log::info!(
                "🚨 anomaly: {} price={:.4} vs trailing avg {:.4}",
                anomaly.symbol,
                anomaly.price,
                anomaly.moving_avg
            );
            self.pending_anomalies.push(anomaly);
        }
    }

    /// True when no symbol has produced an event yet (nothing to flush).
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Symbols that have transitioned to active.
    pub fn active_symbols(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    /// Assemble a snapshot of all views and drain the anomaly buffer.
    ///
    /// Settled buckets are pruned first; their rows are already final in
    /// the view store. On error the anomaly buffer is left untouched so
    /// nothing is lost to a failed refresh.
    pub fn build_snapshot(&mut self) -> Result<ViewSnapshot, AggregationError> {
        let now = (self.now_fn)();

        for state in self.states.values_mut() {
            state.prune_settled(now, self.target_lag_secs);
        }

        let mut latest_prices = Vec::with_capacity(self.states.len());
        let mut moving_avg = Vec::new();
        for state in self.states.values() {
            if let Some(row) = state.latest_row() {
                latest_prices.push(row);
            }
            for row in state.moving_avg_rows() {
                if !row.avg_price_5min.is_finite() {
                    return Err(AggregationError::NonFiniteValue {
                        view: "moving_avg",
                        symbol: row.symbol,
                    });
                }
                moving_avg.push(row);
            }
        }

        latest_prices.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        moving_avg.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then(a.minute_bucket.cmp(&b.minute_bucket))
        });

        let leaderboard = rank_by_price(&latest_prices);
        let anomalies = std::mem::take(&mut self.pending_anomalies);

        Ok(ViewSnapshot {
            latest_prices,
            moving_avg,
            anomalies,
            leaderboard,
            computed_at: now,
            last_event_at: self.last_event_at,
            events_reflected: self.events_reflected,
        })
    }

    /// Put drained anomalies back after a failed store write, ahead of
    /// anything flagged in the meantime, so append order is preserved.
    pub fn requeue_anomalies(&mut self, anomalies: Vec<AnomalyRow>) {
        if anomalies.is_empty() {
            return;
        }
        let mut restored = anomalies;
        restored.append(&mut self.pending_anomalies);
        self.pending_anomalies = restored;
    }
}

/// Dense-rank symbols by latest price, descending.
///
/// Symbols without a recorded price are excluded. Equal prices share a
/// rank and the next distinct price gets the immediately following rank
/// (prices `[100, 100, 90]` rank `[1, 1, 2]`). Ties break by symbol for
/// a deterministic row order.
fn rank_by_price(latest: &[LatestPriceRow]) -> Vec<LeaderboardRow> {
    let mut priced: Vec<(&str, f64)> = latest
        .iter()
        .filter_map(|row| {
            row.price
                .filter(|p| p.is_finite())
                .map(|p| (row.symbol.as_str(), p))
        })
        .collect();

    priced.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let mut rows = Vec::with_capacity(priced.len());
    let mut rank = 0u32;
    let mut prev_price: Option<f64> = None;
    for (symbol, price) in priced {
        if prev_price.map_or(true, |p| price < p) {
            rank += 1;
            prev_price = Some(price);
        }
        rows.push(LeaderboardRow {
            symbol: symbol.to_string(),
            price,
            price_rank: rank,
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(symbol: &str, price: Option<f64>, ts: i64) -> PriceEvent {
        PriceEvent {
            symbol: symbol.to_string(),
            price,
            currency: Some("USD".to_string()),
            observed_at: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    fn engine_at(now: i64) -> AggregationEngine {
        AggregationEngine::new_with_timestamp_fn(60, Box::new(move || now))
    }

    #[test]
    fn test_latest_price_tracks_max_observed_at() {
        let mut engine = engine_at(1_000);
        engine.process_event(event("SNOW", Some(100.0), 100));
        engine.process_event(event("SNOW", Some(110.0), 200));
        // Late event must not regress the view
        engine.process_event(event("SNOW", Some(90.0), 150));

        let snapshot = engine.build_snapshot().unwrap();
        assert_eq!(snapshot.latest_prices.len(), 1);
        assert_eq!(snapshot.latest_prices[0].price, Some(110.0));
        assert_eq!(snapshot.latest_prices[0].observed_at, 200);
    }

    #[test]
    fn test_leaderboard_dense_ranking() {
        let mut engine = engine_at(1_000);
        engine.process_event(event("AAA", Some(100.0), 100));
        engine.process_event(event("BBB", Some(100.0), 100));
        engine.process_event(event("CCC", Some(90.0), 100));

        let snapshot = engine.build_snapshot().unwrap();
        let ranks: Vec<u32> = snapshot
            .leaderboard
            .iter()
            .map(|row| row.price_rank)
            .collect();

        // Dense: [100, 100, 90] ranks [1, 1, 2], never [1, 1, 3]
        assert_eq!(ranks, vec![1, 1, 2]);
        assert_eq!(snapshot.leaderboard[2].symbol, "CCC");
    }

    #[test]
    fn test_leaderboard_excludes_unpriced_symbols() {
        let mut engine = engine_at(1_000);
        engine.process_event(event("SNOW", Some(100.0), 100));
        engine.process_event(event("MSFT", None, 100));

        let snapshot = engine.build_snapshot().unwrap();
        assert_eq!(snapshot.leaderboard.len(), 1);
        assert_eq!(snapshot.leaderboard[0].symbol, "SNOW");
        // Unpriced symbol still appears in latest_prices
        assert_eq!(snapshot.latest_prices.len(), 2);
    }

    #[test]
    fn test_anomalies_drained_once() {
        let mut engine = engine_at(1_000);
        engine.process_event(event("SNOW", Some(100.0), 100));
        engine.process_event(event("SNOW", Some(120.0), 130));

        let first = engine.build_snapshot().unwrap();
        assert_eq!(first.anomalies.len(), 1);

        let second = engine.build_snapshot().unwrap();
        assert!(second.anomalies.is_empty());
    }

    #[test]
    fn test_requeue_preserves_append_order() {
        let mut engine = engine_at(1_000);
        engine.process_event(event("SNOW", Some(100.0), 100));
        engine.process_event(event("SNOW", Some(120.0), 130));

        let snapshot = engine.build_snapshot().unwrap();
        let drained = snapshot.anomalies.clone();
        assert_eq!(drained.len(), 1);

        // New anomaly lands while the write was failing
        engine.process_event(event("SNOW", Some(145.0), 160));
        engine.requeue_anomalies(drained);

        let retry = engine.build_snapshot().unwrap();
        assert_eq!(retry.anomalies.len(), 2);
        assert_eq!(retry.anomalies[0].observed_at, 130);
        assert_eq!(retry.anomalies[1].observed_at, 160);
    }

    #[test]
    fn test_duplicate_does_not_advance_counters() {
        let mut engine = engine_at(400);
        engine.process_event(event("SNOW", Some(100.0), 100));
        engine.process_event(event("SNOW", Some(100.0), 100));

        let snapshot = engine.build_snapshot().unwrap();
        assert_eq!(snapshot.events_reflected, 1);

        let bucket_row = &snapshot.moving_avg[0];
        assert!((bucket_row.avg_price_5min - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_freshness_metadata() {
        let mut engine = engine_at(500);
        engine.process_event(event("SNOW", Some(100.0), 100));

        let snapshot = engine.build_snapshot().unwrap();
        assert_eq!(snapshot.computed_at, 500);
        assert_eq!(snapshot.last_event_at, Some(100));
        assert_eq!(snapshot.events_reflected, 1);
    }

    #[test]
    fn test_settled_buckets_leave_snapshot() {
        // Event at t=0, clock far past the settle horizon
        let mut engine = engine_at(2_000);
        engine.process_event(event("SNOW", Some(100.0), 0));

        let snapshot = engine.build_snapshot().unwrap();
        assert!(snapshot.moving_avg.is_empty());
        // Latest price survives pruning
        assert_eq!(snapshot.latest_prices.len(), 1);
    }

    #[test]
    fn test_active_symbols() {
        let mut engine = engine_at(1_000);
        assert!(engine.is_empty());

        engine.process_event(event("SNOW", Some(100.0), 100));
        engine.process_event(event("AMZN", Some(200.0), 100));

        let mut active = engine.active_symbols();
        active.sort();
        assert_eq!(active, vec!["AMZN".to_string(), "SNOW".to_string()]);
    }
}
