//! Per-symbol rolling state
//!
//! One `SymbolState` per tracked symbol, held in the engine's arena and
//! updated in place as events arrive. Memory per symbol is bounded by the
//! window sizes the views actually need: the last 5 raw prices for the
//! anomaly rule and a handful of minute buckets for the moving average.
//! Everything beyond that lives in the event log.

use super::types::{
    bucket_of, AnomalyRow, LatestPriceRow, MovingAvgRow, PriceEvent, ANOMALY_SAMPLE_WINDOW,
    ANOMALY_THRESHOLD, BUCKET_SECS, MOVING_AVG_BUCKETS,
};
use std::collections::{BTreeMap, VecDeque};

/// Running sum/count for one minute bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketStats {
    pub sum: f64,
    pub count: u32,
}

impl BucketStats {
    /// Mean price of the events in this bucket.
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// What applying one event did to the state.
#[derive(Debug)]
pub struct EventOutcome {
    /// True when this was the symbol's first observed event
    /// (the symbol just became active).
    pub first_event: bool,
    /// True when the latest-price view changed.
    pub latest_updated: bool,
    /// True when the event was dropped as a redelivery
    /// (same `observed_at` as the stored latest).
    pub duplicate: bool,
    /// Anomaly flagged by this event, if any.
    pub anomaly: Option<AnomalyRow>,
}

/// Rolling state container for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub symbol: String,

    /// Price of the newest event seen so far (None when that event
    /// carried no quote).
    pub latest_price: Option<f64>,

    /// `observed_at` of the newest event seen so far (epoch seconds).
    pub latest_observed_at: Option<i64>,

    /// Last priced events in arrival order, capped at the anomaly
    /// sample window.
    pub recent_prices: VecDeque<f64>,

    /// Minute bucket -> running sum/count of priced events.
    pub buckets: BTreeMap<i64, BucketStats>,
}

impl SymbolState {
    pub fn new(symbol: String) -> Self {
        Self {
            symbol,
            latest_price: None,
            latest_observed_at: None,
            recent_prices: VecDeque::with_capacity(ANOMALY_SAMPLE_WINDOW),
            buckets: BTreeMap::new(),
        }
    }

    /// Apply one incoming event to the rolling state.
    ///
    /// - An event with the same `observed_at` as the stored latest is a
    ///   redelivery and is dropped entirely.
    /// - A newer event replaces the latest (price, observed_at) pair.
    /// - An older (late) event leaves the latest pair untouched but a
    ///   priced one still lands in its minute bucket while that bucket
    ///   is held, so unsettled moving-average windows keep shifting.
    /// - Priced events enter the raw trailing window and are checked
    ///   against the anomaly rule immediately, mean including the
    ///   current price. A zero mean suppresses the undefined ratio.
    pub fn apply_event(&mut self, event: &PriceEvent) -> EventOutcome {
        let ts = event.observed_at.timestamp();

        if self.latest_observed_at == Some(ts) {
            return EventOutcome {
                first_event: false,
                latest_updated: false,
                duplicate: true,
                anomaly: None,
            };
        }

        let first_event = self.latest_observed_at.is_none();

        let mut latest_updated = false;
        if self.latest_observed_at.map_or(true, |cur| ts > cur) {
            self.latest_price = event.price;
            self.latest_observed_at = Some(ts);
            latest_updated = true;
        }

        let mut anomaly = None;
        if let Some(price) = event.price {
            if self.recent_prices.len() == ANOMALY_SAMPLE_WINDOW {
                self.recent_prices.pop_front();
            }
            self.recent_prices.push_back(price);

            let moving_avg =
                self.recent_prices.iter().sum::<f64>() / self.recent_prices.len() as f64;
            if moving_avg != 0.0 && (price - moving_avg).abs() / moving_avg > ANOMALY_THRESHOLD {
                anomaly = Some(AnomalyRow {
                    symbol: self.symbol.clone(),
                    price,
                    observed_at: ts,
                    moving_avg,
                });
            }

            let stats = self.buckets.entry(bucket_of(ts)).or_default();
            stats.sum += price;
            stats.count += 1;
        }

        EventOutcome {
            first_event,
            latest_updated,
            duplicate: false,
            anomaly,
        }
    }

    /// Latest-price row for this symbol, if any event has been seen.
    pub fn latest_row(&self) -> Option<LatestPriceRow> {
        self.latest_observed_at.map(|ts| LatestPriceRow {
            symbol: self.symbol.clone(),
            price: self.latest_price,
            observed_at: ts,
        })
    }

    /// Moving-average rows for every bucket still held in state.
    ///
    /// For bucket `b` the value is the mean of the per-bucket means over
    /// the non-empty buckets among `[b-4, b]` — weighted by bucket, not
    /// by raw sample count. Buckets with no events contribute nothing.
    pub fn moving_avg_rows(&self) -> Vec<MovingAvgRow> {
        self.buckets
            .keys()
            .map(|&bucket| MovingAvgRow {
                symbol: self.symbol.clone(),
                minute_bucket: bucket,
                avg_price_5min: self.window_average(bucket),
            })
            .collect()
    }

    fn window_average(&self, bucket: i64) -> f64 {
        let lo = bucket - (MOVING_AVG_BUCKETS - 1) * BUCKET_SECS;
        let mut sum = 0.0;
        let mut populated = 0u32;
        for stats in self.buckets.range(lo..=bucket).map(|(_, s)| s) {
            sum += stats.mean();
            populated += 1;
        }
        // `bucket` itself is always populated: buckets only exist once a
        // priced event landed in them.
        sum / populated as f64
    }

    /// Drop buckets that can no longer influence an unsettled window.
    ///
    /// Bucket `b` contributes to the windows of buckets `[b, b+4]`; the
    /// youngest of those closes at `b + 5 * BUCKET_SECS` and settles one
    /// target lag later. Anything older is immutable in the view store
    /// and safe to forget.
    pub fn prune_settled(&mut self, now: i64, target_lag_secs: i64) {
        let horizon = now - MOVING_AVG_BUCKETS * BUCKET_SECS - target_lag_secs;
        self.buckets.retain(|&bucket, _| bucket > horizon);
    }
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

    #[test]
    fn test_first_event_activates_symbol() {
        let mut state = SymbolState::new("SNOW".to_string());

        let outcome = state.apply_event(&event("SNOW", Some(171.0), 1_000));

        assert!(outcome.first_event);
        assert!(outcome.latest_updated);
        assert!(!outcome.duplicate);
        assert_eq!(state.latest_price, Some(171.0));
        assert_eq!(state.latest_observed_at, Some(1_000));
    }

    #[test]
    fn test_duplicate_timestamp_is_noop() {
        // Replaying an already-applied event must not double-count it
        let mut state = SymbolState::new("SNOW".to_string());
        state.apply_event(&event("SNOW", Some(100.0), 1_000));

        let bucket = bucket_of(1_000);
        let count_before = state.buckets[&bucket].count;

        let outcome = state.apply_event(&event("SNOW", Some(100.0), 1_000));

        assert!(outcome.duplicate);
        assert!(!outcome.latest_updated);
        assert_eq!(state.latest_price, Some(100.0));
        assert_eq!(state.buckets[&bucket].count, count_before);
        assert_eq!(state.recent_prices.len(), 1);
    }

    #[test]
    fn test_late_event_ignored_for_latest_but_lands_in_bucket() {
        let mut state = SymbolState::new("AMZN".to_string());
        state.apply_event(&event("AMZN", Some(200.0), 600));

        // Out-of-order event from an earlier minute
        let outcome = state.apply_event(&event("AMZN", Some(150.0), 30));

        assert!(!outcome.latest_updated);
        assert_eq!(state.latest_price, Some(200.0));
        assert_eq!(state.latest_observed_at, Some(600));
        assert_eq!(state.buckets[&0].count, 1);
        assert_eq!(state.buckets[&600].count, 1);
    }

    #[test]
    fn test_unpriced_event_only_moves_latest() {
        let mut state = SymbolState::new("GOOGL".to_string());
        state.apply_event(&event("GOOGL", Some(130.0), 1_000));

        let outcome = state.apply_event(&event("GOOGL", None, 1_030));

        assert!(outcome.latest_updated);
        assert!(outcome.anomaly.is_none());
        assert_eq!(state.latest_price, None);
        assert_eq!(state.latest_observed_at, Some(1_030));
        // No sample contribution from a null price
        assert_eq!(state.recent_prices.len(), 1);
        assert_eq!(state.buckets[&bucket_of(1_000)].count, 1);
    }

    #[test]
    fn test_raw_window_capped_at_five_samples() {
        let mut state = SymbolState::new("MSFT".to_string());
        for i in 0..7 {
            state.apply_event(&event("MSFT", Some(100.0 + i as f64), 1_000 + i * 30));
        }

        assert_eq!(state.recent_prices.len(), ANOMALY_SAMPLE_WINDOW);
        // Oldest two samples (100, 101) evicted
        assert_eq!(*state.recent_prices.front().unwrap(), 102.0);
        assert_eq!(*state.recent_prices.back().unwrap(), 106.0);
    }

    #[test]
    fn test_anomaly_flagged_above_threshold() {
        let mut state = SymbolState::new("SNOW".to_string());
        state.apply_event(&event("SNOW", Some(95.0), 0));

        // mean = (95 + 105.1) / 2 = 100.05, deviation ~ 5.05%
        let outcome = state.apply_event(&event("SNOW", Some(105.1), 30));

        let anomaly = outcome.anomaly.expect("deviation above 5% must flag");
        assert_eq!(anomaly.price, 105.1);
        assert!((anomaly.moving_avg - 100.05).abs() < 1e-9);
    }

    #[test]
    fn test_anomaly_boundary_not_flagged() {
        // Exactly 5% deviation: mean = (95 + 105) / 2 = 100, |105 - 100| / 100 = 0.05
        let mut state = SymbolState::new("SNOW".to_string());
        state.apply_event(&event("SNOW", Some(95.0), 0));

        let outcome = state.apply_event(&event("SNOW", Some(105.0), 30));

        assert!(outcome.anomaly.is_none());
    }

    #[test]
    fn test_anomaly_zero_mean_suppressed() {
        let mut state = SymbolState::new("SNOW".to_string());
        state.apply_event(&event("SNOW", Some(10.0), 0));

        // mean over [10, -10] is zero: ratio undefined, no anomaly
        let outcome = state.apply_event(&event("SNOW", Some(-10.0), 30));

        assert!(outcome.anomaly.is_none());
    }

    #[test]
    fn test_first_event_never_anomalous() {
        // Single sample: mean equals the price, deviation zero
        let mut state = SymbolState::new("AMZN".to_string());
        let outcome = state.apply_event(&event("AMZN", Some(5000.0), 0));
        assert!(outcome.anomaly.is_none());
    }

    #[test]
    fn test_window_average_weighted_by_bucket() {
        let mut state = SymbolState::new("SNOW".to_string());
        // Bucket 0: two events, mean 15
        state.apply_event(&event("SNOW", Some(10.0), 10));
        state.apply_event(&event("SNOW", Some(20.0), 50));
        // Bucket 60: one event, mean 30
        state.apply_event(&event("SNOW", Some(30.0), 70));

        let rows = state.moving_avg_rows();
        let row_60 = rows.iter().find(|r| r.minute_bucket == 60).unwrap();

        // Mean of bucket means (15 + 30) / 2, not mean of raw samples
        assert!((row_60.avg_price_5min - 22.5).abs() < 1e-9);

        let row_0 = rows.iter().find(|r| r.minute_bucket == 0).unwrap();
        assert!((row_0.avg_price_5min - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_average_single_bucket() {
        let mut state = SymbolState::new("SNOW".to_string());
        state.apply_event(&event("SNOW", Some(40.0), 0));
        state.apply_event(&event("SNOW", Some(60.0), 30));

        let rows = state.moving_avg_rows();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].avg_price_5min - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_average_skips_empty_buckets() {
        let mut state = SymbolState::new("SNOW".to_string());
        state.apply_event(&event("SNOW", Some(100.0), 0));
        // Ten minutes later: bucket 0 is outside the 5-bucket window
        state.apply_event(&event("SNOW", Some(200.0), 600));

        let rows = state.moving_avg_rows();
        let recent = rows.iter().find(|r| r.minute_bucket == 600).unwrap();
        assert!((recent.avg_price_5min - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_average_spans_adjacent_buckets() {
        let mut state = SymbolState::new("SNOW".to_string());
        // Buckets 0, 120, 240: all within the window of bucket 240
        state.apply_event(&event("SNOW", Some(10.0), 0));
        state.apply_event(&event("SNOW", Some(20.0), 120));
        state.apply_event(&event("SNOW", Some(30.0), 240));

        let rows = state.moving_avg_rows();
        let last = rows.iter().find(|r| r.minute_bucket == 240).unwrap();
        assert!((last.avg_price_5min - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_prune_drops_settled_buckets() {
        let mut state = SymbolState::new("SNOW".to_string());
        state.apply_event(&event("SNOW", Some(100.0), 0));
        state.apply_event(&event("SNOW", Some(110.0), 1_200));

        // At now = 1260s with a 60s lag, bucket 0 closed its last
        // dependent window (0..300s + lag) long ago
        state.prune_settled(1_260, 60);

        assert!(!state.buckets.contains_key(&0));
        assert!(state.buckets.contains_key(&1_200));
    }

    #[test]
    fn test_prune_keeps_unsettled_buckets() {
        let mut state = SymbolState::new("SNOW".to_string());
        state.apply_event(&event("SNOW", Some(100.0), 0));

        // Bucket 0 still feeds the window of bucket 240 until ~360s + lag
        state.prune_settled(350, 60);

        assert!(state.buckets.contains_key(&0));
    }
}
