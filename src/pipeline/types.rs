//! Core event and derived-view row types
//!
//! `PriceEvent` is the wire format on the event log (JSON, key = symbol).
//! The row structs mirror the view store tables one to one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Width of one aggregation bucket in seconds.
pub const BUCKET_SECS: i64 = 60;

/// Number of minute buckets in the trailing moving-average window
/// (the current bucket plus four preceding ones).
pub const MOVING_AVG_BUCKETS: i64 = 5;

/// Number of raw priced events in the anomaly trailing mean,
/// including the event under evaluation.
pub const ANOMALY_SAMPLE_WINDOW: usize = 5;

/// Relative deviation from the trailing mean above which a quote is
/// flagged as an anomaly. Strict inequality: a quote exactly at the
/// threshold is not flagged.
pub const ANOMALY_THRESHOLD: f64 = 0.05;

/// One observed quote, immutable once published.
///
/// `price` is None when the source had no quote at poll time; the
/// observation is still published so the latest-price view can reflect
/// it. `observed_at` is monotonically non-decreasing per symbol under
/// normal operation (not globally ordered across symbols).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceEvent {
    pub symbol: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl PriceEvent {
    /// Minute bucket this event falls into (epoch seconds, truncated).
    pub fn minute_bucket(&self) -> i64 {
        bucket_of(self.observed_at.timestamp())
    }
}

/// Truncate an epoch-seconds timestamp to the start of its minute bucket.
pub fn bucket_of(ts: i64) -> i64 {
    ts.div_euclid(BUCKET_SECS) * BUCKET_SECS
}

/// Row in `latest_prices`: the price of the newest event per symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestPriceRow {
    pub symbol: String,
    pub price: Option<f64>,
    pub observed_at: i64,
}

/// Row in `moving_avg`: trailing 5-bucket average for one (symbol, bucket).
#[derive(Debug, Clone, PartialEq)]
pub struct MovingAvgRow {
    pub symbol: String,
    pub minute_bucket: i64,
    pub avg_price_5min: f64,
}

/// Row in `anomalies`: one flagged raw event, never revised.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyRow {
    pub symbol: String,
    pub price: f64,
    pub observed_at: i64,
    pub moving_avg: f64,
}

/// Row in `leaderboard`: dense rank by latest price, descending.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    pub symbol: String,
    pub price: f64,
    pub price_rank: u32,
}
