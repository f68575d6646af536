//! Continuous aggregation engine
//!
//! Consumes PriceEvents from the event log and maintains the derived
//! views (latest prices, 5-minute moving averages, price anomalies,
//! leaderboard) in the SQLite view store.

pub mod config;
pub mod consumer;
pub mod db;
pub mod engine;
pub mod ingestion;
pub mod state;
pub mod types;
