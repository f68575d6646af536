//! SQLite view store
//!
//! Durable home of the four derived views plus a per-view health table.
//! The engine is the only writer; the presentation layer (and the read
//! helpers below) only ever reads. WAL mode keeps readers unblocked
//! while a snapshot commits.
//!
//! Tables:
//! - `latest_prices`  - UPSERT on symbol
//! - `moving_avg`     - UPSERT on (symbol, minute_bucket)
//! - `anomalies`      - INSERT (append-only, never revised)
//! - `leaderboard`    - rewritten in full every refresh
//! - `view_health`    - UPSERT on view name (staleness contract)
//!
//! One snapshot = one transaction, so readers see either the previous
//! refresh or the new one, never a mix.

use super::engine::ViewSnapshot;
use super::types::{AnomalyRow, LatestPriceRow, LeaderboardRow, MovingAvgRow};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Idempotent schema, applied on open.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS latest_prices (
    symbol          TEXT PRIMARY KEY,
    price           REAL,
    observed_at     INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS moving_avg (
    symbol          TEXT NOT NULL,
    minute_bucket   INTEGER NOT NULL,
    avg_price_5min  REAL NOT NULL,
    PRIMARY KEY (symbol, minute_bucket)
);

CREATE TABLE IF NOT EXISTS anomalies (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol          TEXT NOT NULL,
    price           REAL NOT NULL,
    observed_at     INTEGER NOT NULL,
    moving_avg      REAL NOT NULL,
    created_at      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS leaderboard (
    symbol          TEXT PRIMARY KEY,
    price           REAL NOT NULL,
    price_rank      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS view_health (
    view_name         TEXT PRIMARY KEY,
    refreshed_at      INTEGER NOT NULL,
    last_event_at     INTEGER,
    events_reflected  INTEGER NOT NULL
);
"#;

const VIEW_NAMES: [&str; 4] = ["latest_prices", "moving_avg", "anomalies", "leaderboard"];

/// Freshness metadata for one view, as exposed to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewHealthRow {
    pub view_name: String,
    pub refreshed_at: i64,
    pub last_event_at: Option<i64>,
    pub events_reflected: i64,
}

/// Writer seam between the engine and whatever stores the views.
#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Persist one snapshot atomically.
    async fn write_snapshot(&self, snapshot: &ViewSnapshot) -> Result<(), BoxError>;
}

/// SQLite implementation of [`ViewStore`].
pub struct SqliteViewStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteViewStore {
    /// Open (or create) the database, enable WAL, apply the schema.
    pub fn open(db_path: &str) -> Result<Self, BoxError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        log::info!("📊 view store ready: {} (WAL)", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Latest price per symbol, ordered by symbol.
    pub fn latest_prices(&self) -> Result<Vec<LatestPriceRow>, BoxError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT symbol, price, observed_at FROM latest_prices ORDER BY symbol")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LatestPriceRow {
                    symbol: row.get(0)?,
                    price: row.get(1)?,
                    observed_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Moving-average rows, optionally filtered to one symbol,
    /// ordered by (symbol, minute_bucket).
    pub fn moving_avg(&self, symbol: Option<&str>) -> Result<Vec<MovingAvgRow>, BoxError> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();
        match symbol {
            Some(sym) => {
                let mut stmt = conn.prepare(
                    "SELECT symbol, minute_bucket, avg_price_5min FROM moving_avg
                     WHERE symbol = ?1 ORDER BY minute_bucket",
                )?;
                let rows = stmt.query_map([sym], |row| {
                    Ok(MovingAvgRow {
                        symbol: row.get(0)?,
                        minute_bucket: row.get(1)?,
                        avg_price_5min: row.get(2)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT symbol, minute_bucket, avg_price_5min FROM moving_avg
                     ORDER BY symbol, minute_bucket",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(MovingAvgRow {
                        symbol: row.get(0)?,
                        minute_bucket: row.get(1)?,
                        avg_price_5min: row.get(2)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Flagged anomalies, newest first.
    pub fn anomalies(&self) -> Result<Vec<AnomalyRow>, BoxError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT symbol, price, observed_at, moving_avg FROM anomalies ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AnomalyRow {
                    symbol: row.get(0)?,
                    price: row.get(1)?,
                    observed_at: row.get(2)?,
                    moving_avg: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Current leaderboard, best rank first.
    pub fn leaderboard(&self) -> Result<Vec<LeaderboardRow>, BoxError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT symbol, price, price_rank FROM leaderboard ORDER BY price_rank, symbol",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LeaderboardRow {
                    symbol: row.get(0)?,
                    price: row.get(1)?,
                    price_rank: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Per-view freshness metadata. This is how readers detect staleness
    /// instead of getting errors or empty results during an outage.
    pub fn view_health(&self) -> Result<Vec<ViewHealthRow>, BoxError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT view_name, refreshed_at, last_event_at, events_reflected
             FROM view_health ORDER BY view_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ViewHealthRow {
                    view_name: row.get(0)?,
                    refreshed_at: row.get(1)?,
                    last_event_at: row.get(2)?,
                    events_reflected: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl ViewStore for SqliteViewStore {
    async fn write_snapshot(&self, snapshot: &ViewSnapshot) -> Result<(), BoxError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for row in &snapshot.latest_prices {
            tx.execute(
                "INSERT INTO latest_prices (symbol, price, observed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(symbol) DO UPDATE SET
                     price = excluded.price,
                     observed_at = excluded.observed_at",
                params![row.symbol, row.price, row.observed_at],
            )?;
        }

        for row in &snapshot.moving_avg {
            tx.execute(
                "INSERT INTO moving_avg (symbol, minute_bucket, avg_price_5min) VALUES (?1, ?2, ?3)
                 ON CONFLICT(symbol, minute_bucket) DO UPDATE SET
                     avg_price_5min = excluded.avg_price_5min",
                params![row.symbol, row.minute_bucket, row.avg_price_5min],
            )?;
        }

        for row in &snapshot.anomalies {
            tx.execute(
                "INSERT INTO anomalies (symbol, price, observed_at, moving_avg, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.symbol,
                    row.price,
                    row.observed_at,
                    row.moving_avg,
                    snapshot.computed_at
                ],
            )?;
        }

        // Leaderboard is a full point-in-time ranking, not an increment
        tx.execute("DELETE FROM leaderboard", [])?;
        for row in &snapshot.leaderboard {
            tx.execute(
                "INSERT INTO leaderboard (symbol, price, price_rank) VALUES (?1, ?2, ?3)",
                params![row.symbol, row.price, row.price_rank],
            )?;
        }

        for view_name in VIEW_NAMES {
            tx.execute(
                "INSERT INTO view_health (view_name, refreshed_at, last_event_at, events_reflected)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(view_name) DO UPDATE SET
                     refreshed_at = excluded.refreshed_at,
                     last_event_at = excluded.last_event_at,
                     events_reflected = excluded.events_reflected",
                params![
                    view_name,
                    snapshot.computed_at,
                    snapshot.last_event_at,
                    snapshot.events_reflected as i64
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
