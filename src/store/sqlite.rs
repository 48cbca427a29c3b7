use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use super::TickSink;
use crate::model::tick::{normalize_symbol, Side, Tick};

/// SQLite-backed tick sink. One connection, serialized behind a mutex; the
/// store only calls it from the flush path.
pub struct SqliteTickSink {
    conn: Mutex<Connection>,
}

impl SqliteTickSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open tick database {}", path.display()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ticks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                price REAL NOT NULL,
                size REAL NOT NULL,
                side TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ticks_symbol_time ON ticks(symbol, timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_ticks_time ON ticks(timestamp_ms);
            "#,
        )
        .context("failed to initialize tick schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Most recent `limit` ticks for `symbol`, oldest first.
    pub fn load_recent(&self, symbol: &str, limit: usize) -> Result<Vec<Tick>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT symbol, timestamp_ms, price, size, side
            FROM ticks
            WHERE symbol = ?1
            ORDER BY timestamp_ms DESC, id DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![normalize_symbol(symbol), limit as i64], row_to_tick)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        out.reverse();
        Ok(out)
    }

    pub fn symbols(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT symbol FROM ticks ORDER BY symbol")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Rows stored for `symbol`, regardless of how many are restored.
    pub fn count(&self, symbol: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ticks WHERE symbol = ?1",
            params![normalize_symbol(symbol)],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }
}

impl TickSink for SqliteTickSink {
    fn persist(&self, ticks: &[Tick]) -> Result<()> {
        if ticks.is_empty() {
            return Ok(());
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO ticks (symbol, timestamp_ms, price, size, side, created_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for t in ticks {
                stmt.execute(params![
                    t.symbol,
                    clamp_i64(t.timestamp_ms),
                    t.price,
                    t.size,
                    t.side.as_str(),
                    now_ms,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn clamp_i64(v: u64) -> i64 {
    v.min(i64::MAX as u64) as i64
}

fn row_to_tick(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tick> {
    let timestamp_ms: i64 = row.get(1)?;
    let side: String = row.get(4)?;
    Ok(Tick {
        symbol: row.get(0)?,
        timestamp_ms: timestamp_ms.max(0) as u64,
        price: row.get(2)?,
        size: row.get(3)?,
        side: Side::parse(&side),
    })
}
