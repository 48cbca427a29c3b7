pub mod sqlite;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};

use crate::error::InvalidTick;
use crate::model::tick::{normalize_symbol, Tick};

/// Durable destination for ticks. Retention never evicts a tick before the
/// sink has accepted it.
pub trait TickSink: Send + Sync {
    fn persist(&self, ticks: &[Tick]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_ticks_per_symbol: Option<usize>,
    pub max_age_ms: Option<u64>,
}

impl RetentionPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
struct SymbolSeries {
    ticks: VecDeque<Tick>,
    /// Count of trailing ticks not yet accepted by the sink.
    unpersisted: usize,
}

impl SymbolSeries {
    fn last_timestamp(&self) -> Option<u64> {
        self.ticks.back().map(|t| t.timestamp_ms)
    }

    fn push(&mut self, tick: Tick, track_persistence: bool) -> Result<(), InvalidTick> {
        if let Some(last) = self.last_timestamp() {
            if tick.timestamp_ms < last {
                return Err(InvalidTick::OutOfOrder {
                    last,
                    got: tick.timestamp_ms,
                });
            }
        }
        self.ticks.push_back(tick);
        if track_persistence {
            self.unpersisted += 1;
        }
        Ok(())
    }

    fn evictable(&self) -> usize {
        self.ticks.len() - self.unpersisted
    }

    fn apply_retention(&mut self, policy: &RetentionPolicy) -> usize {
        let mut evicted = 0;
        if let Some(max) = policy.max_ticks_per_symbol {
            while self.ticks.len() > max && self.evictable() > 0 {
                self.ticks.pop_front();
                evicted += 1;
            }
        }
        if let (Some(max_age), Some(newest)) = (policy.max_age_ms, self.last_timestamp()) {
            let cutoff = newest.saturating_sub(max_age);
            while self.evictable() > 0
                && self
                    .ticks
                    .front()
                    .is_some_and(|t| t.timestamp_ms < cutoff)
            {
                self.ticks.pop_front();
                evicted += 1;
            }
        }
        evicted
    }

    fn range(&self, from_ms: u64, to_ms: u64) -> Vec<Tick> {
        let lo = self.ticks.partition_point(|t| t.timestamp_ms < from_ms);
        let hi = self.ticks.partition_point(|t| t.timestamp_ms <= to_ms);
        if lo >= hi {
            return Vec::new();
        }
        self.ticks.range(lo..hi).cloned().collect()
    }

    fn latest(&self, n: usize) -> Vec<Tick> {
        let start = self.ticks.len().saturating_sub(n);
        self.ticks.range(start..).cloned().collect()
    }

    fn pending(&self) -> Vec<Tick> {
        let start = self.ticks.len() - self.unpersisted;
        self.ticks.range(start..).cloned().collect()
    }
}

type SharedSeries = Arc<RwLock<SymbolSeries>>;

pub struct TickStore {
    series: RwLock<HashMap<String, SharedSeries>>,
    retention: RetentionPolicy,
    sink: Option<Arc<dyn TickSink>>,
    flush_lock: Mutex<()>,
}

impl Default for TickStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::unbounded())
    }
}

impl TickStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            retention,
            sink: None,
            flush_lock: Mutex::new(()),
        }
    }

    /// Attach a durable sink. From then on appended ticks stay resident until
    /// `flush` has written them.
    pub fn with_sink(mut self, sink: Arc<dyn TickSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn append(&self, tick: Tick) -> Result<(), InvalidTick> {
        tick.validate()?;
        let series = self.series_for_write(&tick.symbol);
        let mut guard = series.write();
        guard.push(tick, self.sink.is_some())?;
        guard.apply_retention(&self.retention);
        Ok(())
    }

    /// Ticks with `from_ms <= timestamp <= to_ms`, in timestamp order. Unknown
    /// symbols and inverted bounds yield an empty vector.
    pub fn range(&self, symbol: &str, from_ms: u64, to_ms: u64) -> Vec<Tick> {
        if from_ms > to_ms {
            return Vec::new();
        }
        self.series(symbol)
            .map(|s| s.read().range(from_ms, to_ms))
            .unwrap_or_default()
    }

    pub fn latest(&self, symbol: &str, n: usize) -> Vec<Tick> {
        if n == 0 {
            return Vec::new();
        }
        self.series(symbol)
            .map(|s| s.read().latest(n))
            .unwrap_or_default()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.series.read().keys().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.series(symbol).map(|s| s.read().ticks.len()).unwrap_or(0)
    }

    pub fn last_timestamp(&self, symbol: &str) -> Option<u64> {
        self.series(symbol).and_then(|s| s.read().last_timestamp())
    }

    pub fn unpersisted(&self, symbol: &str) -> usize {
        self.series(symbol).map(|s| s.read().unpersisted).unwrap_or(0)
    }

    /// Write every not-yet-persisted tick to the sink, then apply retention.
    /// Sink I/O happens outside the series locks. A symbol whose write fails
    /// keeps its ticks pending; the others are still flushed and the first
    /// failure is returned afterwards. Returns the number of ticks written;
    /// `Ok(0)` when no sink is attached.
    pub fn flush(&self) -> Result<usize> {
        let Some(sink) = self.sink.as_ref() else {
            return Ok(0);
        };
        let _flushing = self.flush_lock.lock();

        let handles: Vec<(String, SharedSeries)> = self
            .series
            .read()
            .iter()
            .map(|(symbol, series)| (symbol.clone(), series.clone()))
            .collect();

        let mut written = 0;
        let mut first_error: Option<anyhow::Error> = None;
        for (symbol, series) in handles {
            let pending = series.read().pending();
            if pending.is_empty() {
                continue;
            }
            if let Err(e) = sink.persist(&pending) {
                let e = e.context(format!(
                    "failed to persist {} ticks for {}",
                    pending.len(),
                    symbol
                ));
                if first_error.is_some() {
                    tracing::warn!(symbol = %symbol, error = %format!("{:#}", e), "Tick flush failed");
                } else {
                    first_error = Some(e);
                }
                continue;
            }

            // Appends only grow the unpersisted tail and eviction never
            // touches it, so the flushed prefix is still exactly `pending`.
            let mut guard = series.write();
            guard.unpersisted -= pending.len();
            guard.apply_retention(&self.retention);
            written += pending.len();
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Load ticks that already live in durable storage. They are not
    /// re-persisted. Invalid or out-of-order rows are skipped.
    pub fn restore(&self, ticks: Vec<Tick>) -> usize {
        let mut restored = 0;
        for tick in ticks {
            if tick.validate().is_err() {
                continue;
            }
            let series = self.series_for_write(&tick.symbol);
            let mut guard = series.write();
            if guard.push(tick, false).is_ok() {
                guard.apply_retention(&self.retention);
                restored += 1;
            }
        }
        restored
    }

    fn series(&self, symbol: &str) -> Option<SharedSeries> {
        self.series.read().get(&normalize_symbol(symbol)).cloned()
    }

    fn series_for_write(&self, symbol: &str) -> SharedSeries {
        if let Some(series) = self.series.read().get(symbol) {
            return series.clone();
        }
        self.series
            .write()
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }
}
