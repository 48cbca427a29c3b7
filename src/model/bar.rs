use serde::{Deserialize, Serialize};

use super::tick::Tick;

/// OHLC aggregate of the ticks that fell into one interval bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub interval_start_ms: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub tick_count: usize,
}

/// Accumulates ticks into a single bar. The bucket is aligned to the interval
/// measured from the Unix epoch.
#[derive(Debug, Clone)]
pub struct BarBuilder {
    interval_start_ms: u64,
    interval_ms: u64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    tick_count: usize,
}

impl BarBuilder {
    /// Start a new bar from its first tick.
    pub fn new(tick: &Tick, interval_ms: u64) -> Self {
        assert!(interval_ms > 0, "interval_ms must be > 0");
        Self {
            interval_start_ms: bucket_start(tick.timestamp_ms, interval_ms),
            interval_ms,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.size,
            tick_count: 1,
        }
    }

    /// Reopen a finished bar so more ticks can be folded into it.
    pub fn from_bar(bar: &Bar, interval_ms: u64) -> Self {
        assert!(interval_ms > 0, "interval_ms must be > 0");
        Self {
            interval_start_ms: bar.interval_start_ms,
            interval_ms,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            tick_count: bar.tick_count,
        }
    }

    pub fn interval_start_ms(&self) -> u64 {
        self.interval_start_ms
    }

    pub fn update(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.volume += tick.size;
        self.tick_count += 1;
    }

    /// Check if a timestamp belongs to this bar's bucket.
    pub fn contains(&self, timestamp_ms: u64) -> bool {
        timestamp_ms >= self.interval_start_ms
            && timestamp_ms - self.interval_start_ms < self.interval_ms
    }

    pub fn finish(&self) -> Bar {
        Bar {
            interval_start_ms: self.interval_start_ms,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            tick_count: self.tick_count,
        }
    }
}

pub fn bucket_start(timestamp_ms: u64, interval_ms: u64) -> u64 {
    timestamp_ms - (timestamp_ms % interval_ms)
}
