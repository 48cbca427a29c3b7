use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};

use super::{now_ms, FeedHandle, FeedSource, RawFeedMessage};
use crate::binance::types::parse_trade_message;
use crate::error::MalformedFeedMessage;
use crate::model::tick::{Side, Tick};
use crate::store::TickStore;

/// Walk stays within this fraction of the base price.
const MAX_DEVIATION: f64 = 0.05;
const STEP: f64 = 0.001;
const HISTORY_TICKS: u64 = 100;

pub fn base_price(symbol: &str) -> f64 {
    match symbol {
        "btcusdt" => 60_000.0,
        "ethusdt" => 3_500.0,
        "adausdt" => 0.45,
        "solusdt" => 150.0,
        _ => 100.0,
    }
}

pub struct SyntheticFeed {
    period: Duration,
    channel_capacity: usize,
    seed: Option<u64>,
}

impl SyntheticFeed {
    pub fn new(period: Duration, channel_capacity: usize) -> Self {
        Self {
            period,
            channel_capacity,
            seed: None,
        }
    }

    /// Fixed RNG seed, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl FeedSource for SyntheticFeed {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(
        &self,
        symbols: watch::Receiver<BTreeSet<String>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> FeedHandle {
        let (tx, rx) = mpsc::channel(self.channel_capacity.max(1));
        let period = self.period.max(Duration::from_millis(1));
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let task = tokio::spawn(async move {
            let mut prices: HashMap<String, f64> = HashMap::new();
            let mut trade_id: u64 = 0;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(period_ms = period.as_millis() as u64, "Synthetic feed started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let active: Vec<String> = symbols.borrow().iter().cloned().collect();
                for symbol in active {
                    let base = base_price(&symbol);
                    let price = prices.entry(symbol.clone()).or_insert(base);
                    let step = rng.gen_range(-STEP..STEP);
                    *price = (*price * (1.0 + step))
                        .clamp(base * (1.0 - MAX_DEVIATION), base * (1.0 + MAX_DEVIATION));
                    trade_id += 1;
                    let ts = now_ms();
                    let payload = serde_json::json!({
                        "e": "trade",
                        "E": ts,
                        "s": symbol.to_ascii_uppercase(),
                        "t": trade_id,
                        "p": format!("{}", *price),
                        "q": format!("{:.4}", rng.gen_range(0.1..2.0)),
                        "T": ts,
                        "m": rng.gen_bool(0.5),
                    });
                    match tx.try_send(RawFeedMessage::new(payload.to_string())) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!(symbol = %symbol, "Feed channel full, dropping message");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            tracing::debug!("Feed receiver dropped, stopping synthetic feed");
                            return;
                        }
                    }
                }
            }
            tracing::info!("Synthetic feed stopped");
        });

        FeedHandle { messages: rx, task }
    }

    fn normalize(&self, raw: &RawFeedMessage) -> Result<Tick, MalformedFeedMessage> {
        parse_trade_message(&raw.payload)
    }
}

/// Write `HISTORY_TICKS` ticks per symbol, one minute apart and ending now,
/// directly into the store. Symbols that already hold data are skipped.
/// Returns the number of ticks written.
pub fn seed_history(store: &TickStore, symbols: &[String]) -> usize {
    let mut rng = StdRng::from_entropy();
    let now = now_ms();
    let mut written = 0;
    for symbol in symbols {
        if store.len(symbol) > 0 {
            continue;
        }
        let base = base_price(symbol);
        for i in 0..HISTORY_TICKS {
            let ts = now.saturating_sub((HISTORY_TICKS - i) * 60_000);
            let tick = Tick::new(
                symbol.clone(),
                base * (1.0 + rng.gen_range(-0.02..0.02)),
                rng.gen_range(0.1..5.0),
                ts,
                Side::Unknown,
            );
            match store.append(tick) {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Seed tick rejected");
                    break;
                }
            }
        }
    }
    tracing::info!(symbols = symbols.len(), ticks = written, "Seeded history");
    written
}
