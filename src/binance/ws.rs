use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;

use super::types::parse_trade_message;
use crate::error::MalformedFeedMessage;
use crate::feed::{FeedHandle, FeedSource, RawFeedMessage};
use crate::model::tick::Tick;

/// Exponential backoff for reconnection.
struct ExponentialBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
    factor: f64,
}

impl ExponentialBackoff {
    fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            current: initial,
            initial,
            max,
            factor,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64()),
        );
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// One `<symbol>@trade` stream per active symbol.
#[derive(Clone)]
pub struct BinanceTradeFeed {
    ws_base_url: String,
    channel_capacity: usize,
}

impl BinanceTradeFeed {
    pub fn new(ws_base_url: &str, channel_capacity: usize) -> Result<Self> {
        let base = ws_base_url.trim_end_matches('/');
        let parsed = url::Url::parse(base)
            .with_context(|| format!("invalid feed.ws_base_url '{}'", ws_base_url))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            bail!(
                "invalid feed.ws_base_url '{}': scheme must be ws or wss",
                ws_base_url
            );
        }
        Ok(Self {
            ws_base_url: base.to_string(),
            channel_capacity,
        })
    }

    pub fn stream_url(&self, symbol: &str) -> String {
        format!("{}/{}@trade", self.ws_base_url, symbol)
    }
}

impl FeedSource for BinanceTradeFeed {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn open(
        &self,
        mut symbols: watch::Receiver<BTreeSet<String>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> FeedHandle {
        let (tx, rx) = mpsc::channel(self.channel_capacity.max(1));
        let feed = self.clone();

        let task = tokio::spawn(async move {
            let mut workers: HashMap<String, (watch::Sender<bool>, JoinHandle<()>)> =
                HashMap::new();
            loop {
                let target: BTreeSet<String> = symbols.borrow().clone();

                let existing: Vec<String> = workers.keys().cloned().collect();
                for symbol in existing {
                    if !target.contains(&symbol) {
                        if let Some((stop_tx, _handle)) = workers.remove(&symbol) {
                            let _ = stop_tx.send(true);
                        }
                        tracing::info!(symbol = %symbol, "Trade stream unsubscribed");
                    }
                }

                for symbol in target {
                    if workers.contains_key(&symbol) {
                        continue;
                    }
                    let (stop_tx, stop_rx) = watch::channel(false);
                    let worker = TradeStreamWorker {
                        symbol: symbol.clone(),
                        url: feed.stream_url(&symbol),
                    };
                    let worker_tx = tx.clone();
                    let handle = tokio::spawn(async move {
                        let worker_symbol = worker.symbol.clone();
                        if let Err(e) = worker.connect_and_run(worker_tx, stop_rx).await {
                            tracing::warn!(symbol = %worker_symbol, error = %e, "Trade stream worker failed");
                        }
                    });
                    workers.insert(symbol.clone(), (stop_tx, handle));
                    tracing::info!(symbol = %symbol, "Trade stream subscribed");
                }

                tokio::select! {
                    changed = symbols.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            let mut handles = Vec::with_capacity(workers.len());
            for (_, (stop_tx, handle)) in workers {
                let _ = stop_tx.send(true);
                handles.push(handle);
            }
            for handle in handles {
                let _ = handle.await;
            }
            tracing::info!("Binance trade feed stopped");
        });

        FeedHandle { messages: rx, task }
    }

    fn normalize(&self, raw: &RawFeedMessage) -> Result<Tick, MalformedFeedMessage> {
        parse_trade_message(&raw.payload)
    }
}

struct TradeStreamWorker {
    symbol: String,
    url: String,
}

impl TradeStreamWorker {
    /// Connect and run the WebSocket loop with automatic reconnection.
    async fn connect_and_run(
        &self,
        tx: mpsc::Sender<RawFeedMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
        );
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.connect_once(&tx, &mut backoff, &mut shutdown).await {
                Ok(()) => {
                    // Clean shutdown requested, or nobody is listening anymore
                    tracing::info!(symbol = %self.symbol, "Trade stream disconnected");
                    break;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        symbol = %self.symbol,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Trade stream error, reconnecting"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = shutdown.changed() => {
                            tracing::info!(symbol = %self.symbol, "Shutdown during reconnect");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn connect_once(
        &self,
        tx: &mpsc::Sender<RawFeedMessage>,
        backoff: &mut ExponentialBackoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::debug!(symbol = %self.symbol, url = %self.url, "Connecting");

        let (ws_stream, _resp) = tokio::select! {
            res = tokio_tungstenite::connect_async(&self.url) => {
                res.context("WebSocket connect failed")?
            }
            _ = shutdown.changed() => return Ok(()),
        };
        backoff.reset();
        tracing::info!(symbol = %self.symbol, "Trade stream connected");

        let (_write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            match tx.try_send(RawFeedMessage::new(text)) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    tracing::warn!(symbol = %self.symbol, "Feed channel full, dropping message");
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => return Ok(()),
                            }
                        }
                        Some(Ok(tungstenite::Message::Ping(_))) => {
                            // tokio-tungstenite handles pong automatically
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(anyhow::anyhow!("WebSocket read error: {}", e));
                        }
                        None => {
                            return Err(anyhow::anyhow!("WebSocket stream ended"));
                        }
                    }
                }
                _ = shutdown.changed() => {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap_and_resets() {
        let mut b = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), 2.0);
        let delays: Vec<u64> = (0..8).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn stream_url_per_symbol() {
        let feed = BinanceTradeFeed::new("wss://stream.binance.com:9443/ws/", 16).unwrap();
        assert_eq!(
            feed.stream_url("btcusdt"),
            "wss://stream.binance.com:9443/ws/btcusdt@trade"
        );
    }

    #[test]
    fn rejects_non_websocket_base_url() {
        assert!(BinanceTradeFeed::new("https://api.binance.com", 16).is_err());
        assert!(BinanceTradeFeed::new("not a url", 16).is_err());
    }
}
