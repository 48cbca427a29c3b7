use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::alert::AlertBook;
use crate::analytics::AnalyticsEngine;
use crate::binance::ws::BinanceTradeFeed;
use crate::config::{Config, FeedSourceKind};
use crate::delivery::{spawn_delivery, TickHub};
use crate::feed::synthetic::SyntheticFeed;
use crate::feed::FeedSource;
use crate::ingest::Ingestor;
use crate::server::AppState;
use crate::store::sqlite::SqliteTickSink;
use crate::store::{TickSink, TickStore};

pub struct App {
    pub config: Config,
    pub store: Arc<TickStore>,
    pub ingestor: Arc<Ingestor>,
    pub hub: TickHub,
    pub alerts: Arc<AlertBook>,
    pub engine: AnalyticsEngine,
    shutdown_tx: watch::Sender<bool>,
    delivery_task: JoinHandle<()>,
    flush_task: Option<JoinHandle<()>>,
}

impl App {
    /// Build every component and spawn the background tasks. Ingestion is
    /// left stopped. Must be called inside a tokio runtime.
    pub fn build(config: Config) -> Result<Self> {
        let sink = match config.store.database_path() {
            Some(path) => Some(Arc::new(SqliteTickSink::open(&path)?)),
            None => None,
        };

        let mut store = TickStore::new(config.store.retention());
        if let Some(sink) = &sink {
            store = store.with_sink(sink.clone() as Arc<dyn TickSink>);
        }
        let store = Arc::new(store);
        if let Some(sink) = &sink {
            restore_from(&store, sink, &config)?;
        }

        let source: Arc<dyn FeedSource> = match config.feed.source {
            FeedSourceKind::Binance => Arc::new(BinanceTradeFeed::new(
                &config.feed.ws_base_url,
                config.feed.channel_capacity,
            )?),
            FeedSourceKind::Synthetic => Arc::new(SyntheticFeed::new(
                Duration::from_millis(config.feed.synthetic_period_ms),
                config.feed.channel_capacity,
            )),
        };

        let (batch_tx, batch_rx) = mpsc::channel(config.delivery.channel_capacity);
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            source,
            batch_tx,
            config.delivery.ingest_config(),
        ));
        for symbol in config.feed.active_symbols() {
            ingestor
                .add_symbol(&symbol)
                .with_context(|| format!("feed.symbols: cannot activate '{}'", symbol))?;
        }

        let hub = TickHub::new(config.delivery.hub_capacity);
        let alerts = Arc::new(AlertBook::new());
        let delivery_task = spawn_delivery(batch_rx, hub.clone(), alerts.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flush_task = sink.as_ref().map(|_| {
            spawn_flush_task(store.clone(), config.store.flush_interval(), shutdown_rx)
        });

        let engine = AnalyticsEngine::new(store.clone(), config.analytics.engine_config());

        Ok(Self {
            config,
            store,
            ingestor,
            hub,
            alerts,
            engine,
            shutdown_tx,
            delivery_task,
            flush_task,
        })
    }

    pub fn state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            engine: self.engine.clone(),
            ingestor: self.ingestor.clone(),
            hub: self.hub.clone(),
            alerts: self.alerts.clone(),
            default_timeframe: self.config.analytics.default_timeframe.clone(),
            default_window: self.config.analytics.default_window,
            shutdown: self.shutdown_tx.subscribe(),
        }
    }

    /// Stop ingestion, release the server and websocket clients, and write
    /// whatever is still unpersisted.
    pub async fn shutdown(self) -> Result<()> {
        self.ingestor.stop().await;
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.flush_task {
            let _ = task.await;
        }

        let store = self.store.clone();
        let flushed = tokio::task::spawn_blocking(move || store.flush())
            .await
            .context("final flush task panicked")??;
        tracing::info!(ticks = flushed, "Final flush complete");

        // The ingestor holds the last batch sender.
        drop(self.ingestor);
        if tokio::time::timeout(Duration::from_secs(2), self.delivery_task)
            .await
            .is_err()
        {
            tracing::warn!("Delivery task still running at shutdown");
        }
        Ok(())
    }
}

/// Load the recent history of every configured or previously stored symbol.
fn restore_from(store: &TickStore, sink: &SqliteTickSink, config: &Config) -> Result<()> {
    let mut symbols: BTreeSet<String> = config.feed.active_symbols().into_iter().collect();
    symbols.extend(sink.symbols().context("failed to list stored symbols")?);

    let mut total = 0;
    for symbol in &symbols {
        let stored = sink
            .count(symbol)
            .with_context(|| format!("failed to count stored ticks for {}", symbol))?;
        if stored == 0 {
            continue;
        }
        let ticks = sink
            .load_recent(symbol, config.store.restore_limit)
            .with_context(|| format!("failed to load stored ticks for {}", symbol))?;
        let restored = store.restore(ticks);
        tracing::debug!(symbol = %symbol, stored, restored, "Restored symbol history");
        total += restored;
    }
    tracing::info!(symbols = symbols.len(), ticks = total, "Restored ticks from database");
    Ok(())
}

/// Periodically write unpersisted ticks to the sink. Sink I/O runs on the
/// blocking pool; a failed flush is retried on the next tick.
pub fn spawn_flush_task(
    store: Arc<TickStore>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_millis(10)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            let flush_store = store.clone();
            match tokio::task::spawn_blocking(move || flush_store.flush()).await {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => tracing::debug!(ticks = n, "Flushed ticks"),
                Ok(Err(e)) => tracing::warn!(error = %format!("{:#}", e), "Tick flush failed"),
                Err(e) => tracing::warn!(error = %e, "Tick flush task panicked"),
            }
        }
    })
}
