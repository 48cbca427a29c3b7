use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::InvalidTick;
use crate::event::TickBatch;
use crate::feed::{now_ms, FeedHandle, FeedSource, RawFeedMessage};
use crate::model::tick::{is_valid_symbol, normalize_symbol, Tick};
use crate::store::TickStore;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Send a batch as soon as this many ticks are pending.
    pub batch_max: usize,
    /// Upper bound on how long an accepted tick waits before delivery.
    pub batch_flush: Duration,
    /// How long `stop` waits for each task before aborting it.
    pub stop_grace: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_max: 100,
            batch_flush: Duration::from_millis(250),
            stop_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    appended: AtomicU64,
    malformed: AtomicU64,
    invalid: AtomicU64,
    filtered: AtomicU64,
    batches_sent: AtomicU64,
    batches_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub received: u64,
    pub appended: u64,
    pub malformed: u64,
    pub invalid: u64,
    pub filtered: u64,
    pub batches_sent: u64,
    pub batches_dropped: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            appended: self.appended.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

enum IngestorState {
    Stopped,
    Running {
        shutdown_tx: watch::Sender<bool>,
        ingest_task: JoinHandle<()>,
        feed_task: JoinHandle<()>,
    },
}

pub struct Ingestor {
    store: Arc<TickStore>,
    source: Arc<dyn FeedSource>,
    batches: mpsc::Sender<TickBatch>,
    symbols: Arc<RwLock<BTreeSet<String>>>,
    symbols_tx: watch::Sender<BTreeSet<String>>,
    stats: Arc<IngestStats>,
    config: IngestConfig,
    state: Mutex<IngestorState>,
}

impl Ingestor {
    pub fn new(
        store: Arc<TickStore>,
        source: Arc<dyn FeedSource>,
        batches: mpsc::Sender<TickBatch>,
        config: IngestConfig,
    ) -> Self {
        let (symbols_tx, _) = watch::channel(BTreeSet::new());
        Self {
            store,
            source,
            batches,
            symbols: Arc::new(RwLock::new(BTreeSet::new())),
            symbols_tx,
            stats: Arc::new(IngestStats::default()),
            config,
            state: Mutex::new(IngestorState::Stopped),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Activate a symbol. Returns `Ok(false)` if it was already active.
    pub fn add_symbol(&self, symbol: &str) -> Result<bool, InvalidTick> {
        let symbol = normalize_symbol(symbol);
        if !is_valid_symbol(&symbol) {
            return Err(InvalidTick::Symbol(symbol));
        }
        let added = {
            let mut set = self.symbols.write();
            let added = set.insert(symbol.clone());
            if added {
                self.symbols_tx.send_replace(set.clone());
            }
            added
        };
        if added {
            tracing::info!(symbol = %symbol, "Symbol added");
        }
        Ok(added)
    }

    /// Deactivate a symbol. Ticks for it are filtered from the next message
    /// on; history already in the store is kept.
    pub fn remove_symbol(&self, symbol: &str) -> bool {
        let symbol = normalize_symbol(symbol);
        let removed = {
            let mut set = self.symbols.write();
            let removed = set.remove(&symbol);
            if removed {
                self.symbols_tx.send_replace(set.clone());
            }
            removed
        };
        if removed {
            tracing::info!(symbol = %symbol, "Symbol removed");
        }
        removed
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().iter().cloned().collect()
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        let mut state = self.state.lock().await;
        self.reap_finished(&mut state).await;
        matches!(*state, IngestorState::Running { .. })
    }

    /// Open the feed and start the ingest task. Returns false if already
    /// running.
    pub async fn start(&self) -> bool {
        let mut state = self.state.lock().await;
        self.reap_finished(&mut state).await;
        if matches!(*state, IngestorState::Running { .. }) {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let FeedHandle {
            messages,
            task: feed_task,
        } = self
            .source
            .open(self.symbols_tx.subscribe(), shutdown_rx.clone());

        let pipeline = Pipeline {
            store: self.store.clone(),
            source: self.source.clone(),
            symbols: self.symbols.clone(),
            batches: self.batches.clone(),
            stats: self.stats.clone(),
            batch_max: self.config.batch_max.max(1),
        };
        let ingest_task = tokio::spawn(pipeline.run(messages, shutdown_rx, self.config.batch_flush));

        *state = IngestorState::Running {
            shutdown_tx,
            ingest_task,
            feed_task,
        };
        tracing::info!(
            source = self.source.name(),
            symbols = ?self.symbols(),
            "Ingestion started"
        );
        true
    }

    /// Signal shutdown and wait for the ingest and feed tasks to finish. Once
    /// this returns no further appends happen. Returns false if not running.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        self.reap_finished(&mut state).await;
        let IngestorState::Running {
            shutdown_tx,
            ingest_task,
            feed_task,
        } = std::mem::replace(&mut *state, IngestorState::Stopped)
        else {
            return false;
        };

        let _ = shutdown_tx.send(true);
        join_with_grace("ingest", ingest_task, self.config.stop_grace).await;
        join_with_grace("feed", feed_task, self.config.stop_grace).await;
        tracing::info!(stats = ?self.stats.snapshot(), "Ingestion stopped");
        true
    }

    /// The ingest task also ends on its own when the feed closes. Tear the
    /// run down and go back to Stopped so a later `start` opens a new feed.
    async fn reap_finished(&self, state: &mut IngestorState) {
        let finished = matches!(
            &*state,
            IngestorState::Running { ingest_task, .. } if ingest_task.is_finished()
        );
        if !finished {
            return;
        }
        if let IngestorState::Running {
            shutdown_tx,
            ingest_task,
            feed_task,
        } = std::mem::replace(state, IngestorState::Stopped)
        {
            let _ = shutdown_tx.send(true);
            join_with_grace("ingest", ingest_task, self.config.stop_grace).await;
            join_with_grace("feed", feed_task, self.config.stop_grace).await;
            tracing::warn!(source = self.source.name(), "Ingestion ended without stop, now stopped");
        }
    }
}

async fn join_with_grace(name: &'static str, mut task: JoinHandle<()>, grace: Duration) {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Task ended abnormally"),
        Err(_) => {
            tracing::warn!(task = name, grace_ms = grace.as_millis() as u64, "Task did not stop in time, aborting");
            task.abort();
            let _ = task.await;
        }
    }
}

struct Pipeline {
    store: Arc<TickStore>,
    source: Arc<dyn FeedSource>,
    symbols: Arc<RwLock<BTreeSet<String>>>,
    batches: mpsc::Sender<TickBatch>,
    stats: Arc<IngestStats>,
    batch_max: usize,
}

impl Pipeline {
    async fn run(
        self,
        mut messages: mpsc::Receiver<RawFeedMessage>,
        mut shutdown: watch::Receiver<bool>,
        batch_flush: Duration,
    ) {
        let mut pending: Vec<Tick> = Vec::with_capacity(self.batch_max);
        let mut flush = tokio::time::interval(batch_flush.max(Duration::from_millis(1)));
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                msg = messages.recv() => match msg {
                    Some(raw) => {
                        self.handle(&raw, &mut pending);
                        if pending.len() >= self.batch_max {
                            self.send_batch(&mut pending);
                        }
                    }
                    None => {
                        tracing::warn!("Feed closed, ingest task exiting");
                        break;
                    }
                },
                _ = flush.tick() => self.send_batch(&mut pending),
            }
        }
        self.send_batch(&mut pending);
    }

    fn handle(&self, raw: &RawFeedMessage, pending: &mut Vec<Tick>) {
        bump(&self.stats.received);
        let tick = match self.source.normalize(raw) {
            Ok(tick) => tick,
            Err(e) => {
                bump(&self.stats.malformed);
                tracing::debug!(error = %e, "Dropping malformed feed message");
                return;
            }
        };
        if !self.symbols.read().contains(&tick.symbol) {
            bump(&self.stats.filtered);
            return;
        }
        match self.store.append(tick.clone()) {
            Ok(()) => {
                bump(&self.stats.appended);
                tracing::trace!(
                    symbol = %tick.symbol,
                    latency_ms = now_ms().saturating_sub(raw.received_at_ms),
                    "Tick appended"
                );
                pending.push(tick);
            }
            Err(e) => {
                bump(&self.stats.invalid);
                tracing::debug!(symbol = %tick.symbol, error = %e, "Dropping invalid tick");
            }
        }
    }

    fn send_batch(&self, pending: &mut Vec<Tick>) {
        if pending.is_empty() {
            return;
        }
        let ticks = std::mem::replace(pending, Vec::with_capacity(self.batch_max));
        let count = ticks.len();
        match self.batches.try_send(TickBatch { ticks }) {
            Ok(()) => bump(&self.stats.batches_sent),
            Err(mpsc::error::TrySendError::Full(_)) => {
                bump(&self.stats.batches_dropped);
                tracing::warn!(ticks = count, "Delivery channel full, dropping tick batch");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                bump(&self.stats.batches_dropped);
                tracing::warn!(ticks = count, "Delivery channel closed, dropping tick batch");
            }
        }
    }
}
