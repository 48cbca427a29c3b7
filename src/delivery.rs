use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::alert::AlertBook;
use crate::event::{HubEvent, TickBatch};

/// Broadcast hub. Slow subscribers lag and lose events; publishers never
/// wait on them.
#[derive(Clone)]
pub struct TickHub {
    tx: broadcast::Sender<HubEvent>,
}

impl TickHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    /// Returns how many subscribers the event reached.
    pub fn publish(&self, event: HubEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Drain tick batches from the ingestor, check alerts and publish both to the
/// hub. Ends when every batch sender is dropped.
pub fn spawn_delivery(
    mut batches: mpsc::Receiver<TickBatch>,
    hub: TickHub,
    alerts: Arc<AlertBook>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = batches.recv().await {
            for alert in alerts.check(&batch.ticks) {
                tracing::info!(
                    alert_id = alert.id,
                    symbol = %alert.symbol,
                    threshold = alert.threshold,
                    price = alert.triggered_price.unwrap_or_default(),
                    "Price alert triggered"
                );
                hub.publish(HubEvent::Alert(alert));
            }
            hub.publish(HubEvent::Ticks(batch.ticks));
        }
        tracing::info!("Delivery task stopped");
    })
}
