use serde::Serialize;

use crate::alert::PriceAlert;
use crate::model::tick::Tick;

/// Ticks accepted by the store in one ingest micro-batch, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct TickBatch {
    pub ticks: Vec<Tick>,
}

/// What subscribers of the hub receive. Serialized as
/// `{"type": "ticks", "data": [...]}` or `{"type": "alert", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubEvent {
    Ticks(Vec<Tick>),
    Alert(PriceAlert),
}
