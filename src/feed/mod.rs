pub mod synthetic;

use std::collections::BTreeSet;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::MalformedFeedMessage;
use crate::model::tick::Tick;

/// One undecoded message as received from the wire.
#[derive(Debug, Clone)]
pub struct RawFeedMessage {
    pub received_at_ms: u64,
    pub payload: String,
}

impl RawFeedMessage {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            received_at_ms: now_ms(),
            payload: payload.into(),
        }
    }
}

/// A running feed. The task ends once `shutdown` flips to true; dropping
/// `messages` also makes workers give up.
pub struct FeedHandle {
    pub messages: mpsc::Receiver<RawFeedMessage>,
    pub task: JoinHandle<()>,
}

pub trait FeedSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start producing messages for the symbols currently in `symbols`,
    /// following later changes to the set.
    fn open(
        &self,
        symbols: watch::Receiver<BTreeSet<String>>,
        shutdown: watch::Receiver<bool>,
    ) -> FeedHandle;

    fn normalize(&self, raw: &RawFeedMessage) -> Result<Tick, MalformedFeedMessage>;
}

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
