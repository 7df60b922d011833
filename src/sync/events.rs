//! State change notifications for the presentation layer

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{AggregateResult, PrimaryDataset, SessionKey, SessionRecord};

/// Something observable changed in the session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SyncEvent {
    /// New option-chain snapshot stored
    DatasetUpdated(PrimaryDataset),
    /// Analytics aggregate replaced
    AggregateUpdated(AggregateResult),
    /// Primary fetch failed; dataset frozen at its last value
    Error(String),
    /// A successful fetch cleared the previous error
    Recovered,
    /// Scheduler started or stopped
    PollingChanged(bool),
    /// Polling key switched
    KeyChanged(SessionKey),
    /// Local dataset and aggregate cleared
    Cleared(SessionKey),
}

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub record: SessionRecord,
    pub running: bool,
    pub last_error: Option<String>,
    pub generation: u64,
    /// Primary fetches issued since construction
    pub primary_fetches: u64,
    /// Aggregate fan-outs completed since construction
    pub aggregate_fetches: u64,
}

/// Fan-out of [`SyncEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
