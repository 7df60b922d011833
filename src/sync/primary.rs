//! Primary Fetcher - one polling tick
//!
//! Fetches the option chain, and only when it differs from the committed
//! snapshot stores it and triggers the aggregate fan-out. This is the throttle
//! that keeps analytics load proportional to market movement.
//!
//! A stored snapshot whose fan-out was discarded (stop, shutdown) stays
//! flagged `analytics_pending` and gets its aggregate on the next tick even
//! though the chain itself is unchanged.

use serde::Serialize;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

use super::events::SyncEvent;
use super::SyncInner;

/// What a tick ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TickOutcome {
    /// No valid key; nothing fetched
    Idle,
    /// Another tick was already in flight
    Skipped,
    /// Primary fetch failed; dataset left untouched
    Failed,
    /// Same snapshot as last time; aggregate not refreshed
    Unchanged,
    /// New snapshot stored, or a pending aggregate fetched, and aggregate refreshed
    Changed,
    /// Result arrived after a stop/start/key change/clear and was discarded
    Stale,
}

impl SyncInner {
    /// Run one tick, waiting for any tick already in flight to finish first
    pub(crate) async fn run_tick(&self) -> TickOutcome {
        let _guard = self.tick_lock.lock().await;
        self.fetch_primary().await
    }

    /// Run one tick unless another is in flight
    pub(crate) async fn try_run_tick(&self) -> TickOutcome {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("Tick already in progress, skipping");
            return TickOutcome::Skipped;
        };
        self.fetch_primary().await
    }

    async fn fetch_primary(&self) -> TickOutcome {
        let generation = self.current_generation();
        let key = match self.state.read().await.record.valid_key() {
            Some(key) => key.clone(),
            None => return TickOutcome::Idle,
        };

        self.primary_fetches.fetch_add(1, Ordering::Relaxed);
        let response = self.api.fetch_option_chain(&key).await;

        let mut state = self.state.write().await;
        if !self.is_current(generation) {
            debug!(key = %key, generation, "Discarding stale option chain");
            return TickOutcome::Stale;
        }

        let dataset = match response {
            Ok(dataset) => dataset,
            Err(e) => {
                let message = e.to_string();
                warn!(key = %key, error = %message, "Option chain fetch failed, keeping last snapshot");
                state.last_error = Some(message.clone());
                drop(state);
                self.events.send(SyncEvent::Error(message));
                return TickOutcome::Failed;
            }
        };

        let recovered = state.last_error.take().is_some();
        let changed = state.detector.has_changed(&dataset);
        if !changed && !state.record.analytics_pending {
            drop(state);
            if recovered {
                self.events.send(SyncEvent::Recovered);
            }
            debug!(key = %key, "Option chain unchanged");
            return TickOutcome::Unchanged;
        }

        let fingerprint = if changed {
            state.detector.commit(&dataset);
            state.record.dataset = dataset.clone();
            state.record.analytics_pending = true;
            self.persist(&mut state);
            state.detector.current().map(|f| f.to_string())
        } else {
            None
        };
        drop(state);

        if recovered {
            self.events.send(SyncEvent::Recovered);
        }
        if changed {
            let fingerprint = fingerprint.unwrap_or_default();
            info!(key = %key, strikes = dataset.len(), fingerprint = %fingerprint, "📈 Option chain changed");
            self.events.send(SyncEvent::DatasetUpdated(dataset));
        } else {
            info!(key = %key, "Option chain unchanged, fetching its pending analytics");
        }

        match self.refresh_aggregate(&key, generation).await {
            Some(_) => TickOutcome::Changed,
            None => TickOutcome::Stale,
        }
    }
}
