//! Option-chain synchronization orchestrator
//!
//! Polls the option chain, refreshes analytics only when the chain changed,
//! persists the session and exposes the start/stop/clear control surface.
//!
//! All mutable state lives in one [`SyncInner`] shared by the orchestrator
//! handle and the scheduler task. A generation counter is bumped on every
//! start, stop, key change and clear; a fetch applies its result only if the
//! generation it started under is still current.

pub mod aggregate;
pub mod events;
pub mod fingerprint;
pub mod primary;
pub mod scheduler;

pub use aggregate::{fetch_aggregate, AggregateFetch, PartialAggregateFailure};
pub use events::{EventBroadcaster, SyncEvent, SyncSnapshot};
pub use fingerprint::{ChangeDetector, Fingerprint};
pub use primary::TickOutcome;
pub use scheduler::{PollScheduler, DEFAULT_POLL_INTERVAL};

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::client::AnalyticsApi;
use crate::error::SyncError;
use crate::persistence::SessionStore;
use crate::types::{AggregateResult, SessionKey, SessionRecord};

/// Record plus the fingerprint of its dataset, always mutated together
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) record: SessionRecord,
    pub(crate) detector: ChangeDetector,
    pub(crate) last_error: Option<String>,
}

pub(crate) struct SyncInner {
    pub(crate) api: Arc<dyn AnalyticsApi>,
    store: Arc<dyn SessionStore>,
    pub(crate) state: RwLock<SessionState>,
    generation: AtomicU64,
    pub(crate) tick_lock: Mutex<()>,
    pub(crate) events: EventBroadcaster,
    pub(crate) primary_fetches: AtomicU64,
    pub(crate) aggregate_fetches: AtomicU64,
}

impl SyncInner {
    pub(crate) fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == generation
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Stamp and save the record. Best-effort.
    pub(crate) fn persist(&self, state: &mut SessionState) {
        state.record.saved_at = Utc::now().timestamp_millis();
        self.store.save(&state.record);
    }
}

/// Handle to one synchronization session. Cheap to clone.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<SyncInner>,
    scheduler: Arc<Mutex<PollScheduler>>,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn AnalyticsApi>,
        store: Arc<dyn SessionStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                api,
                store,
                state: RwLock::new(SessionState::default()),
                generation: AtomicU64::new(0),
                tick_lock: Mutex::new(()),
                events: EventBroadcaster::default(),
                primary_fetches: AtomicU64::new(0),
                aggregate_fetches: AtomicU64::new(0),
            }),
            scheduler: Arc::new(Mutex::new(PollScheduler::new(poll_interval))),
        }
    }

    /// Load the persisted session and resume polling if it was active.
    ///
    /// Returns true when polling was resumed.
    pub async fn restore(&self) -> bool {
        let mut record = self.inner.store.load();
        if record.polling && record.valid_key().is_none() {
            warn!(key = ?record.key, "Persisted session was polling without a valid key, staying idle");
            record.polling = false;
        }
        let resume = record.polling;

        let mut scheduler = self.scheduler.lock().await;
        {
            let mut state = self.inner.state.write().await;
            state.detector.reset();
            // A complete restored snapshot needs no analytics refetch on the first tick
            if !record.dataset.is_empty()
                && record.aggregate.absent().is_empty()
                && !record.analytics_pending
            {
                state.detector.prime(&record.dataset);
            }
            state.last_error = None;
            state.record = record;
            if !resume {
                self.inner.persist(&mut state);
            }
        }
        self.inner.bump_generation();

        if resume && scheduler.start(self.inner.clone()) {
            info!("🔁 Resumed polling from persisted session");
            self.inner.events.send(SyncEvent::PollingChanged(true));
        }
        resume
    }

    /// Start polling `(user, expiry)`.
    ///
    /// Already polling the same key: no-op. Already polling another key: the
    /// key is switched and the next tick uses it; the timer is not re-armed.
    pub async fn start_fetching(&self, user: &str, expiry: &str) -> Result<(), SyncError> {
        let key = SessionKey::parse(user, expiry)?;
        let mut scheduler = self.scheduler.lock().await;

        let key_changed = {
            let mut state = self.inner.state.write().await;
            let key_changed = state.record.key.as_ref() != Some(&key);
            if key_changed {
                state.record.key = Some(key.clone());
                state.detector.reset();
            }
            let polling_changed = !state.record.polling;
            state.record.polling = true;
            if key_changed || polling_changed {
                self.inner.persist(&mut state);
            }
            key_changed
        };

        if key_changed {
            self.inner.bump_generation();
            self.inner.events.send(SyncEvent::KeyChanged(key.clone()));
        }

        if scheduler.is_running() {
            if key_changed {
                info!(key = %key, "🔀 Switched polling key");
            } else {
                debug!(key = %key, "Already polling, start ignored");
            }
            return Ok(());
        }

        self.inner.bump_generation();
        scheduler.start(self.inner.clone());
        info!(key = %key, "▶️ Fetching started");
        self.inner.events.send(SyncEvent::PollingChanged(true));
        Ok(())
    }

    /// Stop polling and persist the idle state. Idempotent.
    pub async fn stop_fetching(&self) {
        let mut scheduler = self.scheduler.lock().await;
        let was_running = scheduler.stop();
        self.inner.bump_generation();

        {
            let mut state = self.inner.state.write().await;
            if state.record.polling {
                state.record.polling = false;
                self.inner.persist(&mut state);
            }
        }

        if was_running {
            self.inner.events.send(SyncEvent::PollingChanged(false));
        } else {
            debug!("Not polling, stop ignored");
        }
    }

    /// Stop the timer without touching the persisted polling flag, so the
    /// next process start resumes.
    pub async fn shutdown(&self) {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.stop() {
            self.inner.bump_generation();
        }
    }

    /// Wipe the local dataset and aggregate, then ask the server to delete
    /// its analytics for `key`. The local clear is never rolled back.
    pub async fn clear(&self, key: &SessionKey) -> Result<(), SyncError> {
        {
            let mut state = self.inner.state.write().await;
            self.inner.bump_generation();
            state.record.clear_data();
            state.detector.reset();
            self.inner.persist(&mut state);
        }
        info!(key = %key, "🧹 Session data cleared");
        self.inner.events.send(SyncEvent::Cleared(key.clone()));

        match self.inner.api.clear_analytics(key).await {
            Ok(()) => {
                info!(key = %key, "Server analytics cleared");
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to clear server analytics");
                Err(e)
            }
        }
    }

    /// Change the key without starting or stopping polling
    pub async fn set_key(&self, user: &str, expiry: &str) -> Result<(), SyncError> {
        let key = SessionKey::parse(user, expiry)?;
        let _scheduler = self.scheduler.lock().await;

        {
            let mut state = self.inner.state.write().await;
            if state.record.key.as_ref() == Some(&key) {
                return Ok(());
            }
            state.record.key = Some(key.clone());
            state.detector.reset();
            self.inner.persist(&mut state);
        }

        self.inner.bump_generation();
        info!(key = %key, "🔀 Session key changed");
        self.inner.events.send(SyncEvent::KeyChanged(key));
        Ok(())
    }

    /// Run one tick now. Skipped if a tick is already in flight.
    pub async fn refresh_now(&self) -> TickOutcome {
        self.inner.try_run_tick().await
    }

    /// Refetch every analytic module for the current key.
    ///
    /// `None` without a key, when the result went stale, or when a tick is in
    /// flight (that tick owns the record until it finishes).
    pub async fn refresh_analytics(&self) -> Option<AggregateResult> {
        let Ok(_guard) = self.inner.tick_lock.try_lock() else {
            debug!("Tick in progress, analytics refresh skipped");
            return None;
        };
        let generation = self.inner.current_generation();
        let key = self.inner.state.read().await.record.valid_key().cloned()?;
        self.inner.refresh_aggregate(&key, generation).await
    }

    pub async fn snapshot(&self) -> SyncSnapshot {
        let running = self.is_running().await;
        let state = self.inner.state.read().await;
        SyncSnapshot {
            record: state.record.clone(),
            running,
            last_error: state.last_error.clone(),
            generation: self.inner.current_generation(),
            primary_fetches: self.inner.primary_fetches.load(Ordering::Relaxed),
            aggregate_fetches: self.inner.aggregate_fetches.load(Ordering::Relaxed),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.lock().await.is_running()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.state.read().await.last_error.clone()
    }

    pub async fn record(&self) -> SessionRecord {
        self.inner.state.read().await.record.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.current_generation()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockAnalyticsApi;
    use crate::persistence::MemorySessionStore;
    use crate::types::{AnalyticModule, PrimaryDataset, StrikeRow};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    const PERIOD: Duration = Duration::from_secs(5);

    fn dataset(ltp: f64) -> PrimaryDataset {
        let mut row = StrikeRow::new();
        row.insert("strike_price".to_string(), json!(22000));
        row.insert("call_ltp".to_string(), json!(ltp));
        vec![row]
    }

    fn key() -> SessionKey {
        SessionKey::parse("emperor", "2025-01-30").unwrap()
    }

    fn orchestrator(api: MockAnalyticsApi) -> (SyncOrchestrator, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let orchestrator = SyncOrchestrator::new(Arc::new(api), store.clone(), PERIOD);
        (orchestrator, store)
    }

    async fn with_key(orchestrator: &SyncOrchestrator) {
        orchestrator.set_key("emperor", "2025-01-30").await.unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_snapshot_skips_analytics() {
        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_option_chain()
            .times(2)
            .returning(|_| Ok(dataset(101.5)));
        api.expect_fetch_module()
            .times(6)
            .returning(|_, _| Ok(json!({})));

        let (orchestrator, _) = orchestrator(api);
        with_key(&orchestrator).await;

        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Changed);
        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Unchanged);
        assert_eq!(orchestrator.snapshot().await.aggregate_fetches, 1);
    }

    #[tokio::test]
    async fn test_changed_snapshot_triggers_one_fan_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_option_chain().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(dataset(100.0 + n as f64))
        });
        api.expect_fetch_module()
            .times(12)
            .returning(|_, _| Ok(json!(true)));

        let (orchestrator, store) = orchestrator(api);
        with_key(&orchestrator).await;

        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Changed);
        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Changed);

        let snapshot = orchestrator.snapshot().await;
        assert_eq!(snapshot.aggregate_fetches, 2);
        assert_eq!(snapshot.record.dataset, dataset(101.0));
        assert_eq!(store.saved().unwrap().dataset, dataset(101.0));
    }

    #[tokio::test]
    async fn test_primary_failure_keeps_dataset_and_surfaces_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_option_chain().returning(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                1 => Err(SyncError::Status {
                    endpoint: "/option-chain".to_string(),
                    status: 400,
                }),
                _ => Ok(dataset(101.5)),
            }
        });
        api.expect_fetch_module()
            .times(6)
            .returning(|_, _| Ok(json!(1)));

        let (orchestrator, _) = orchestrator(api);
        with_key(&orchestrator).await;
        let mut events = orchestrator.subscribe();

        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Changed);
        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Failed);

        let snapshot = orchestrator.snapshot().await;
        assert_eq!(snapshot.record.dataset, dataset(101.5));
        assert_eq!(snapshot.record.aggregate.len(), 6);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("/option-chain returned HTTP 400")
        );

        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Unchanged);
        assert!(orchestrator.last_error().await.is_none());

        let mut saw_error = false;
        let mut saw_recovered = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SyncEvent::Error(_) => saw_error = true,
                SyncEvent::Recovered => saw_recovered = true,
                _ => {}
            }
        }
        assert!(saw_error && saw_recovered);
    }

    #[tokio::test]
    async fn test_partial_failure_replaces_aggregate_wholesale() {
        let rounds = Arc::new(AtomicUsize::new(0));
        let chain_rounds = rounds.clone();

        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_option_chain().returning(move |_| {
            let n = chain_rounds.fetch_add(1, Ordering::SeqCst);
            Ok(dataset(n as f64))
        });
        let module_rounds = rounds.clone();
        api.expect_fetch_module().returning(move |_, module| {
            // Second round: the bias module fails
            if module == AnalyticModule::Bias && module_rounds.load(Ordering::SeqCst) > 1 {
                Err(SyncError::Status {
                    endpoint: module.endpoint().to_string(),
                    status: 503,
                })
            } else {
                Ok(json!({"module": module.key()}))
            }
        });

        let (orchestrator, _) = orchestrator(api);
        with_key(&orchestrator).await;

        orchestrator.refresh_now().await;
        assert_eq!(orchestrator.record().await.aggregate.len(), 6);

        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Changed);
        let aggregate = orchestrator.record().await.aggregate;
        assert_eq!(aggregate.len(), 5);
        assert!(!aggregate.is_present(AnalyticModule::Bias));
        assert!(orchestrator.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_tick_without_key_is_idle() {
        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_option_chain().never();

        let (orchestrator, _) = orchestrator(api);
        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_key() {
        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_option_chain().never();

        let (orchestrator, store) = orchestrator(api);
        let err = orchestrator.start_fetching("", "2025-01-30").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidKey(_)));
        assert!(!orchestrator.is_running().await);
        assert!(store.saved().is_none());
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let (orchestrator, store) = orchestrator(MockAnalyticsApi::new());
        orchestrator.stop_fetching().await;
        orchestrator.stop_fetching().await;

        assert!(!orchestrator.is_running().await);
        assert!(store.saved().is_none());
    }

    #[tokio::test]
    async fn test_clear_is_local_even_when_backend_fails() {
        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_option_chain()
            .returning(|_| Ok(dataset(101.5)));
        api.expect_fetch_module().returning(|_, _| Ok(json!(1)));
        api.expect_clear_analytics().times(1).returning(|_| {
            Err(SyncError::Status {
                endpoint: "/clear-analytics".to_string(),
                status: 500,
            })
        });

        let (orchestrator, store) = orchestrator(api);
        with_key(&orchestrator).await;
        orchestrator.refresh_now().await;
        assert!(!orchestrator.record().await.dataset.is_empty());

        let result = orchestrator.clear(&key()).await;
        assert!(result.is_err());

        let record = orchestrator.record().await;
        assert!(record.dataset.is_empty());
        assert!(record.aggregate.is_empty());
        assert_eq!(record.key, Some(key()));

        let saved = store.saved().unwrap();
        assert!(saved.dataset.is_empty());
        assert!(saved.aggregate.is_empty());

        // Fingerprint was reset with the dataset, so the same snapshot counts as new
        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Changed);
    }

    #[tokio::test]
    async fn test_key_change_resets_fingerprint() {
        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_option_chain()
            .times(2)
            .returning(|_| Ok(dataset(101.5)));
        api.expect_fetch_module()
            .times(12)
            .returning(|_, _| Ok(json!(1)));

        let (orchestrator, _) = orchestrator(api);
        with_key(&orchestrator).await;
        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Changed);

        orchestrator.set_key("king", "2025-01-30").await.unwrap();
        assert_eq!(orchestrator.refresh_now().await, TickOutcome::Changed);
    }

    #[tokio::test]
    async fn test_set_same_key_keeps_generation() {
        let (orchestrator, _) = orchestrator(MockAnalyticsApi::new());
        with_key(&orchestrator).await;
        let generation = orchestrator.generation();

        with_key(&orchestrator).await;
        assert_eq!(orchestrator.generation(), generation);
    }

    #[tokio::test]
    async fn test_restore_normalizes_polling_without_key() {
        let store = Arc::new(MemorySessionStore::new());
        store.set_raw(r#"{"polling": true, "dataset": [{"strike_price": 1}]}"#);

        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_option_chain().never();
        let orchestrator = SyncOrchestrator::new(Arc::new(api), store.clone(), PERIOD);

        assert!(!orchestrator.restore().await);
        assert!(!orchestrator.is_running().await);

        let record = orchestrator.record().await;
        assert!(!record.polling);
        assert_eq!(record.dataset.len(), 1);
        assert!(!store.saved().unwrap().polling);
    }

    #[tokio::test]
    async fn test_refresh_analytics_without_key() {
        let (orchestrator, _) = orchestrator(MockAnalyticsApi::new());
        assert!(orchestrator.refresh_analytics().await.is_none());
    }
}
